// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery order records as they arrive from the realtime change feed.
//!
//! Rows come straight from the `orders` table, so field names are the
//! snake_case column names. camelCase aliases are accepted for payloads that
//! were reshaped by an edge function before broadcast. Each field has at most
//! one spelling per row; other timestamp columns such as `updated_at` stay in
//! `extra`.

use serde::{Deserialize, Deserializer, Serialize};

/// A delivery order keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default, alias = "orderNumber")]
    pub order_number: Option<String>,
    #[serde(default, alias = "customerName")]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(
        default,
        alias = "assignedAgentId",
        alias = "agent_id",
        deserialize_with = "optional_id_from_string_or_number"
    )]
    pub assigned_agent_id: Option<String>,
    #[serde(default, alias = "lastUpdated")]
    pub last_updated: Option<String>,
    /// Columns this core does not interpret, kept for display consumers.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Order {
    /// A bare order with only an id, mostly useful in tests.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order_number: None,
            customer_name: None,
            status: None,
            latitude: None,
            longitude: None,
            assigned_agent_id: None,
            last_updated: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A typed change decoded from one realtime frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderChange {
    Insert(Order),
    Update(Order),
    Delete { id: String },
}

/// Identifier-only view used to decode `old_record` payloads of deletes.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderKey {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
    Uint(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
            RawId::Uint(n) => n.to_string(),
        }
    }
}

/// Accept both `"42"` and `42` for primary keys.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

/// Foreign keys: like [`id_from_string_or_number`], with `null` as `None`.
fn optional_id_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}
