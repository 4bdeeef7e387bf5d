// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `fieldsync status` command implementation.
//!
//! Reports whether credentials are stored and which requests are still
//! waiting in the outbox. Reads local state only; no network calls.

use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use fieldsync_config::model::FieldsyncConfig;
use fieldsync_core::{Credential, FieldsyncError, QueuedRequest};
use fieldsync_storage::queries::outbox;
use serde::Serialize;

use crate::app::AppContext;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database_path: String,
    pub logged_in: bool,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub access_expired: bool,
    pub pending: Vec<QueuedRequest>,
}

impl StatusReport {
    fn new(
        database_path: String,
        credential: Option<&Credential>,
        pending: Vec<QueuedRequest>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            database_path,
            logged_in: credential.is_some(),
            access_expires_at: credential.and_then(|c| c.access_expiry),
            access_expired: credential.is_some_and(|c| c.is_access_expired(now)),
            pending,
        }
    }
}

/// Run the `fieldsync status` command.
///
/// `--json` prints a [`StatusReport`]; `--plain` or a non-TTY stdout disables colors.
pub async fn run_status(
    config: FieldsyncConfig,
    json: bool,
    plain: bool,
) -> Result<(), FieldsyncError> {
    let app = AppContext::open(config).await?;
    let credential = app.credentials.get().await;
    let pending = outbox::list(&app.db).await?;
    let now = Utc::now();
    let report = StatusReport::new(
        app.config.storage.database_path.clone(),
        credential.as_ref(),
        pending,
        now,
    );

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print_report(&report, now, use_color);
    }

    app.close().await
}

fn print_report(report: &StatusReport, now: DateTime<Utc>, use_color: bool) {
    println!();
    println!("  fieldsync status");
    println!("  {}", "-".repeat(35));
    println!("    Database: {}", report.database_path);

    let session = match (report.logged_in, report.access_expired) {
        (false, _) => "not logged in",
        (true, true) => "access token expired (will refresh on next request)",
        (true, false) => "logged in",
    };
    if use_color {
        use colored::Colorize;
        let marker = if report.logged_in { "✓".green() } else { "✗".red() };
        println!("    Session:  {marker} {session}");
    } else {
        let marker = if report.logged_in { "[OK]" } else { "[--]" };
        println!("    Session:  {marker} {session}");
    }

    println!("    Outbox:   {} pending", report.pending.len());
    for request in &report.pending {
        println!(
            "      #{:<5} {:<6} {}  (attempts: {}, queued {})",
            request.id,
            request.method,
            request.url,
            request.attempts,
            format_age(&request.created_at, now)
        );
    }
    println!();
}

/// Human-readable age of an RFC 3339 timestamp, e.g. `3m ago`.
fn format_age(created_at: &str, now: DateTime<Utc>) -> String {
    let Ok(created) = DateTime::parse_from_rfc3339(created_at) else {
        return created_at.to_string();
    };
    let secs = (now - created.with_timezone(&Utc)).num_seconds().max(0);
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h ago")
    } else if hours > 0 {
        format!("{hours}h {minutes}m ago")
    } else if minutes > 0 {
        format!("{minutes}m ago")
    } else {
        "just now".to_string()
    }
}
