// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbox rows: insert, read, attempt bookkeeping, and removal after delivery.

use fieldsync_core::{FieldsyncError, NewRequest, QueuedRequest};
use rusqlite::{params, Row};

use crate::database::{map_tr_err, Database};

const COLUMNS: &str = "id, method, url, body_text, content_type, attempts, created_at";

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<QueuedRequest> {
    Ok(QueuedRequest {
        id: row.get(0)?,
        method: row.get(1)?,
        url: row.get(2)?,
        body_text: row.get(3)?,
        content_type: row.get(4)?,
        attempts: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Persist a request. Returns the new row id, which is monotonically increasing.
pub async fn insert(db: &Database, request: &NewRequest) -> Result<i64, FieldsyncError> {
    let request = request.clone();
    db.connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.execute(
                "INSERT INTO outbox (method, url, body_text, content_type) VALUES (?1, ?2, ?3, ?4)",
                params![
                    request.method,
                    request.url,
                    request.body_text,
                    request.content_type
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// Fetch one row, `None` if it was already delivered or never existed.
pub async fn get(db: &Database, id: i64) -> Result<Option<QueuedRequest>, FieldsyncError> {
    db.connection()
        .call(move |conn| -> Result<Option<QueuedRequest>, rusqlite::Error> {
            let sql = format!("SELECT {COLUMNS} FROM outbox WHERE id = ?1");
            match conn.query_row(&sql, params![id], row_to_request) {
                Ok(request) => Ok(Some(request)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(map_tr_err)
}

/// Remove a delivered row. Returns whether a row was deleted.
pub async fn delete(db: &Database, id: i64) -> Result<bool, FieldsyncError> {
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Bump the attempt counter and return the new value (`None` if the row is gone).
pub async fn increment_attempts(db: &Database, id: i64) -> Result<Option<i64>, FieldsyncError> {
    db.connection()
        .call(move |conn| -> Result<Option<i64>, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE outbox SET attempts = attempts + 1 WHERE id = ?1",
                params![id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let attempts = conn.query_row(
                "SELECT attempts FROM outbox WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(Some(attempts))
        })
        .await
        .map_err(map_tr_err)
}

/// All pending ids, oldest first.
pub async fn list_ids(db: &Database) -> Result<Vec<i64>, FieldsyncError> {
    db.connection()
        .call(|conn| -> Result<Vec<i64>, rusqlite::Error> {
            let mut stmt = conn.prepare("SELECT id FROM outbox ORDER BY id ASC")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
        .await
        .map_err(map_tr_err)
}

/// All pending rows, oldest first.
pub async fn list(db: &Database) -> Result<Vec<QueuedRequest>, FieldsyncError> {
    db.connection()
        .call(|conn| -> Result<Vec<QueuedRequest>, rusqlite::Error> {
            let sql = format!("SELECT {COLUMNS} FROM outbox ORDER BY id ASC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_request)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count(db: &Database) -> Result<i64, FieldsyncError> {
    db.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let (db, _dir) = setup_db().await;

        let request = NewRequest::json(
            "post",
            "/orders/42/status",
            &serde_json::json!({"status": "delivered"}),
        );
        let id = insert(&db, &request).await.unwrap();
        assert!(id > 0);

        let row = get(&db, id).await.unwrap().unwrap();
        assert_eq!(row.method, "POST");
        assert_eq!(row.url, "/orders/42/status");
        assert_eq!(row.body_text.as_deref(), Some(r#"{"status":"delivered"}"#));
        assert_eq!(row.content_type.as_deref(), Some("application/json"));
        assert_eq!(row.attempts, 0);
        assert!(row.created_at.ends_with('Z'));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_listed_in_order() {
        let (db, _dir) = setup_db().await;

        let a = insert(&db, &NewRequest::new("DELETE", "/a")).await.unwrap();
        let b = insert(&db, &NewRequest::new("PUT", "/b")).await.unwrap();
        let c = insert(&db, &NewRequest::new("PATCH", "/c")).await.unwrap();
        assert!(a < b && b < c);

        assert_eq!(list_ids(&db).await.unwrap(), vec![a, b, c]);
        let urls: Vec<String> = list(&db).await.unwrap().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, ["/a", "/b", "/c"]);
        assert_eq!(count(&db).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let (db, _dir) = setup_db().await;

        let id = insert(&db, &NewRequest::new("POST", "/x")).await.unwrap();
        assert!(delete(&db, id).await.unwrap());
        assert!(!delete(&db, id).await.unwrap());
        assert!(get(&db, id).await.unwrap().is_none());
        assert_eq!(count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn increment_attempts_counts_up() {
        let (db, _dir) = setup_db().await;

        let id = insert(&db, &NewRequest::new("POST", "/x")).await.unwrap();
        assert_eq!(increment_attempts(&db, id).await.unwrap(), Some(1));
        assert_eq!(increment_attempts(&db, id).await.unwrap(), Some(2));
        assert_eq!(increment_attempts(&db, id + 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.db");
        let path = path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        let id = insert(&db, &NewRequest::new("POST", "/orders")).await.unwrap();
        db.close().await.unwrap();

        let db = Database::open(path).await.unwrap();
        assert_eq!(list_ids(&db).await.unwrap(), vec![id]);
    }
}
