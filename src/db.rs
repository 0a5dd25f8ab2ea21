use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::manifest::ManifestFileItem;

pub const DEFAULT_DB_PATH: &str = "data/documents.sqlite";

pub const DOCUMENT_SET_FILE: &str = "/documentSet.json";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            url        TEXT PRIMARY KEY,
            content    TEXT NOT NULL,
            screenshot TEXT,
            fetched_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// A normalized page kept so the same URL is not fetched twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentEntry {
    pub url: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip)]
    pub fetched_at: String,
}

// ── Documents ──

/// Insert or overwrite the entry for `url`.
pub fn upsert_document(
    conn: &Connection,
    url: &str,
    content: &str,
    screenshot: Option<&str>,
) -> Result<()> {
    let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    conn.execute(
        "INSERT INTO documents (url, content, screenshot, fetched_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(url) DO UPDATE SET
            content = excluded.content,
            screenshot = excluded.screenshot,
            fetched_at = excluded.fetched_at",
        rusqlite::params![url, content, screenshot, now],
    )?;
    debug!(url, bytes = content.len(), "cached document");
    Ok(())
}

pub fn find_document(conn: &Connection, url: &str) -> Result<Option<DocumentEntry>> {
    let entry = conn
        .query_row(
            "SELECT url, content, screenshot, fetched_at FROM documents WHERE url = ?1",
            [url],
            |row| {
                Ok(DocumentEntry {
                    url: row.get(0)?,
                    content: row.get(1)?,
                    screenshot: row.get(2)?,
                    fetched_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(entry)
}

pub fn list_documents(conn: &Connection) -> Result<Vec<DocumentEntry>> {
    let mut stmt =
        conn.prepare("SELECT url, content, screenshot, fetched_at FROM documents ORDER BY url")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(DocumentEntry {
                url: row.get(0)?,
                content: row.get(1)?,
                screenshot: row.get(2)?,
                fetched_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every cached document as a single `/documentSet.json` file.
pub fn export_documents(conn: &Connection) -> Result<ManifestFileItem> {
    let documents = list_documents(conn)?;
    let contents = serde_json::to_string(&documents)?;
    Ok(ManifestFileItem::new(DOCUMENT_SET_FILE, contents))
}
