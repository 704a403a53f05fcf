//! Embedded local log store.
//!
//! Audit records that cannot be shipped to the platform (no auth token) land
//! in a SQLite database at `<config_dir>/ithena-cli/local_logs.v1.db`. The
//! schema is versioned; batch inserts run inside a single transaction; reads
//! back the paginated, filtered queries the log-viewer API serves.
//!
//! A single connection is shared per store handle, guarded by a mutex with
//! short critical sections. All SQL uses parameter binding.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, ToSql};
use serde_json::Value;

use crate::config::CONFIG_DIR_NAME;
use crate::record::{AuditRecord, Status};

/// Bumped whenever the schema changes; forward migrations run on open.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Database file name. The schema version is part of the name so a future
/// incompatible rewrite can start from a fresh file.
pub const DB_FILE_NAME: &str = "local_logs.v1.db";

const LOGS_COLUMNS: &str = "id, timestamp, mcp_method, tool_name, duration_ms, status, \
     proxy_version, target_server_alias, request_preview, response_preview, error_details";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user configuration directory could not be determined")]
    NoConfigDir,

    #[error("failed to create database directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to delete database file '{}': {source}", path.display())]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Query types
// ─────────────────────────────────────────────────────────────────────────────

/// Filters for [`LocalStore::query_logs`]. Provided filters are ANDed.
#[derive(Debug, Clone, Default)]
pub struct LogFilters {
    /// Exact match on `status`.
    pub status: Option<String>,
    /// Exact match on `tool_name`.
    pub tool_name: Option<String>,
    /// Exact match on `mcp_method`.
    pub mcp_method: Option<String>,
    /// Substring match over `id` and the serialized JSON payload columns.
    pub search_term: Option<String>,
}

/// One page of query results.
#[derive(Debug, serde::Serialize)]
pub struct LogPage {
    pub logs: Vec<AuditRecord>,
    /// Count matching the filters, ignoring pagination.
    pub total_count: i64,
    pub page: i64,
    pub limit: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to the local log database.
pub struct LocalStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl LocalStore {
    /// Default database path under the user config directory.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let config_dir = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        Ok(config_dir.join(CONFIG_DIR_NAME).join(DB_FILE_NAME))
    }

    /// Open (or create) the store at the default path.
    pub fn open_default() -> Result<LocalStore, StoreError> {
        Self::open(&Self::default_path()?)
    }

    /// Open (or create) the store at `path`.
    ///
    /// Creates the parent directory (mode 0755 on Unix), verifies the
    /// connection with a ping, and applies the versioned schema.
    pub fn open(path: &Path) -> Result<LocalStore, StoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755));
            }
        }

        let conn = Connection::open(path)?;
        // Ping: fail now rather than on the first flush.
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;

        init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "local log store opened");

        Ok(LocalStore {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// The database file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a batch of records inside one transaction.
    ///
    /// Any row failure rolls the whole batch back. Unserializable JSON
    /// payloads are stored as the literal `null` with a warning rather than
    /// failing the row.
    pub fn save_batch(&self, records: &[AuditRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO logs (id, timestamp, mcp_method, tool_name, duration_ms, status, \
                 proxy_version, target_server_alias, request_preview, response_preview, \
                 error_details) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            for record in records {
                stmt.execute(rusqlite::params![
                    record.id,
                    record.timestamp,
                    record.mcp_method,
                    record.tool_name,
                    record.duration_ms,
                    record.status.as_str(),
                    record.proxy_version,
                    record.target_server_alias,
                    json_text(&record.id, "request_preview", record.request_preview.as_ref()),
                    json_text(&record.id, "response_preview", record.response_preview.as_ref()),
                    json_text(&record.id, "error_details", record.error_details.as_ref()),
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(count = records.len(), "saved batch of audit records");
        Ok(())
    }

    /// Paginated, filtered query ordered by `timestamp DESC`.
    ///
    /// `page` is clamped to at least 1; a non-positive `limit` falls back to
    /// 20. `total_count` reflects the filters without pagination.
    pub fn query_logs(
        &self,
        filters: &LogFilters,
        page: i64,
        limit: i64,
    ) -> Result<LogPage, StoreError> {
        let page = page.max(1);
        let limit = if limit <= 0 { 20 } else { limit };
        let offset = (page - 1) * limit;

        let mut clauses: Vec<&str> = vec!["1 = 1"];
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = &filters.status {
            clauses.push("status = ?");
            args.push(Box::new(status.clone()));
        }
        if let Some(tool_name) = &filters.tool_name {
            clauses.push("tool_name = ?");
            args.push(Box::new(tool_name.clone()));
        }
        if let Some(mcp_method) = &filters.mcp_method {
            clauses.push("mcp_method = ?");
            args.push(Box::new(mcp_method.clone()));
        }
        if let Some(term) = &filters.search_term {
            clauses.push(
                "(id LIKE ? OR request_preview LIKE ? OR response_preview LIKE ? \
                 OR error_details LIKE ?)",
            );
            let pattern = format!("%{term}%");
            for _ in 0..4 {
                args.push(Box::new(pattern.clone()));
            }
        }

        let where_clause = clauses.join(" AND ");
        let conn = self.conn();

        let total_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM logs WHERE {where_clause}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {LOGS_COLUMNS} FROM logs WHERE {where_clause} \
             ORDER BY timestamp DESC LIMIT ? OFFSET ?"
        ))?;
        let mut page_args: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
        page_args.push(&limit);
        page_args.push(&offset);

        let logs = stmt
            .query_map(rusqlite::params_from_iter(page_args), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LogPage {
            logs,
            total_count,
            page,
            limit,
        })
    }

    /// Fetch one record by id. A missing id is `Ok(None)`, not an error.
    pub fn get_log(&self, id: &str) -> Result<Option<AuditRecord>, StoreError> {
        let conn = self.conn();
        let record = conn
            .query_row(
                &format!("SELECT {LOGS_COLUMNS} FROM logs WHERE id = ?1"),
                rusqlite::params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Close the connection and delete the database file.
    ///
    /// Subsequent access goes through a fresh [`LocalStore::open`], which
    /// re-creates the schema.
    pub fn clear(self) -> Result<(), StoreError> {
        let LocalStore { conn, path } = self;
        drop(conn);
        remove_database(&path).map(|_| ())
    }
}

/// Delete the database file at `path`.
///
/// Returns `Ok(true)` when a file was removed, `Ok(false)` when none
/// existed; "not present" is success.
pub fn remove_database(path: &Path) -> Result<bool, StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────────────────────────────────────

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL PRIMARY KEY)",
        [],
    )?;

    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })?;

    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                rusqlite::params![CURRENT_SCHEMA_VERSION],
            )?;
        }
        Some(v) if v < CURRENT_SCHEMA_VERSION => {
            // Forward migrations slot in here; none exist at v1.
            tracing::debug!(from = v, to = CURRENT_SCHEMA_VERSION, "migrating schema");
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                rusqlite::params![CURRENT_SCHEMA_VERSION],
            )?;
        }
        Some(_) => {}
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS logs (
            id TEXT NOT NULL PRIMARY KEY,
            timestamp TEXT NOT NULL,
            mcp_method TEXT,
            tool_name TEXT,
            duration_ms INTEGER,
            status TEXT NOT NULL,
            proxy_version TEXT,
            target_server_alias TEXT,
            request_preview TEXT,
            response_preview TEXT,
            error_details TEXT
        )",
        [],
    )?;

    let indices = [
        "CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs (timestamp DESC)",
        "CREATE INDEX IF NOT EXISTS idx_logs_status ON logs (status)",
        "CREATE INDEX IF NOT EXISTS idx_logs_tool_name ON logs (tool_name)",
        "CREATE INDEX IF NOT EXISTS idx_logs_mcp_method ON logs (mcp_method)",
    ];
    for sql in indices {
        if let Err(e) = conn.execute(sql, []) {
            tracing::warn!(error = %e, sql, "failed to create index");
        }
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize a JSON payload column. Absent values store the literal `null`
/// so the column round-trips to `None` on read.
fn json_text(record_id: &str, field: &str, value: Option<&Value>) -> String {
    let Some(value) = value else {
        return "null".to_string();
    };
    match serde_json::to_string(value) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(record_id, field, error = %e, "failed to serialize payload, storing null");
            "null".to_string()
        }
    }
}

/// Parse a JSON payload column back; `null` and unparseable text become `None`.
fn parse_json_column(text: Option<String>) -> Option<Value> {
    let text = text?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<AuditRecord, rusqlite::Error> {
    let status_text: String = row.get(5)?;
    let status: Status = status_text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AuditRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        mcp_method: row.get(2)?,
        tool_name: row.get(3)?,
        duration_ms: row.get(4)?,
        status,
        proxy_version: row.get(6)?,
        target_server_alias: row.get(7)?,
        request_preview: parse_json_column(row.get(8)?),
        response_preview: parse_json_column(row.get(9)?),
        error_details: parse_json_column(row.get(10)?),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
