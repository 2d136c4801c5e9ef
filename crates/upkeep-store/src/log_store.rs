use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use upkeep_core::{
    sanitize_actor, sanitize_batch_context, sanitize_initiation, sanitize_kind,
    sanitize_retention_days, sanitize_status, sanitize_action, LogEntry, LogFilter, NewLogEntry,
    PageRequest, SortOrder,
};

pub const LOG_TABLE: &str = "update_logs";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS update_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id INTEGER NOT NULL DEFAULT 1,
    kind TEXT NOT NULL,
    action TEXT NOT NULL,
    item_name TEXT NOT NULL DEFAULT '',
    item_slug TEXT NOT NULL DEFAULT '',
    version_before TEXT NOT NULL DEFAULT '',
    version_after TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    trace TEXT NOT NULL DEFAULT '',
    actor_kind TEXT NOT NULL DEFAULT 'system',
    initiation_mode TEXT NOT NULL DEFAULT 'manual',
    batch_context TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_update_logs_tenant ON update_logs(tenant_id);
CREATE INDEX IF NOT EXISTS idx_update_logs_kind ON update_logs(kind);
CREATE INDEX IF NOT EXISTS idx_update_logs_status ON update_logs(status);
CREATE INDEX IF NOT EXISTS idx_update_logs_created_at ON update_logs(created_at);
"#;

const SELECT_COLUMNS: &str = "id, tenant_id, kind, action, item_name, item_slug, version_before, version_after, status, message, trace, actor_kind, initiation_mode, batch_context, created_at";

/// Append-only table of update log rows.
///
/// Until [`LogStore::install_schema`] has run, every operation behaves as if
/// the table were empty: reads return nothing, writes report nothing written.
pub struct LogStore {
    conn: Connection,
}

impl LogStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open log database: {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory log database")?;
        Ok(Self { conn })
    }

    pub fn install_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("failed to create update log schema")
    }

    pub fn table_exists(&self) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![LOG_TABLE],
                |_| Ok(()),
            )
            .optional()
            .context("failed to inspect log database schema")?;
        Ok(found.is_some())
    }

    /// Returns the new row id, or `None` when the table is not provisioned.
    pub fn insert(&self, entry: &NewLogEntry) -> Result<Option<i64>> {
        self.insert_at(entry, Utc::now())
    }

    pub(crate) fn insert_at(&self, entry: &NewLogEntry, at: DateTime<Utc>) -> Result<Option<i64>> {
        if !self.table_exists()? {
            return Ok(None);
        }

        let fields = entry.fields();
        self.conn
            .execute(
                "INSERT INTO update_logs (tenant_id, kind, action, item_name, item_slug, version_before, version_after, status, message, trace, actor_kind, initiation_mode, batch_context, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    fields.tenant_id,
                    fields.kind.as_str(),
                    fields.action.as_str(),
                    fields.item_name,
                    fields.item_slug,
                    fields.version_before,
                    fields.version_after,
                    fields.status.as_str(),
                    fields.message,
                    fields.trace,
                    fields.actor_kind.as_str(),
                    fields.initiation_mode.as_str(),
                    fields.batch_context.as_str(),
                    at.format(TIMESTAMP_FORMAT).to_string(),
                ],
            )
            .with_context(|| {
                format!(
                    "failed to insert {} log row for '{}'",
                    fields.kind.as_str(),
                    fields.item_slug
                )
            })?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    pub fn query(&self, filter: &LogFilter, page: &PageRequest) -> Result<Vec<LogEntry>> {
        let (clause, mut values) = where_clause(filter);
        values.push(Value::Integer(i64::from(page.per_page)));
        values.push(Value::Integer(
            i64::try_from(page.offset()).unwrap_or(i64::MAX),
        ));
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM update_logs{clause} ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page.order)
        );
        self.select(&sql, values)
    }

    /// Every matching row, unpaginated.
    pub fn query_all(&self, filter: &LogFilter, order: SortOrder) -> Result<Vec<LogEntry>> {
        let (clause, values) = where_clause(filter);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM update_logs{clause} ORDER BY {}",
            order_clause(order)
        );
        self.select(&sql, values)
    }

    pub fn count(&self, filter: &LogFilter) -> Result<u64> {
        if !self.table_exists()? {
            return Ok(0);
        }

        let (clause, values) = where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM update_logs{clause}");
        let total: i64 = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))
            .context("failed to count update log rows")?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    pub fn get(&self, id: i64) -> Result<Option<LogEntry>> {
        if !self.table_exists()? {
            return Ok(None);
        }

        let sql = format!("SELECT {SELECT_COLUMNS} FROM update_logs WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id], entry_from_row)
            .optional()
            .with_context(|| format!("failed to read update log row {id}"))
    }

    pub fn delete_by_id(&self, id: i64) -> Result<bool> {
        if !self.table_exists()? {
            return Ok(false);
        }

        let deleted = self
            .conn
            .execute("DELETE FROM update_logs WHERE id = ?1", params![id])
            .with_context(|| format!("failed to delete update log row {id}"))?;
        Ok(deleted > 0)
    }

    /// Irreversibly removes rows older than `days` (clamped to at least one day).
    pub fn delete_older_than(&self, days: i64) -> Result<usize> {
        self.delete_older_than_at(days, Utc::now())
    }

    pub(crate) fn delete_older_than_at(&self, days: i64, now: DateTime<Utc>) -> Result<usize> {
        if !self.table_exists()? {
            return Ok(0);
        }

        let days = sanitize_retention_days(days);
        let cutoff = now - Duration::days(days);
        self.conn
            .execute(
                "DELETE FROM update_logs WHERE created_at < ?1",
                params![cutoff.format(TIMESTAMP_FORMAT).to_string()],
            )
            .with_context(|| format!("failed to delete update log rows older than {days} days"))
    }

    fn select(&self, sql: &str, values: Vec<Value>) -> Result<Vec<LogEntry>> {
        if !self.table_exists()? {
            return Ok(Vec::new());
        }

        let mut statement = self
            .conn
            .prepare(sql)
            .context("failed to prepare update log query")?;
        let rows = statement
            .query_map(params_from_iter(values), entry_from_row)
            .context("failed to query update log rows")?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.context("failed to decode update log row")?);
        }
        Ok(entries)
    }
}

fn where_clause(filter: &LogFilter) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(tenant_id) = filter.tenant_id {
        conditions.push("tenant_id = ?");
        values.push(Value::Integer(tenant_id));
    }
    if let Some(kind) = filter.kind {
        conditions.push("kind = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        conditions.push("status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }

    if conditions.is_empty() {
        return (String::new(), values);
    }
    (format!(" WHERE {}", conditions.join(" AND ")), values)
}

fn order_clause(order: SortOrder) -> &'static str {
    match order {
        SortOrder::NewestFirst => "created_at DESC, id DESC",
        SortOrder::OldestFirst => "created_at ASC, id ASC",
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        kind: sanitize_kind(&row.get::<_, String>(2)?),
        action: sanitize_action(&row.get::<_, String>(3)?),
        item_name: row.get(4)?,
        item_slug: row.get(5)?,
        version_before: row.get(6)?,
        version_after: row.get(7)?,
        status: sanitize_status(&row.get::<_, String>(8)?),
        message: row.get(9)?,
        trace: row.get(10)?,
        actor_kind: sanitize_actor(&row.get::<_, String>(11)?),
        initiation_mode: sanitize_initiation(&row.get::<_, String>(12)?),
        batch_context: sanitize_batch_context(&row.get::<_, String>(13)?),
        created_at: row.get(14)?,
    })
}
