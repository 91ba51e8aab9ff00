//! SQLite-backed cursor store.
//!
//! Cursor, upserts and tombstones for one commit are written in a single
//! SQLite transaction, so a crash leaves either the previous state or the new
//! one. Re-running a pass after a crash is absorbed by the upsert.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use tallyfeed_common::{
    CanonicalTransaction, Delta, Error, ItemId, Result, SyncCursor, TransactionId,
};

use crate::store::CursorStore;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_cursors (
        item_id TEXT PRIMARY KEY,
        cursor TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS transactions (
        transaction_id TEXT PRIMARY KEY,
        item_id TEXT NOT NULL,
        account_id TEXT NOT NULL,
        amount REAL NOT NULL,
        currency_code TEXT NOT NULL,
        posted_date TEXT NOT NULL,
        pending INTEGER NOT NULL,
        name TEXT NOT NULL,
        merchant_name TEXT,
        pfc_primary TEXT,
        record TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS removed_transactions (
        transaction_id TEXT PRIMARY KEY,
        item_id TEXT NOT NULL,
        removed_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_transactions_item
        ON transactions(item_id, posted_date);
"#;

fn db(err: rusqlite::Error) -> Error {
    Error::Storage(format!("SQLite error: {}", err))
}

/// Cursor store persisted in a SQLite database.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db)?;
        Self::init(conn)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db)?;
        info!("Cursor store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Storage("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Storage(format!("Blocking task failed: {}", e)))?
    }
}

fn upsert_transaction(
    tx: &rusqlite::Transaction<'_>,
    item: &ItemId,
    record: &CanonicalTransaction,
    now: &str,
) -> Result<bool> {
    let tombstoned = tx
        .query_row(
            "SELECT 1 FROM removed_transactions WHERE transaction_id = ?1",
            [record.transaction_id.as_str()],
            |_| Ok(()),
        )
        .optional()
        .map_err(db)?
        .is_some();
    if tombstoned {
        debug!("Skipping tombstoned transaction {}", record.transaction_id);
        return Ok(false);
    }

    let json = serde_json::to_string(record)?;
    tx.execute(
        r#"
        INSERT INTO transactions
        (transaction_id, item_id, account_id, amount, currency_code, posted_date,
         pending, name, merchant_name, pfc_primary, record, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(transaction_id) DO UPDATE SET
            item_id = excluded.item_id,
            account_id = excluded.account_id,
            amount = excluded.amount,
            currency_code = excluded.currency_code,
            posted_date = excluded.posted_date,
            pending = excluded.pending,
            name = excluded.name,
            merchant_name = excluded.merchant_name,
            pfc_primary = excluded.pfc_primary,
            record = excluded.record,
            updated_at = excluded.updated_at
        "#,
        params![
            record.transaction_id.as_str(),
            item.as_str(),
            record.account_id,
            record.amount,
            record.currency_code,
            record.posted_date.to_string(),
            record.pending as i32,
            record.name,
            record.merchant_name,
            record
                .personal_finance_category
                .as_ref()
                .map(|pfc| pfc.primary.clone()),
            json,
            now,
        ],
    )
    .map_err(db)?;
    Ok(true)
}

fn remove_transaction(
    tx: &rusqlite::Transaction<'_>,
    item: &ItemId,
    id: &TransactionId,
    now: &str,
) -> Result<()> {
    tx.execute(
        "DELETE FROM transactions WHERE transaction_id = ?1",
        [id.as_str()],
    )
    .map_err(db)?;
    tx.execute(
        r#"
        INSERT OR IGNORE INTO removed_transactions (transaction_id, item_id, removed_at)
        VALUES (?1, ?2, ?3)
        "#,
        params![id.as_str(), item.as_str(), now],
    )
    .map_err(db)?;
    Ok(())
}

fn write_cursor(conn: &Connection, item: &ItemId, cursor: &SyncCursor, now: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sync_cursors (item_id, cursor, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(item_id) DO UPDATE SET
            cursor = excluded.cursor,
            updated_at = excluded.updated_at
        "#,
        params![item.as_str(), cursor.as_str(), now],
    )
    .map_err(db)?;
    Ok(())
}

#[async_trait]
impl CursorStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, item: &ItemId) -> Result<SyncCursor> {
        let item = item.clone();
        self.with_conn(move |conn| {
            let cursor: Option<String> = conn
                .query_row(
                    "SELECT cursor FROM sync_cursors WHERE item_id = ?1",
                    [item.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db)?;
            Ok(cursor.map(SyncCursor::new).unwrap_or_default())
        })
        .await
    }

    async fn commit_delta_and_cursor(
        &self,
        item: &ItemId,
        delta: &Delta,
        cursor: &SyncCursor,
    ) -> Result<()> {
        let item = item.clone();
        let delta = delta.clone();
        let cursor = cursor.clone();

        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction().map_err(db)?;

            let mut upserted = 0;
            for record in delta.upserts() {
                if upsert_transaction(&tx, &item, record, &now)? {
                    upserted += 1;
                }
            }
            for id in &delta.removed {
                remove_transaction(&tx, &item, id, &now)?;
            }
            write_cursor(&tx, &item, &cursor, &now)?;

            tx.commit().map_err(db)?;
            debug!(
                "Committed {} upserts and {} removals for {} at {}",
                upserted,
                delta.removed.len(),
                item,
                cursor
            );
            Ok(())
        })
        .await
    }

    async fn reset(&self, item: &ItemId) -> Result<()> {
        let item = item.clone();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            write_cursor(conn, &item, &SyncCursor::beginning(), &now)?;
            info!("Cursor reset for {}", item);
            Ok(())
        })
        .await
    }

    async fn transactions(&self, item: &ItemId) -> Result<Vec<CanonicalTransaction>> {
        let item = item.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT record FROM transactions
                    WHERE item_id = ?1
                    ORDER BY posted_date, transaction_id
                    "#,
                )
                .map_err(db)?;

            let rows = stmt
                .query_map([item.as_str()], |row| row.get::<_, String>(0))
                .map_err(db)?;

            let mut transactions = Vec::new();
            for row in rows {
                let json = row.map_err(db)?;
                transactions.push(serde_json::from_str(&json)?);
            }
            Ok(transactions)
        })
        .await
    }
}
