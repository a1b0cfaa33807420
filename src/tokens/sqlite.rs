//! SQLite-backed token store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  The async trait method is a thin wrapper
//! around a synchronous query executed under a `Mutex`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{hash_token, TokenRecord, TokenStore};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Token store backed by a single SQLite database file.
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create tables if missing. Safe to call on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_tokens (
                token_hash  TEXT PRIMARY KEY,
                label       TEXT NOT NULL DEFAULT '',
                active      INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL
            );
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, chrono_now()],
            )?;
        }

        Ok(())
    }

    /// Persist `token` (hashed). Re-inserting an existing token reactivates it.
    pub fn insert_token(&self, token: &str, label: &str) -> anyhow::Result<TokenRecord> {
        let record = TokenRecord {
            token_hash: hash_token(token),
            label: label.to_string(),
            active: true,
            created_at: chrono_now(),
        };
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO api_tokens (token_hash, label, active, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![record.token_hash, record.label, record.created_at],
        )?;
        Ok(record)
    }

    /// Deactivate a token by its digest or digest prefix.  Returns the
    /// number of rows revoked.
    pub fn revoke(&self, hash_prefix: &str) -> anyhow::Result<usize> {
        if hash_prefix.is_empty() || !hash_prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("hash prefix must be non-empty hex: {:?}", hash_prefix);
        }
        let conn = self.conn.lock().expect("mutex poisoned");
        let changed = conn.execute(
            "UPDATE api_tokens SET active = 0 WHERE token_hash LIKE ?1 || '%' AND active = 1",
            params![hash_prefix],
        )?;
        Ok(changed)
    }

    /// Deactivate `token`.  Returns `false` if it was not active.
    pub fn revoke_token(&self, token: &str) -> anyhow::Result<bool> {
        Ok(self.revoke(&hash_token(token))? > 0)
    }

    /// All token rows, newest first.
    pub fn list_tokens(&self) -> anyhow::Result<Vec<TokenRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT token_hash, label, active, created_at
             FROM api_tokens ORDER BY created_at DESC, token_hash",
        )?;
        let rows = stmt.query_map([], |row| {
            let active: i32 = row.get(2)?;
            Ok(TokenRecord {
                token_hash: row.get(0)?,
                label: row.get(1)?,
                active: active != 0,
                created_at: row.get(3)?,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn lookup(&self, token: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let found: Option<i32> = conn
            .query_row(
                "SELECT 1 FROM api_tokens WHERE token_hash = ?1 AND active = 1",
                params![hash_token(token)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl TokenStore for SqliteTokenStore {
    fn verify(&self, token: &str) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move { self.lookup(&token) })
    }
}

fn chrono_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
