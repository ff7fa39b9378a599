use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use wrgld_objects::Digest;

#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("ref {0} not found")]
    NotFound(String),
    #[error("ref {name} changed concurrently")]
    CasFailed { name: String },
    #[error("transaction {0} not found")]
    TxNotFound(Uuid),
    #[error("transaction {0} already exists")]
    DuplicateTx(Uuid),
    #[error("transaction {id} is {status}, expected open")]
    TxNotOpen { id: Uuid, status: TxStatus },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Open,
    Committed,
    Discarded,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Open => "open",
            TxStatus::Committed => "committed",
            TxStatus::Discarded => "discarded",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TxStatus::Open),
            "committed" => Some(TxStatus::Committed),
            "discarded" => Some(TxStatus::Discarded),
            _ => None,
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub begin: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: TxStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflogEntry {
    pub old_sum: Option<Digest>,
    pub new_sum: Digest,
    pub author_name: String,
    pub author_email: String,
    pub action: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// Ref store: named refs, an append-only reflog per ref, and the transaction
/// index. A single sqlite connection behind a mutex; WAL mode keeps
/// concurrent readers cheap.
#[derive(Clone)]
pub struct RefStore {
    conn: Arc<Mutex<Connection>>,
}

impl RefStore {
    pub fn open(path: &Path) -> Result<Self, RefError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, RefError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RefError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS refs (
                name TEXT PRIMARY KEY,
                sum TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reflog (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ref_name TEXT NOT NULL,
                old_sum TEXT,
                new_sum TEXT NOT NULL,
                author_name TEXT NOT NULL,
                author_email TEXT NOT NULL,
                action TEXT NOT NULL,
                message TEXT NOT NULL,
                time TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS reflog_ref ON reflog (ref_name, id);
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                begin_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transaction_refs (
                tx_id TEXT NOT NULL REFERENCES transactions (id) ON DELETE CASCADE,
                branch TEXT NOT NULL,
                sum TEXT NOT NULL,
                PRIMARY KEY (tx_id, branch)
            );",
        )?;
        Ok(RefStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("ref store mutex poisoned")
    }

    // ── Refs ────────────────────────────────────────────────────────────────

    pub fn get_ref(&self, name: &str) -> Result<Option<Digest>, RefError> {
        let conn = self.conn();
        get_ref_tx(&conn, name)
    }

    pub fn get_head(&self, branch: &str) -> Result<Option<Digest>, RefError> {
        self.get_ref(&crate::head_ref(branch))
    }

    /// All refs, optionally filtered by name prefix, in name order.
    pub fn list_refs(&self, prefix: Option<&str>) -> Result<Vec<(String, Digest)>, RefError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT name, sum FROM refs WHERE name LIKE ?1 ORDER BY name")?;
        let like = format!("{}%", prefix.unwrap_or(""));
        let rows = stmt.query_map([&like], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (name, sum) = row?;
            if let Ok(sum) = sum.parse() {
                out.push((name, sum));
            }
        }
        Ok(out)
    }

    /// Compare-and-set ref update with reflog append. `old_sum` is the value
    /// the caller observed; `None` asserts the ref must not exist yet.
    #[allow(clippy::too_many_arguments)]
    pub fn save_ref(
        &self,
        name: &str,
        old_sum: Option<Digest>,
        new_sum: Digest,
        author_name: &str,
        author_email: &str,
        action: &str,
        message: &str,
    ) -> Result<(), RefError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        cas_save_ref(&tx, name, old_sum, new_sum, author_name, author_email, action, message)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a ref and its reflog. No-op when absent.
    pub fn delete_ref(&self, name: &str) -> Result<(), RefError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM refs WHERE name = ?1", [name])?;
        tx.execute("DELETE FROM reflog WHERE ref_name = ?1", [name])?;
        tx.commit()?;
        Ok(())
    }

    /// Reflog entries, most recent first.
    pub fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>, RefError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT old_sum, new_sum, author_name, author_email, action, message, time
             FROM reflog WHERE ref_name = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([name], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (old, new, author_name, author_email, action, message, time) = row?;
            out.push(ReflogEntry {
                old_sum: old.and_then(|s| s.parse().ok()),
                new_sum: new.parse().map_err(|_| RefError::NotFound(name.into()))?,
                author_name,
                author_email,
                action,
                message,
                time: DateTime::parse_from_rfc3339(&time)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
            });
        }
        Ok(out)
    }

    /// Every digest recorded anywhere in the reflog. GC roots.
    pub fn reflog_sums(&self) -> Result<Vec<Digest>, RefError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT old_sum, new_sum FROM reflog")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (old, new) = row?;
            if let Some(sum) = old.and_then(|s| s.parse().ok()) {
                out.push(sum);
            }
            if let Ok(sum) = new.parse() {
                out.push(sum);
            }
        }
        Ok(out)
    }

    // ── Transactions ────────────────────────────────────────────────────────

    /// Create a transaction. `id` and the imported fields are optional so a
    /// peer can restore a transaction wholesale.
    pub fn create_transaction(
        &self,
        id: Option<Uuid>,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        status: Option<TxStatus>,
    ) -> Result<Uuid, RefError> {
        let id = id.unwrap_or_else(Uuid::new_v4);
        let begin = begin.unwrap_or_else(Utc::now);
        let status = status.unwrap_or(TxStatus::Open);
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO transactions (id, begin_time, end_time, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                rfc3339(&begin),
                end.map(|t| rfc3339(&t)),
                status.as_str()
            ],
        )?;
        if inserted == 0 {
            return Err(RefError::DuplicateTx(id));
        }
        Ok(id)
    }

    pub fn get_transaction(&self, id: Uuid) -> Result<Transaction, RefError> {
        let conn = self.conn();
        get_transaction_tx(&conn, id)
    }

    /// Stage `branch → sum` under an open transaction.
    pub fn save_transaction_ref(&self, id: Uuid, branch: &str, sum: Digest) -> Result<(), RefError> {
        let conn = self.conn();
        let tx = get_transaction_tx(&conn, id)?;
        if tx.status != TxStatus::Open {
            return Err(RefError::TxNotOpen { id, status: tx.status });
        }
        conn.execute(
            "INSERT INTO transaction_refs (tx_id, branch, sum) VALUES (?1, ?2, ?3)
             ON CONFLICT (tx_id, branch) DO UPDATE SET sum = excluded.sum",
            params![id.to_string(), branch, sum.to_string()],
        )?;
        Ok(())
    }

    /// Staged `(branch, sum)` pairs in branch order.
    pub fn transaction_refs(&self, id: Uuid) -> Result<Vec<(String, Digest)>, RefError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT branch, sum FROM transaction_refs WHERE tx_id = ?1 ORDER BY branch",
        )?;
        let rows = stmt.query_map([id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (branch, sum) = row?;
            if let Ok(sum) = sum.parse() {
                out.push((branch, sum));
            }
        }
        Ok(out)
    }

    /// Staged sums across all transactions. GC roots.
    pub fn all_staged_sums(&self) -> Result<Vec<Digest>, RefError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT sum FROM transaction_refs")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            if let Ok(sum) = row?.parse() {
                out.push(sum);
            }
        }
        Ok(out)
    }
}

pub(crate) fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn get_ref_tx(conn: &Connection, name: &str) -> Result<Option<Digest>, RefError> {
    let sum: Option<String> = conn
        .query_row("SELECT sum FROM refs WHERE name = ?1", [name], |row| row.get(0))
        .optional()?;
    Ok(sum.and_then(|s| s.parse().ok()))
}

pub(crate) fn get_transaction_tx(conn: &Connection, id: Uuid) -> Result<Transaction, RefError> {
    let row = conn
        .query_row(
            "SELECT begin_time, end_time, status FROM transactions WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let (begin, end, status) = row.ok_or(RefError::TxNotFound(id))?;
    Ok(Transaction {
        id,
        begin: DateTime::parse_from_rfc3339(&begin)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
        end: end
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
        status: TxStatus::from_str(&status).unwrap_or(TxStatus::Open),
    })
}

/// CAS ref write inside an open sqlite transaction; shared with the atomic
/// multi-branch transaction commit.
#[allow(clippy::too_many_arguments)]
pub(crate) fn cas_save_ref(
    conn: &Connection,
    name: &str,
    old_sum: Option<Digest>,
    new_sum: Digest,
    author_name: &str,
    author_email: &str,
    action: &str,
    message: &str,
) -> Result<(), RefError> {
    let current = get_ref_tx(conn, name)?;
    if current != old_sum {
        return Err(RefError::CasFailed { name: name.into() });
    }
    conn.execute(
        "INSERT INTO refs (name, sum) VALUES (?1, ?2)
         ON CONFLICT (name) DO UPDATE SET sum = excluded.sum",
        params![name, new_sum.to_string()],
    )?;
    conn.execute(
        "INSERT INTO reflog (ref_name, old_sum, new_sum, author_name, author_email, action, message, time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            name,
            old_sum.map(|s| s.to_string()),
            new_sum.to_string(),
            author_name,
            author_email,
            action,
            message,
            rfc3339(&Utc::now())
        ],
    )?;
    Ok(())
}
