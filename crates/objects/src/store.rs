use std::collections::HashMap;
use std::sync::RwLock;

use crate::{Commit, Digest, Table, TableProfile};

/// Object kinds stored in an [`ObjectStore`] and framed in packfiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Table,
    Block,
    Profile,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Commit,
        ObjectKind::Table,
        ObjectKind::Block,
        ObjectKind::Profile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => "commit",
            ObjectKind::Table => "table",
            ObjectKind::Block => "block",
            ObjectKind::Profile => "profile",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "commit" => Some(ObjectKind::Commit),
            "table" => Some(ObjectKind::Table),
            "block" => Some(ObjectKind::Block),
            "profile" => Some(ObjectKind::Profile),
            _ => None,
        }
    }

    /// Wire tag used in packfile frames. Zero is the end-of-pack marker.
    pub fn tag(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Table => 2,
            ObjectKind::Block => 3,
            ObjectKind::Profile => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ObjectKind::Commit),
            2 => Some(ObjectKind::Table),
            3 => Some(ObjectKind::Block),
            4 => Some(ObjectKind::Profile),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {sum} not found")]
    NotFound { kind: &'static str, sum: Digest },
    #[error("corrupt {kind} {sum}: {reason}")]
    Corrupt {
        kind: &'static str,
        sum: Digest,
        reason: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(kind: ObjectKind, sum: Digest) -> Self {
        StoreError::NotFound { kind: kind.as_str(), sum }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Content-addressed storage the daemon consumes. Implementations must be
/// safe for concurrent use; `contains` is expected to be O(1).
pub trait ObjectStore: Send + Sync {
    /// Store a payload under its content digest. Idempotent.
    fn put(&self, kind: ObjectKind, payload: &[u8]) -> Result<Digest, StoreError>;

    /// Store a payload under an explicit key. Used for table profiles, which
    /// are addressed by the digest of the table they describe.
    fn put_keyed(&self, kind: ObjectKind, sum: &Digest, payload: &[u8]) -> Result<(), StoreError>;

    fn get(&self, kind: ObjectKind, sum: &Digest) -> Result<Vec<u8>, StoreError>;

    fn contains(&self, kind: ObjectKind, sum: &Digest) -> bool;

    fn delete(&self, kind: ObjectKind, sum: &Digest) -> Result<(), StoreError>;

    fn list(&self, kind: ObjectKind) -> Result<Vec<Digest>, StoreError>;
}

// ── Typed accessors ─────────────────────────────────────────────────────────

pub fn save_commit(db: &dyn ObjectStore, commit: &Commit) -> Result<Digest, StoreError> {
    db.put(ObjectKind::Commit, &commit.encode())
}

pub fn get_commit(db: &dyn ObjectStore, sum: &Digest) -> Result<Commit, StoreError> {
    let payload = db.get(ObjectKind::Commit, sum)?;
    Commit::decode(&payload).map_err(|e| StoreError::Corrupt {
        kind: "commit",
        sum: *sum,
        reason: e.to_string(),
    })
}

pub fn save_table(db: &dyn ObjectStore, table: &Table) -> Result<Digest, StoreError> {
    db.put(ObjectKind::Table, &table.encode())
}

pub fn get_table(db: &dyn ObjectStore, sum: &Digest) -> Result<Table, StoreError> {
    let payload = db.get(ObjectKind::Table, sum)?;
    Table::decode(&payload).map_err(|e| StoreError::Corrupt {
        kind: "table",
        sum: *sum,
        reason: e.to_string(),
    })
}

pub fn save_block(db: &dyn ObjectStore, payload: &[u8]) -> Result<Digest, StoreError> {
    db.put(ObjectKind::Block, payload)
}

pub fn get_block(db: &dyn ObjectStore, sum: &Digest) -> Result<Vec<u8>, StoreError> {
    db.get(ObjectKind::Block, sum)
}

pub fn save_table_profile(
    db: &dyn ObjectStore,
    table_sum: &Digest,
    profile: &TableProfile,
) -> Result<(), StoreError> {
    db.put_keyed(ObjectKind::Profile, table_sum, &profile.encode())
}

pub fn get_table_profile(db: &dyn ObjectStore, table_sum: &Digest) -> Result<TableProfile, StoreError> {
    let payload = db.get(ObjectKind::Profile, table_sum)?;
    TableProfile::decode(&payload).map_err(|e| StoreError::Corrupt {
        kind: "profile",
        sum: *table_sum,
        reason: e.to_string(),
    })
}

pub fn delete_object(db: &dyn ObjectStore, kind: ObjectKind, sum: &Digest) -> Result<(), StoreError> {
    db.delete(kind, sum)
}

// ── In-memory store ─────────────────────────────────────────────────────────

/// HashMap-backed store for tests and ephemeral tooling.
#[derive(Default)]
pub struct MemoryStore {
    maps: RwLock<HashMap<(ObjectKind, Digest), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, kind: ObjectKind, payload: &[u8]) -> Result<Digest, StoreError> {
        let sum = Digest::of(payload);
        self.maps
            .write()
            .unwrap()
            .insert((kind, sum), payload.to_vec());
        Ok(sum)
    }

    fn put_keyed(&self, kind: ObjectKind, sum: &Digest, payload: &[u8]) -> Result<(), StoreError> {
        self.maps
            .write()
            .unwrap()
            .insert((kind, *sum), payload.to_vec());
        Ok(())
    }

    fn get(&self, kind: ObjectKind, sum: &Digest) -> Result<Vec<u8>, StoreError> {
        self.maps
            .read()
            .unwrap()
            .get(&(kind, *sum))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, *sum))
    }

    fn contains(&self, kind: ObjectKind, sum: &Digest) -> bool {
        self.maps.read().unwrap().contains_key(&(kind, *sum))
    }

    fn delete(&self, kind: ObjectKind, sum: &Digest) -> Result<(), StoreError> {
        self.maps.write().unwrap().remove(&(kind, *sum));
        Ok(())
    }

    fn list(&self, kind: ObjectKind) -> Result<Vec<Digest>, StoreError> {
        Ok(self
            .maps
            .read()
            .unwrap()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, s)| *s)
            .collect())
    }
}
