//! Persistence for the wrgld daemon: a filesystem-backed object store and a
//! sqlite-backed ref store (refs, reflogs, transactions).

mod fs;
mod prune;
mod refs;
mod transaction;

pub use fs::FsObjectStore;
pub use prune::{expire_transactions, prune_objects};
pub use refs::{RefError, RefStore, ReflogEntry, Transaction, TxStatus};
pub use transaction::{commit_transaction, discard_transaction, CommittedBranch, TxError};

/// Refs under this prefix are branch heads.
pub const HEADS_PREFIX: &str = "heads/";

/// Full ref name of a branch, e.g. `heads/main`.
pub fn head_ref(branch: &str) -> String {
    format!("{HEADS_PREFIX}{branch}")
}
