//! Atomic multi-branch transaction commit.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use wrgld_objects::{get_commit, ObjectStore, StoreError};

use crate::refs::{cas_save_ref, get_transaction_tx, rfc3339};
use crate::{head_ref, RefError, RefStore, TxStatus};

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("branch {branch} moved since commit was staged")]
    Precondition { branch: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// One branch advanced by a committed transaction.
#[derive(Debug, Clone)]
pub struct CommittedBranch {
    pub branch: String,
    pub sum: wrgld_objects::Digest,
    /// Staged commit message, prefixed with the transaction marker.
    pub message: String,
}

/// Advance every staged branch to its staged commit, all or nothing.
///
/// Preconditions, checked before any ref moves: the transaction is open, each
/// staged commit object exists, and each branch head still equals the staged
/// commit's parent. Any failure rolls the whole sqlite transaction back.
pub fn commit_transaction(
    db: &dyn ObjectStore,
    rs: &RefStore,
    id: Uuid,
) -> Result<Vec<CommittedBranch>, TxError> {
    // Read commit objects up front; object-store reads must not interleave
    // with the sqlite write transaction below.
    let staged = rs.transaction_refs(id)?;
    let mut planned = Vec::with_capacity(staged.len());
    for (branch, sum) in staged {
        let commit = get_commit(db, &sum)?;
        planned.push((branch, sum, commit));
    }

    let mut conn = rs.conn();
    let sqltx = conn.transaction()?;

    let tx = get_transaction_tx(&sqltx, id)?;
    if tx.status != TxStatus::Open {
        return Err(RefError::TxNotOpen { id, status: tx.status }.into());
    }

    let mut committed = Vec::with_capacity(planned.len());
    for (branch, sum, commit) in planned {
        let message = format!("commit [tx/{id}]\n{}", commit.message);
        cas_save_ref(
            &sqltx,
            &head_ref(&branch),
            commit.parents.first().copied(),
            sum,
            &commit.author_name,
            &commit.author_email,
            "commit",
            &message,
        )
        .map_err(|e| match e {
            RefError::CasFailed { .. } => TxError::Precondition { branch: branch.clone() },
            other => other.into(),
        })?;
        committed.push(CommittedBranch { branch, sum, message });
    }

    sqltx.execute(
        "UPDATE transactions SET status = 'committed', end_time = ?2 WHERE id = ?1",
        params![id.to_string(), rfc3339(&Utc::now())],
    )?;
    sqltx.commit()?;
    Ok(committed)
}

/// Mark a transaction discarded and drop its staged commits.
pub fn discard_transaction(rs: &RefStore, id: Uuid) -> Result<(), TxError> {
    let mut conn = rs.conn();
    let sqltx = conn.transaction()?;
    let tx = get_transaction_tx(&sqltx, id)?;
    if tx.status != TxStatus::Open {
        return Err(RefError::TxNotOpen { id, status: tx.status }.into());
    }
    sqltx.execute(
        "UPDATE transactions SET status = 'discarded', end_time = ?2 WHERE id = ?1",
        params![id.to_string(), rfc3339(&Utc::now())],
    )?;
    sqltx.execute("DELETE FROM transaction_refs WHERE tx_id = ?1", [id.to_string()])?;
    sqltx.commit()?;
    Ok(())
}
