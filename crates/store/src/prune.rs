//! Garbage collection: transaction expiry followed by an unreferenced-object
//! sweep. Roots are ref values, reflog entries, and staged commits of the
//! transactions that survive expiry.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;

use wrgld_objects::{get_commit, get_table, Digest, ObjectKind, ObjectStore};

use crate::{RefError, RefStore, TxError};

/// Delete transactions older than `ttl`, staged commits included. Runs before
/// the prune so expired staging stops pinning objects.
pub fn expire_transactions(rs: &RefStore, ttl: Duration) -> Result<usize, RefError> {
    let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
    let conn = rs.conn();
    let cutoff = cutoff.to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    conn.execute(
        "DELETE FROM transaction_refs WHERE tx_id IN (SELECT id FROM transactions WHERE begin_time < ?1)",
        [&cutoff],
    )?;
    let n = conn.execute("DELETE FROM transactions WHERE begin_time < ?1", [&cutoff])?;
    Ok(n)
}

/// Remove every object not reachable from a root. Returns the number of
/// objects deleted.
pub fn prune_objects(db: &dyn ObjectStore, rs: &RefStore) -> Result<usize, TxError> {
    let mut roots: Vec<Digest> = rs.list_refs(None)?.into_iter().map(|(_, sum)| sum).collect();
    roots.extend(rs.reflog_sums()?);
    roots.extend(rs.all_staged_sums()?);

    // Walk the commit DAG from the roots, collecting the full object closure.
    let mut live_commits: HashSet<Digest> = HashSet::new();
    let mut live_tables: HashSet<Digest> = HashSet::new();
    let mut live_blocks: HashSet<Digest> = HashSet::new();
    let mut queue: Vec<Digest> = roots;
    while let Some(sum) = queue.pop() {
        if live_commits.contains(&sum) || !db.contains(ObjectKind::Commit, &sum) {
            continue;
        }
        live_commits.insert(sum);
        let commit = get_commit(db, &sum)?;
        queue.extend(commit.parents.iter().copied());
        if live_tables.insert(commit.table) && db.contains(ObjectKind::Table, &commit.table) {
            let table = get_table(db, &commit.table)?;
            live_blocks.extend(table.blocks.iter().map(|b| b.sum));
        }
    }

    let mut removed = 0;
    for sum in db.list(ObjectKind::Commit)? {
        if !live_commits.contains(&sum) {
            db.delete(ObjectKind::Commit, &sum)?;
            removed += 1;
        }
    }
    for sum in db.list(ObjectKind::Table)? {
        if !live_tables.contains(&sum) {
            db.delete(ObjectKind::Table, &sum)?;
            removed += 1;
        }
    }
    // Profiles share their table's digest.
    for sum in db.list(ObjectKind::Profile)? {
        if !live_tables.contains(&sum) {
            db.delete(ObjectKind::Profile, &sum)?;
            removed += 1;
        }
    }
    for sum in db.list(ObjectKind::Block)? {
        if !live_blocks.contains(&sum) {
            db.delete(ObjectKind::Block, &sum)?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!(removed, "pruned unreferenced objects");
    }
    Ok(removed)
}
