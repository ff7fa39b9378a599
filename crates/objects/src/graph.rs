//! Commit-DAG traversal. The DAG is acyclic by construction (content
//! addressing), so plain BFS with a visited set suffices.

use std::collections::{HashSet, VecDeque};

use crate::{get_commit, Digest, ObjectKind, ObjectStore, StoreError};

/// Commits reachable from `starts` by following parent edges.
///
/// `depth` bounds the walk: `Some(1)` returns only the start commits. Start
/// digests missing from the store surface as `NotFound`; missing parents
/// deeper in the graph end the walk along that edge (shallow history).
pub fn reachable_commits(
    db: &dyn ObjectStore,
    starts: &[Digest],
    depth: Option<u32>,
) -> Result<HashSet<Digest>, StoreError> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    for s in starts {
        let commit = get_commit(db, s)?;
        if seen.insert(*s) {
            queue.push_back((commit, 1u32));
        }
    }
    while let Some((commit, d)) = queue.pop_front() {
        if let Some(limit) = depth {
            if d >= limit {
                continue;
            }
        }
        for p in &commit.parents {
            if seen.contains(p) || !db.contains(ObjectKind::Commit, p) {
                continue;
            }
            seen.insert(*p);
            queue.push_back((get_commit(db, p)?, d + 1));
        }
    }
    Ok(seen)
}

/// Like [`reachable_commits`] but tolerant of unknown start digests, as
/// negotiation `haves` may reference commits this repository has never seen.
pub fn reachable_known_commits(
    db: &dyn ObjectStore,
    starts: &[Digest],
) -> Result<HashSet<Digest>, StoreError> {
    let known: Vec<Digest> = starts
        .iter()
        .filter(|s| db.contains(ObjectKind::Commit, s))
        .copied()
        .collect();
    reachable_commits(db, &known, None)
}

/// True when `ancestor` is reachable from `descendant` (inclusive).
pub fn is_ancestor_of(
    db: &dyn ObjectStore,
    ancestor: &Digest,
    descendant: &Digest,
) -> Result<bool, StoreError> {
    Ok(reachable_commits(db, &[*descendant], None)?.contains(ancestor))
}

/// Objects to stream for a fetch: everything transitively reachable from
/// `wants` but not from `common`, ordered commits-first so a receiver can
/// resolve dependencies lazily. Tables and blocks shared with a common
/// commit are excluded along with it.
pub fn pack_objects(
    db: &dyn ObjectStore,
    wants: &[Digest],
    common: &HashSet<Digest>,
    depth: Option<u32>,
) -> Result<Vec<(ObjectKind, Digest)>, StoreError> {
    let mut common_tables = HashSet::new();
    for c in common {
        if let Ok(commit) = get_commit(db, c) {
            common_tables.insert(commit.table);
        }
    }

    let mut out = Vec::new();
    let mut sent_tables = HashSet::new();
    let mut commits: Vec<Digest> = reachable_commits(db, wants, depth)?
        .difference(common)
        .copied()
        .collect();
    // Deterministic pack layout regardless of hash-set iteration order.
    commits.sort();
    for sum in commits {
        out.push((ObjectKind::Commit, sum));
        let commit = get_commit(db, &sum)?;
        if common_tables.contains(&commit.table) || !sent_tables.insert(commit.table) {
            continue;
        }
        if !db.contains(ObjectKind::Table, &commit.table) {
            continue;
        }
        out.push((ObjectKind::Table, commit.table));
        let table = crate::get_table(db, &commit.table)?;
        for b in &table.blocks {
            out.push((ObjectKind::Block, b.sum));
        }
        if db.contains(ObjectKind::Profile, &commit.table) {
            out.push((ObjectKind::Profile, commit.table));
        }
    }
    Ok(out)
}
