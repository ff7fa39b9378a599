pub mod commit;
pub mod commits;
pub mod diff;
pub mod gc;
pub mod objects;
pub mod refs;
pub mod tables;
pub mod transactions;

use wrgld_api_types::{CommitPayload, TablePayload};
use wrgld_objects::{get_commit, get_table, Digest, ObjectStore};

use crate::auth;
use crate::error::ApiErr;

/// Materialize a commit for the API, with table metadata when the table
/// object is present (`exist=false` otherwise).
pub(crate) fn commit_payload(db: &dyn ObjectStore, sum: Digest) -> Result<CommitPayload, ApiErr> {
    let commit = get_commit(db, &sum).map_err(|e| {
        if e.is_not_found() {
            auth::not_found()
        } else {
            e.into()
        }
    })?;
    let table = match get_table(db, &commit.table) {
        Ok(t) => TablePayload {
            sum: commit.table,
            columns: t.columns,
            pk: t.pk,
            rows_count: t.rows_count,
            exist: true,
        },
        Err(e) if e.is_not_found() => TablePayload {
            sum: commit.table,
            columns: Vec::new(),
            pk: Vec::new(),
            rows_count: 0,
            exist: false,
        },
        Err(e) => return Err(e.into()),
    };
    Ok(CommitPayload {
        sum,
        author_name: commit.author_name,
        author_email: commit.author_email,
        message: commit.message,
        time: commit.time,
        parents: commit.parents,
        table,
    })
}

/// Parse a 32-hex path segment. The scope table already rejects non-hex
/// paths; anything that still fails to parse is a 404.
pub(crate) fn parse_hash(s: &str) -> Result<Digest, ApiErr> {
    s.parse().map_err(|_| auth::not_found())
}
