//! Content-addressed object model shared by the wrgld daemon and its tests.
//!
//! Objects (commits, tables, blocks, table profiles) are immutable and
//! addressed by the 16-byte Blake2b digest of their canonical binary
//! encoding. The encodings are hand-rolled and deterministic; a content
//! address must never depend on serializer quirks.

mod commit;
mod digest;
mod encode;
pub mod graph;
pub mod ingest;
mod packfile;
mod profile;
mod receiver;
mod sorter;
mod store;
mod table;

pub use commit::Commit;
pub use digest::{Digest, DigestParseError};
pub use encode::DecodeError;
pub use packfile::{PackfileError, PackfileReader, PackfileWriter};
pub use profile::{ColumnProfile, TableProfile};
pub use receiver::{ObjectReceiver, ReceiveError};
pub use sorter::{SortedRows, Sorter};
pub use store::{
    delete_object, get_block, get_commit, get_table, get_table_profile, save_block, save_commit,
    save_table, save_table_profile, MemoryStore, ObjectKind, ObjectStore, StoreError,
};
pub use sorter::DEFAULT_RUN_SIZE;
pub use table::{decode_block, encode_block, BlockRef, Table, BLOCK_ROWS};
