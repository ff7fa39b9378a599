//! Pack intake: stores verified frames and tracks when every wanted commit's
//! transitive closure (parents, table, blocks) is locally present.

use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::sync::Arc;

use crate::packfile::PackfileError;
use crate::{
    Commit, Digest, ObjectKind, ObjectStore, PackfileReader, StoreError, Table, TableProfile,
};

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Packfile(#[from] PackfileError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("received corrupt {kind} object: {reason}")]
    CorruptObject { kind: &'static str, reason: String },
}

pub struct ObjectReceiver {
    db: Arc<dyn ObjectStore>,
    wants: Vec<Digest>,
}

impl ObjectReceiver {
    /// `wants` are the commit digests the sender promised to make complete.
    pub fn new(db: Arc<dyn ObjectStore>, wants: Vec<Digest>) -> Self {
        ObjectReceiver { db, wants }
    }

    /// Drain one packfile stream into the store. Returns `true` when every
    /// want is satisfied; `false` means the sender has more to transmit and
    /// the session should stay open.
    ///
    /// Frames are digest-verified by the packfile reader; decodable-ness is
    /// checked here so a malformed commit or table never lands in the store.
    pub fn receive(&mut self, input: impl Read) -> Result<bool, ReceiveError> {
        let mut reader = PackfileReader::new(input);
        while let Some((kind, sum, payload)) = reader.next_object()? {
            match kind {
                ObjectKind::Commit => {
                    Commit::decode(&payload).map_err(|e| ReceiveError::CorruptObject {
                        kind: "commit",
                        reason: e.to_string(),
                    })?;
                    self.db.put(ObjectKind::Commit, &payload)?;
                }
                ObjectKind::Table => {
                    Table::decode(&payload).map_err(|e| ReceiveError::CorruptObject {
                        kind: "table",
                        reason: e.to_string(),
                    })?;
                    self.db.put(ObjectKind::Table, &payload)?;
                }
                ObjectKind::Block => {
                    self.db.put(ObjectKind::Block, &payload)?;
                }
                // Profiles ride along keyed by their table, so their frame
                // digest is not content-verified by the reader. Decoding is
                // the integrity check here.
                ObjectKind::Profile => {
                    TableProfile::decode(&payload).map_err(|e| ReceiveError::CorruptObject {
                        kind: "profile",
                        reason: e.to_string(),
                    })?;
                    self.db.put_keyed(ObjectKind::Profile, &sum, &payload)?;
                }
            }
        }
        self.done()
    }

    /// A want is satisfied when the commit, its ancestors (as far as they are
    /// referenced), and each commit's table and blocks are all present.
    pub fn done(&self) -> Result<bool, ReceiveError> {
        let mut seen: HashSet<Digest> = HashSet::new();
        let mut queue: VecDeque<Digest> = self.wants.iter().copied().collect();
        while let Some(sum) = queue.pop_front() {
            if !seen.insert(sum) {
                continue;
            }
            if !self.db.contains(ObjectKind::Commit, &sum) {
                return Ok(false);
            }
            let commit = crate::get_commit(self.db.as_ref(), &sum)?;
            if !self.db.contains(ObjectKind::Table, &commit.table) {
                return Ok(false);
            }
            let table = crate::get_table(self.db.as_ref(), &commit.table)?;
            for b in &table.blocks {
                if !self.db.contains(ObjectKind::Block, &b.sum) {
                    return Ok(false);
                }
            }
            queue.extend(commit.parents.iter().copied());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pack_objects;
    use crate::ingest::ingest_table;
    use crate::{save_commit, MemoryStore, PackfileWriter, Sorter};
    use chrono::DateTime;
    use std::collections::HashSet;

    fn build_commit(db: &dyn ObjectStore, csv: &str, parents: Vec<Digest>) -> Digest {
        let mut sorter = Sorter::new(1024);
        let table = ingest_table(db, &mut sorter, csv.as_bytes(), &["id".to_string()]).unwrap();
        save_commit(
            db,
            &Commit {
                table,
                parents,
                message: "m".into(),
                time: DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z").unwrap(),
                author_name: "a".into(),
                author_email: "a@b.c".into(),
            },
        )
        .unwrap()
    }

    fn pack_bytes(db: &dyn ObjectStore, wants: &[Digest]) -> Vec<u8> {
        let objs = pack_objects(db, wants, &HashSet::new(), None).unwrap();
        let mut w = PackfileWriter::new(Vec::new());
        for (kind, sum) in objs {
            let payload = db.get(kind, &sum).unwrap();
            w.write_object(kind, &sum, &payload).unwrap();
        }
        w.finish().unwrap()
    }

    #[test]
    fn full_pack_satisfies_wants() {
        let src = MemoryStore::new();
        let c1 = build_commit(&src, "id\n1\n", vec![]);
        let c2 = build_commit(&src, "id\n1\n2\n", vec![c1]);
        let pack = pack_bytes(&src, &[c2]);

        let dst = Arc::new(MemoryStore::new());
        let mut recv = ObjectReceiver::new(dst.clone(), vec![c2]);
        assert!(recv.receive(&pack[..]).unwrap());
        assert!(dst.contains(ObjectKind::Commit, &c1));
        assert!(dst.contains(ObjectKind::Commit, &c2));

        // The table profile rides along, keyed by its table.
        let commit = crate::get_commit(dst.as_ref(), &c2).unwrap();
        assert!(dst.contains(ObjectKind::Profile, &commit.table));
        crate::get_table_profile(dst.as_ref(), &commit.table).unwrap();
    }

    #[test]
    fn partial_pack_keeps_session_open() {
        let src = MemoryStore::new();
        let c1 = build_commit(&src, "id\n1\n", vec![]);
        let c2 = build_commit(&src, "id\n2\n", vec![c1]);

        // First pack carries only c2's own objects, not its parent.
        let objs = pack_objects(&src, &[c2], &HashSet::from([c1]), None).unwrap();
        let mut w = PackfileWriter::new(Vec::new());
        for (kind, sum) in objs {
            let payload = src.get(kind, &sum).unwrap();
            w.write_object(kind, &sum, &payload).unwrap();
        }
        let first = w.finish().unwrap();

        let dst = Arc::new(MemoryStore::new());
        let mut recv = ObjectReceiver::new(dst.clone(), vec![c2]);
        assert!(!recv.receive(&first[..]).unwrap());

        let rest = pack_bytes(&src, &[c1]);
        assert!(recv.receive(&rest[..]).unwrap());
    }

    #[test]
    fn undecodable_profile_rejected() {
        let dst = Arc::new(MemoryStore::new());
        let mut w = PackfileWriter::new(Vec::new());
        w.write_object(ObjectKind::Profile, &Digest::of(b"table"), b"not json")
            .unwrap();
        let pack = w.finish().unwrap();

        let mut recv = ObjectReceiver::new(dst, vec![]);
        assert!(matches!(
            recv.receive(&pack[..]),
            Err(ReceiveError::CorruptObject { kind: "profile", .. })
        ));
    }

    #[test]
    fn corrupt_frame_rejected() {
        let dst = Arc::new(MemoryStore::new());
        let mut w = PackfileWriter::new(Vec::new());
        let bogus = b"not a commit";
        w.write_object(ObjectKind::Commit, &Digest::of(bogus), bogus).unwrap();
        let pack = w.finish().unwrap();

        let mut recv = ObjectReceiver::new(dst, vec![Digest::of(bogus)]);
        assert!(matches!(
            recv.receive(&pack[..]),
            Err(ReceiveError::CorruptObject { .. })
        ));
    }
}
