//! External-memory-style row sorter.
//!
//! Rows stream in, accumulate into size-bounded runs (each run sorted on
//! seal), and stream back out through a k-way merge. The daemon keeps a
//! free list of sorters because constructing one per request is wasteful
//! under load.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Default run size in bytes, matching the daemon's ingest configuration.
pub const DEFAULT_RUN_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
struct Row {
    key: Vec<String>,
    // Tie-breaker: preserves input order for duplicate keys and for
    // tables ingested without a primary key.
    seq: u64,
    fields: Vec<String>,
}

impl Row {
    fn cmp_key(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then(self.seq.cmp(&other.seq))
    }
}

pub struct Sorter {
    run_size: usize,
    current: Vec<Row>,
    current_bytes: usize,
    runs: Vec<Vec<Row>>,
    seq: u64,
}

impl Sorter {
    pub fn new(run_size: usize) -> Self {
        Sorter {
            run_size: run_size.max(1),
            current: Vec::new(),
            current_bytes: 0,
            runs: Vec::new(),
            seq: 0,
        }
    }

    /// Return to a known-empty state. Called when a sorter is taken from the
    /// pool so a previous request's rows can never leak into this one.
    pub fn reset(&mut self) {
        self.current.clear();
        self.current_bytes = 0;
        self.runs.clear();
        self.seq = 0;
    }

    pub fn rows_count(&self) -> u64 {
        self.seq
    }

    /// Add one row. `pk` holds the indices of the primary-key columns; an
    /// empty slice keeps input order.
    pub fn push(&mut self, pk: &[u32], fields: Vec<String>) {
        let key: Vec<String> = pk
            .iter()
            .map(|&i| fields.get(i as usize).cloned().unwrap_or_default())
            .collect();
        let bytes: usize = fields.iter().map(|f| f.len() + 16).sum();
        self.current.push(Row { key, seq: self.seq, fields });
        self.seq += 1;
        self.current_bytes += bytes;
        if self.current_bytes >= self.run_size {
            self.seal_run();
        }
    }

    fn seal_run(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let mut run = std::mem::take(&mut self.current);
        run.sort_by(|a, b| a.cmp_key(b));
        self.runs.push(run);
        self.current_bytes = 0;
    }

    /// Seal the final run and stream every row back in key order. Leaves the
    /// sorter empty.
    pub fn sorted_rows(&mut self) -> SortedRows {
        self.seal_run();
        let runs = std::mem::take(&mut self.runs);
        self.seq = 0;
        SortedRows::new(runs)
    }
}

struct HeapEntry {
    row: Row,
    run: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.row.cmp_key(&other.row) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert for ascending key order.
        other.row.cmp_key(&self.row)
    }
}

/// K-way merge over sealed runs.
pub struct SortedRows {
    runs: Vec<std::vec::IntoIter<Row>>,
    heap: BinaryHeap<HeapEntry>,
}

impl SortedRows {
    fn new(runs: Vec<Vec<Row>>) -> Self {
        let mut runs: Vec<_> = runs.into_iter().map(|r| r.into_iter()).collect();
        let mut heap = BinaryHeap::with_capacity(runs.len());
        for (i, run) in runs.iter_mut().enumerate() {
            if let Some(row) = run.next() {
                heap.push(HeapEntry { row, run: i });
            }
        }
        SortedRows { runs, heap }
    }
}

impl Iterator for SortedRows {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;
        if let Some(row) = self.runs[entry.run].next() {
            self.heap.push(HeapEntry { row, run: entry.run });
        }
        Some(entry.row.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(vals: &[&str]) -> Vec<String> {
        vals.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn sorts_by_primary_key_across_runs() {
        // Tiny run size forces multiple runs.
        let mut s = Sorter::new(8);
        s.push(&[0], row(&["3", "c"]));
        s.push(&[0], row(&["1", "a"]));
        s.push(&[0], row(&["2", "b"]));
        s.push(&[0], row(&["0", "z"]));
        let keys: Vec<String> = s.sorted_rows().map(|r| r[0].clone()).collect();
        assert_eq!(keys, ["0", "1", "2", "3"]);
    }

    #[test]
    fn empty_pk_preserves_input_order() {
        let mut s = Sorter::new(4);
        s.push(&[], row(&["b"]));
        s.push(&[], row(&["a"]));
        s.push(&[], row(&["c"]));
        let got: Vec<String> = s.sorted_rows().map(|r| r[0].clone()).collect();
        assert_eq!(got, ["b", "a", "c"]);
    }

    #[test]
    fn duplicate_keys_keep_input_order() {
        let mut s = Sorter::new(1024);
        s.push(&[0], row(&["k", "first"]));
        s.push(&[0], row(&["k", "second"]));
        let got: Vec<Vec<String>> = s.sorted_rows().collect();
        assert_eq!(got[0][1], "first");
        assert_eq!(got[1][1], "second");
    }

    #[test]
    fn reset_clears_previous_request() {
        let mut s = Sorter::new(1024);
        s.push(&[0], row(&["1"]));
        s.reset();
        assert_eq!(s.rows_count(), 0);
        assert_eq!(s.sorted_rows().count(), 0);
    }

    #[test]
    fn composite_key_orders_by_both_columns() {
        let mut s = Sorter::new(1024);
        s.push(&[0, 1], row(&["a", "2", "x"]));
        s.push(&[0, 1], row(&["a", "1", "y"]));
        s.push(&[0, 1], row(&["b", "0", "z"]));
        let got: Vec<String> = s.sorted_rows().map(|r| r[2].clone()).collect();
        assert_eq!(got, ["y", "x", "z"]);
    }
}
