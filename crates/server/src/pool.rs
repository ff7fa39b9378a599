use std::sync::Mutex;

use wrgld_objects::Sorter;

/// Bounded free list of sorters. Best-effort: under load new sorters are
/// allocated and surplus ones dropped on return.
pub struct SorterPool {
    run_size: usize,
    free: Mutex<Vec<Sorter>>,
}

const POOL_CAP: usize = 4;

impl SorterPool {
    pub fn new(run_size: usize) -> Self {
        SorterPool {
            run_size,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> Sorter {
        let mut sorter = self
            .free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Sorter::new(self.run_size));
        sorter.reset();
        sorter
    }

    pub fn put(&self, sorter: Sorter) {
        let mut free = self.free.lock().unwrap();
        if free.len() < POOL_CAP {
            free.push(sorter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_returned_sorters() {
        let pool = SorterPool::new(1024);
        let mut s = pool.get();
        s.push(&[], vec!["x".into()]);
        pool.put(s);
        // A pooled sorter comes back empty.
        let mut s = pool.get();
        assert_eq!(s.rows_count(), 0);
        assert_eq!(s.sorted_rows().count(), 0);
    }
}
