//! Bounded best-K retention shared by parallel estimation tasks.

use std::cmp::Ordering;
use std::sync::Mutex;

struct Entry<T> {
    item: T,
    score: f64,
    index: usize,
}

impl<T> Entry<T> {
    /// Higher score first, then earlier generation index
    fn rank(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.index.cmp(&other.index))
    }
}

/// Keeps the `capacity` best items seen so far.
///
/// Ties on score keep the item generated first. Inserts are serialized,
/// so the queue can be shared by reference across rayon tasks.
pub struct ScreeningQueue<T> {
    capacity: usize,
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T> ScreeningQueue<T> {
    pub fn new(capacity: usize) -> Self {
        ScreeningQueue {
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer an item; returns whether it was retained. A NaN score is
    /// never retained.
    ///
    /// * `index` - generation order of the item
    pub fn add(&self, item: T, score: f64, index: usize) -> bool {
        if self.capacity == 0 || score.is_nan() {
            return false;
        }
        let entry = Entry { item, score, index };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() < self.capacity {
            entries.push(entry);
            return true;
        }

        let worst = entries
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.rank(b))
            .map(|(k, _)| k);

        match worst {
            Some(k) if entry.rank(&entries[k]) == Ordering::Less => {
                entries[k] = entry;
                true
            }
            _ => false,
        }
    }

    /// Best first, with scores and generation indices
    pub fn into_sorted(self) -> Vec<(T, f64, usize)> {
        let mut entries = self.entries.into_inner().unwrap_or_else(|e| e.into_inner());
        entries.sort_by(|a, b| a.rank(b));
        entries
            .into_iter()
            .map(|e| (e.item, e.score, e.index))
            .collect()
    }
}
