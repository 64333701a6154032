use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Issues chunk ids of the form `<filename hash>_<index>_<counter>`. The
/// counter is process-wide, so identical (filename, index) pairs still get
/// distinct ids.
#[derive(Default)]
pub struct ChunkIdGenerator {
    counter: AtomicU64,
}

impl ChunkIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, filename: &str, chunk_index: usize) -> String {
        let mut hasher = DefaultHasher::new();
        filename.hash(&mut hasher);
        format!(
            "{}_{}_{}",
            hasher.finish(),
            chunk_index,
            self.counter.fetch_add(1, Ordering::Relaxed)
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn same_file_and_index_get_distinct_ids() {
        let generator = ChunkIdGenerator::new();
        let a = generator.next_id("f.txt", 0);
        let b = generator.next_id("f.txt", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn parallel_generation_never_collides() {
        let generator = Arc::new(ChunkIdGenerator::new());
        let mut handles = vec![];
        for t in 0..8 {
            let generator = generator.clone();
            handles.push(std::thread::spawn(move || {
                (0..250)
                    .map(|i| generator.next_id("shared.bin", (t * 250 + i) % 4))
                    .collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 8 * 250);
    }
}
