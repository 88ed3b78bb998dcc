use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

/// Run-scoped, append-only log of identifiers shared by every worker.
///
/// Producers append identifiers once the call that created them has returned, readers pick one
/// uniformly at random. Identifiers are never removed.
#[derive(Debug, Clone, Default)]
pub struct CorrelationStore {
    ids: Arc<RwLock<Vec<String>>>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, id: String) {
        self.ids.write().push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().is_empty()
    }

    /// A uniformly chosen identifier, or `None` if nothing has been appended yet.
    pub fn random(&self, rng: &mut impl Rng) -> Option<String> {
        let ids = self.ids.read();
        if ids.is_empty() {
            return None;
        }

        Some(ids[rng.gen_range(0..ids.len())].clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_should_return_none_when_empty() {
        let store = CorrelationStore::new();

        assert!(store.is_empty());
        assert_eq!(None, store.random(&mut StdRng::seed_from_u64(1)));
    }

    #[test]
    fn test_should_pick_from_appended_ids() {
        let store = CorrelationStore::new();
        store.append("P1".to_string());
        store.append("P2".to_string());

        let mut rng = StdRng::seed_from_u64(1);
        let picked: HashSet<String> = (0..100).filter_map(|_| store.random(&mut rng)).collect();

        assert_eq!(
            HashSet::from(["P1".to_string(), "P2".to_string()]),
            picked
        );
    }

    #[test]
    fn test_should_keep_every_concurrent_append() {
        let store = CorrelationStore::new();

        let writers: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        store.append(format!("ORDER_{t}_{i}"));
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|seed| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    for _ in 0..1000 {
                        if let Some(id) = store.random(&mut rng) {
                            assert!(id.starts_with("ORDER_"));
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        assert_eq!(8000, store.len());
        let unique: HashSet<String> = store.ids.read().iter().cloned().collect();
        assert_eq!(8000, unique.len());
    }
}
