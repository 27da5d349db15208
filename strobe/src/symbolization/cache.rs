//! Per-path symbol data cache
//!
//! Symbol data is expensive to build, so it is loaded at most once per
//! binary path and kept for the lifetime of the profiler with no eviction (a
//! known limitation). Concurrent first requests for the same path collapse
//! into a single load; loader failures are never cached, because a binary
//! missing now may appear later (dlopen).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::symbol_data::{SymbolData, SymbolSource};
use crate::domain::SymbolizeError;

/// Hands out per-binary symbol sources, loading them on first use.
pub trait SymbolDataProvider: Send + Sync {
    fn get(&self, path: &Path) -> Result<Arc<dyn SymbolSource>, SymbolizeError>;
}

/// Builds a symbol source for one binary path.
pub trait SymbolLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn SymbolSource>, SymbolizeError>;
}

/// Production loader: open the ELF, pick a resolver, close the file.
pub struct ElfLoader;

impl SymbolLoader for ElfLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn SymbolSource>, SymbolizeError> {
        Ok(Arc::new(SymbolData::load(path)?))
    }
}

/// The caching [`SymbolDataProvider`].
pub struct SymbolDataCache<L = ElfLoader> {
    loader: L,
    slots: Mutex<HashMap<PathBuf, Arc<PathSlot>>>,
}

#[derive(Default)]
struct PathSlot {
    loaded: Mutex<Option<Arc<dyn SymbolSource>>>,
}

impl SymbolDataCache<ElfLoader> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(ElfLoader)
    }
}

impl Default for SymbolDataCache<ElfLoader> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: SymbolLoader> SymbolDataCache<L> {
    pub fn with_loader(loader: L) -> Self {
        Self { loader, slots: Mutex::new(HashMap::new()) }
    }
}

impl<L: SymbolLoader> SymbolDataProvider for SymbolDataCache<L> {
    fn get(&self, path: &Path) -> Result<Arc<dyn SymbolSource>, SymbolizeError> {
        // The outer lock is only held long enough to find or create the
        // per-path slot; loads for different paths proceed independently.
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            Arc::clone(slots.entry(path.to_path_buf()).or_default())
        };

        // The slot lock serializes loads of one path: the winner loads
        // while losers block here and then see the cached result.
        let mut loaded = slot.loaded.lock().unwrap();
        if let Some(source) = loaded.as_ref() {
            return Ok(Arc::clone(source));
        }

        let source = self.loader.load(path)?;
        *loaded = Some(Arc::clone(&source));
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Symbol;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    struct StubSource;

    impl SymbolSource for StubSource {
        fn min_load_vaddr(&self) -> u64 {
            0
        }

        fn resolve_pc(&self, pc: u64, slide: u64) -> Result<Symbol, SymbolizeError> {
            Ok(Symbol { name: "stub".to_string(), addr: pc, offset: pc - slide })
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
        fail_first: usize,
    }

    impl CountingLoader {
        fn new(fail_first: usize) -> Self {
            Self { loads: AtomicUsize::new(0), fail_first }
        }
    }

    impl SymbolLoader for CountingLoader {
        fn load(&self, path: &Path) -> Result<Arc<dyn SymbolSource>, SymbolizeError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            // Give racing callers time to pile up on the slot lock.
            std::thread::sleep(Duration::from_millis(20));
            if n < self.fail_first {
                return Err(SymbolizeError::SymbolDataMissing(path.display().to_string()));
            }
            Ok(Arc::new(StubSource))
        }
    }

    #[test]
    fn concurrent_gets_for_one_path_load_once() {
        let cache = Arc::new(SymbolDataCache::with_loader(CountingLoader::new(0)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get(Path::new("/usr/bin/prog")).unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_errors_are_not_cached() {
        let cache = SymbolDataCache::with_loader(CountingLoader::new(1));

        assert!(cache.get(Path::new("/usr/bin/prog")).is_err());
        assert!(cache.get(Path::new("/usr/bin/prog")).is_ok());
        assert_eq!(cache.loader.loads.load(Ordering::SeqCst), 2);

        // Now cached; no further loads.
        assert!(cache.get(Path::new("/usr/bin/prog")).is_ok());
        assert_eq!(cache.loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn paths_are_cached_independently() {
        let cache = SymbolDataCache::with_loader(CountingLoader::new(0));

        cache.get(Path::new("/bin/a")).unwrap();
        cache.get(Path::new("/bin/b")).unwrap();
        cache.get(Path::new("/bin/a")).unwrap();

        assert_eq!(cache.loader.loads.load(Ordering::SeqCst), 2);
    }
}
