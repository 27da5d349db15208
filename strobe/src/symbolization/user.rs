//! Userspace symbolizer
//!
//! Composes the `/proc/<pid>/maps` tracker with the per-binary resolver
//! cache: each PC is mapped to its memory region, the region's backing
//! binary is loaded (once) and the PC minus the load slide is resolved to
//! a function name and offset.
//!
//! The maps snapshot is cached with a TTL and additionally invalidated the
//! moment a PC fails to match any region: a new mapping (dlopen, JIT) is
//! the usual cause, so one refresh-and-retry is attempted before the frame
//! is dropped.

use log::warn;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::cache::{SymbolDataCache, SymbolDataProvider};
use super::data_loader::FileLines;
use super::proc_maps::{MapRegion, ProcMaps, RegionProvider};
use super::Symbolize;
use crate::domain::{Pid, Symbol, SymbolizeError};

/// How long a maps snapshot stays fresh without being revalidated.
pub const DEFAULT_MAPS_TTL: Duration = Duration::from_secs(5);

/// Symbolizer for user-space stacks of one process.
pub struct UserSymbolizer<M: RegionProvider, D: SymbolDataProvider> {
    pid: Pid,
    maps: RwLock<MapsCache<M>>,
    ttl: Duration,
    data: D,
}

struct MapsCache<M> {
    provider: M,
    /// `None` means the snapshot is invalid and must be refreshed.
    refreshed_at: Option<Instant>,
}

impl UserSymbolizer<ProcMaps<FileLines>, SymbolDataCache> {
    /// Symbolizer over `/proc/<pid>/maps` with the default TTL.
    #[must_use]
    pub fn for_pid(pid: Pid) -> Self {
        let source = FileLines::new(format!("/proc/{}/maps", pid.0));
        Self::new(pid, ProcMaps::new(source), SymbolDataCache::new(), DEFAULT_MAPS_TTL)
    }
}

impl<M: RegionProvider, D: SymbolDataProvider> UserSymbolizer<M, D> {
    pub fn new(pid: Pid, provider: M, data: D, ttl: Duration) -> Self {
        Self {
            pid,
            maps: RwLock::new(MapsCache { provider, refreshed_at: None }),
            ttl,
            data,
        }
    }

    fn ensure_fresh(&self) -> Result<(), SymbolizeError> {
        {
            let cache = self.maps.read().unwrap();
            if cache.refreshed_at.is_some_and(|at| at.elapsed() < self.ttl) {
                return Ok(());
            }
        }
        let mut cache = self.maps.write().unwrap();
        // Another caller may have refreshed while we waited for the lock.
        if cache.refreshed_at.is_some_and(|at| at.elapsed() < self.ttl) {
            return Ok(());
        }
        cache.provider.refresh()?;
        cache.refreshed_at = Some(Instant::now());
        Ok(())
    }

    /// Unconditional refresh, used after a lookup miss.
    fn force_refresh(&self) -> Result<(), SymbolizeError> {
        let mut cache = self.maps.write().unwrap();
        cache.provider.refresh()?;
        cache.refreshed_at = Some(Instant::now());
        Ok(())
    }

    fn find(&self, pc: u64) -> Option<MapRegion> {
        self.maps.read().unwrap().provider.find_region(pc)
    }

    /// The binary to open for a region. Anonymous and `[bracket]` pseudo
    /// regions fall back to the process's main executable.
    fn binary_path(&self, region: &MapRegion) -> PathBuf {
        if region.path.is_empty() || region.path.starts_with('[') {
            let exe = PathBuf::from(format!("/proc/{}/exe", self.pid.0));
            fs::read_link(&exe).unwrap_or(exe)
        } else {
            PathBuf::from(&region.path)
        }
    }
}

impl<M: RegionProvider, D: SymbolDataProvider> Symbolize for UserSymbolizer<M, D> {
    fn symbolize(&self, stack: &[u64]) -> Result<Vec<Symbol>, SymbolizeError> {
        self.ensure_fresh()?;

        let mut symbols = Vec::with_capacity(stack.len());
        for &pc in stack {
            let region = match self.find(pc) {
                Some(region) => region,
                None => {
                    // The mapping may have changed since the snapshot;
                    // refresh once and retry before giving up on the frame.
                    self.force_refresh()?;
                    match self.find(pc) {
                        Some(region) => region,
                        None => {
                            warn!("no map region contains pc 0x{pc:x}; skipping frame");
                            continue;
                        }
                    }
                }
            };

            let path = self.binary_path(&region);
            let source = match self.data.get(&path) {
                Ok(source) => source,
                Err(SymbolizeError::SymbolDataMissing(p)) => {
                    warn!("binary {p} vanished before symbol load; skipping frame");
                    continue;
                }
                Err(e) => {
                    return Err(SymbolizeError::ResolveFailed { pc, error: e.to_string() })
                }
            };

            let min_vaddr = source.min_load_vaddr();
            let slide = if min_vaddr == 0 { 0 } else { region.start.wrapping_sub(min_vaddr) };

            match source.resolve_pc(pc, slide) {
                Ok(symbol) => symbols.push(symbol),
                Err(e @ (SymbolizeError::PcNotFound(_) | SymbolizeError::NoMatchingSymbol(_))) => {
                    warn!("could not attribute pc 0x{pc:x}: {e}; skipping frame");
                }
                Err(e) => {
                    return Err(SymbolizeError::ResolveFailed { pc, error: e.to_string() })
                }
            }
        }

        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolization::symbol_data::SymbolSource;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct MockRegions {
        /// Snapshots installed by successive refreshes; the last one sticks.
        snapshots: Mutex<Vec<Vec<MapRegion>>>,
        current: Mutex<Vec<MapRegion>>,
        refresh_calls: Arc<AtomicUsize>,
        refresh_err: bool,
    }

    impl MockRegions {
        fn new(snapshots: Vec<Vec<MapRegion>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let mock = Self {
                snapshots: Mutex::new(snapshots.into_iter().rev().collect()),
                current: Mutex::new(Vec::new()),
                refresh_calls: Arc::clone(&calls),
                refresh_err: false,
            };
            (mock, calls)
        }

        fn failing() -> Self {
            Self {
                snapshots: Mutex::new(Vec::new()),
                current: Mutex::new(Vec::new()),
                refresh_calls: Arc::new(AtomicUsize::new(0)),
                refresh_err: true,
            }
        }
    }

    impl RegionProvider for MockRegions {
        fn find_region(&self, pc: u64) -> Option<MapRegion> {
            self.current.lock().unwrap().iter().find(|r| r.contains(pc)).cloned()
        }

        fn refresh(&mut self) -> Result<(), SymbolizeError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_err {
                return Err(SymbolizeError::ReadProcMaps("refresh failed".to_string()));
            }
            let mut snapshots = self.snapshots.lock().unwrap();
            if let Some(snapshot) = snapshots.pop() {
                *self.current.lock().unwrap() = snapshot;
            }
            Ok(())
        }
    }

    struct MockSource {
        /// target (pc - slide) → name
        names: HashMap<u64, &'static str>,
        min_vaddr: u64,
    }

    impl SymbolSource for MockSource {
        fn min_load_vaddr(&self) -> u64 {
            self.min_vaddr
        }

        fn resolve_pc(&self, pc: u64, slide: u64) -> Result<Symbol, SymbolizeError> {
            let target = pc.wrapping_sub(slide);
            match self.names.get(&target) {
                Some(name) => {
                    Ok(Symbol { name: (*name).to_string(), addr: pc, offset: 0 })
                }
                None => Err(SymbolizeError::PcNotFound(target)),
            }
        }
    }

    enum ProviderMode {
        Sources(HashMap<PathBuf, Arc<MockSource>>),
        Missing,
        Broken,
    }

    struct MockProvider(ProviderMode);

    impl SymbolDataProvider for MockProvider {
        fn get(&self, path: &Path) -> Result<Arc<dyn SymbolSource>, SymbolizeError> {
            match &self.0 {
                ProviderMode::Sources(map) => map
                    .get(path)
                    .map(|s| Arc::clone(s) as Arc<dyn SymbolSource>)
                    .ok_or_else(|| {
                        SymbolizeError::NoSymbolData(path.display().to_string())
                    }),
                ProviderMode::Missing => {
                    Err(SymbolizeError::SymbolDataMissing(path.display().to_string()))
                }
                ProviderMode::Broken => Err(SymbolizeError::SymbolDataLoad {
                    path: path.display().to_string(),
                    error: "corrupt".to_string(),
                }),
            }
        }
    }

    fn region(start: u64, end: u64, path: &str) -> MapRegion {
        MapRegion { start, end, offset: 0, perms: "r-xp".to_string(), path: path.to_string() }
    }

    fn provider_for(entries: &[(&str, u64, &'static str)]) -> MockProvider {
        let mut map: HashMap<PathBuf, Arc<MockSource>> = HashMap::new();
        for &(path, target, name) in entries {
            let source = map.entry(PathBuf::from(path)).or_insert_with(|| {
                Arc::new(MockSource { names: HashMap::new(), min_vaddr: 0 })
            });
            Arc::get_mut(source).unwrap().names.insert(target, name);
        }
        MockProvider(ProviderMode::Sources(map))
    }

    #[test]
    fn symbolizes_frames_across_binaries() {
        let (regions, _) = MockRegions::new(vec![vec![
            region(0x55d4_b200_0000, 0x55d4_b202_1000, "/usr/bin/myprog"),
            region(0x7f8a_9b00_0000, 0x7f8a_9b00_2000, "/usr/lib/libc.so.6"),
        ]]);
        // min_vaddr is 0, so targets equal the raw PCs here.
        let provider = provider_for(&[
            ("/usr/bin/myprog", 0x55d4_b200_0100, "main"),
            ("/usr/lib/libc.so.6", 0x7f8a_9b00_0100, "printf"),
        ]);

        let sym = UserSymbolizer::new(Pid(1234), regions, provider, DEFAULT_MAPS_TTL);
        let symbols = sym.symbolize(&[0x55d4_b200_0100, 0x7f8a_9b00_0100]).unwrap();

        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "main");
        assert_eq!(symbols[1].name, "printf");
    }

    #[test]
    fn applies_min_vaddr_slide() {
        let (regions, _) = MockRegions::new(vec![vec![region(
            0x5000_0000,
            0x5001_0000,
            "/usr/bin/pie",
        )]]);
        let source = Arc::new(MockSource {
            names: HashMap::from([(0x1040u64, "entry")]),
            min_vaddr: 0x1000,
        });
        let provider = MockProvider(ProviderMode::Sources(HashMap::from([(
            PathBuf::from("/usr/bin/pie"),
            source,
        )])));

        // slide = region.start - min_vaddr = 0x5000_0000 - 0x1000
        let sym = UserSymbolizer::new(Pid(1), regions, provider, DEFAULT_MAPS_TTL);
        let symbols = sym.symbolize(&[0x5000_0040]).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "entry");
    }

    #[test]
    fn region_miss_refreshes_once_then_skips() {
        // First snapshot misses the second PC; the refresh triggered by the
        // miss installs a snapshot that still misses it.
        let (regions, calls) = MockRegions::new(vec![
            vec![region(0x1000, 0x2000, "/bin/a")],
            vec![region(0x1000, 0x2000, "/bin/a")],
        ]);
        let provider = provider_for(&[("/bin/a", 0x1100, "f")]);

        let sym = UserSymbolizer::new(Pid(1), regions, provider, DEFAULT_MAPS_TTL);
        let symbols = sym.symbolize(&[0x1100, 0xdead_0000]).unwrap();

        assert_eq!(symbols.len(), 1);
        // One initial refresh plus exactly one forced by the miss.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn region_miss_retry_can_succeed() {
        let (regions, _) = MockRegions::new(vec![
            vec![],
            vec![region(0x1000, 0x2000, "/bin/a")],
        ]);
        let provider = provider_for(&[("/bin/a", 0x1100, "f")]);

        let sym = UserSymbolizer::new(Pid(1), regions, provider, DEFAULT_MAPS_TTL);
        let symbols = sym.symbolize(&[0x1100]).unwrap();

        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "f");
    }

    #[test]
    fn fresh_cache_is_not_refreshed_again() {
        let (regions, calls) = MockRegions::new(vec![vec![region(0x1000, 0x2000, "/bin/a")]]);
        let provider = provider_for(&[("/bin/a", 0x1100, "f")]);

        let sym = UserSymbolizer::new(Pid(1), regions, provider, DEFAULT_MAPS_TTL);
        sym.symbolize(&[0x1100]).unwrap();
        sym.symbolize(&[0x1100]).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_ttl_triggers_refresh() {
        let (regions, calls) = MockRegions::new(vec![
            vec![region(0x1000, 0x2000, "/bin/a")],
            vec![region(0x1000, 0x2000, "/bin/a")],
        ]);
        let provider = provider_for(&[("/bin/a", 0x1100, "f")]);

        let sym = UserSymbolizer::new(Pid(1), regions, provider, Duration::ZERO);
        sym.symbolize(&[0x1100]).unwrap();
        sym.symbolize(&[0x1100]).unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn refresh_errors_surface() {
        let provider = provider_for(&[]);
        let sym =
            UserSymbolizer::new(Pid(1), MockRegions::failing(), provider, DEFAULT_MAPS_TTL);

        let err = sym.symbolize(&[0x1000]).unwrap_err();
        assert!(matches!(err, SymbolizeError::ReadProcMaps(_)));
    }

    #[test]
    fn unresolvable_pc_drops_only_that_frame() {
        let (regions, _) = MockRegions::new(vec![vec![region(0x1000, 0x3000, "/bin/a")]]);
        let provider = provider_for(&[("/bin/a", 0x1100, "f")]);

        let sym = UserSymbolizer::new(Pid(1), regions, provider, DEFAULT_MAPS_TTL);
        // 0x2222 maps to /bin/a but no function covers it.
        let symbols = sym.symbolize(&[0x2222, 0x1100]).unwrap();

        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].name, "f");
    }

    #[test]
    fn vanished_binary_skips_frame() {
        let (regions, _) = MockRegions::new(vec![vec![region(0x1000, 0x2000, "/bin/gone")]]);
        let sym = UserSymbolizer::new(
            Pid(1),
            regions,
            MockProvider(ProviderMode::Missing),
            DEFAULT_MAPS_TTL,
        );

        let symbols = sym.symbolize(&[0x1100]).unwrap();
        assert!(symbols.is_empty());
    }

    #[test]
    fn loader_failure_aborts_the_stack() {
        let (regions, _) = MockRegions::new(vec![vec![region(0x1000, 0x2000, "/bin/bad")]]);
        let sym = UserSymbolizer::new(
            Pid(1),
            regions,
            MockProvider(ProviderMode::Broken),
            DEFAULT_MAPS_TTL,
        );

        let err = sym.symbolize(&[0x1100]).unwrap_err();
        assert!(matches!(err, SymbolizeError::ResolveFailed { pc: 0x1100, .. }));
    }

    #[test]
    fn empty_stack_yields_empty_symbols() {
        let (regions, _) = MockRegions::new(vec![vec![]]);
        let provider = provider_for(&[]);
        let sym = UserSymbolizer::new(Pid(1), regions, provider, DEFAULT_MAPS_TTL);

        assert!(sym.symbolize(&[]).unwrap().is_empty());
    }
}
