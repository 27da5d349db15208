//! eBPF backend: probe lifecycle and map access
//!
//! Loads the compiled probe object, opens one software cpu-clock perf event
//! per online CPU with the program attached (aya performs the underlying
//! `perf_event_open` / `PERF_EVENT_IOC_SET_BPF` / `IOC_ENABLE` sequence),
//! and exposes non-destructive reads over the two kernel maps.
//!
//! The probe object is produced by `cargo xtask build-ebpf --release`; its
//! location can be overridden with the `STROBE_BPF_OBJECT` environment
//! variable.

use aya::maps::{MapData, MapError, PerCpuHashMap, StackTraceMap};
use aya::programs::{perf_event, PerfEvent};
use aya::Ebpf;
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::cpu_utils::online_cpus;
use crate::domain::{BackendError, Pid};
use strobe_common::STACK_ID_MISSING;

/// Where `cargo xtask build-ebpf --release` leaves the probe object.
pub const DEFAULT_BPF_OBJECT_PATH: &str = "target/bpfel-unknown-none/release/strobe";

const PROGRAM_NAME: &str = "on_sample";

/// Lifecycle and map access for the sampling probe.
///
/// The backend exists so the collector and the tests can run against a mock
/// implementation; [`EbpfBackend`] is the only production one.
pub trait ProfileBackend: Send + Sync {
    /// Attach the probe. `target` of `None` samples every process.
    fn start(&self, target: Option<Pid>, sample_period_ns: u64) -> Result<(), BackendError>;

    /// Detach and disable all perf events. Idempotent.
    fn stop(&self) -> Result<(), BackendError>;

    /// Sum the per-CPU counts per packed stack key, omitting zero totals.
    fn snapshot_counts(&self) -> Result<HashMap<u64, u64>, BackendError>;

    /// Fetch the frame PCs for a (user, kernel) stack-id pair. The missing
    /// sentinel and evicted ids both yield an empty side.
    fn lookup_stacks(&self, user_id: u32, kernel_id: u32)
        -> Result<(Vec<u64>, Vec<u64>), BackendError>;
}

pub struct EbpfBackend {
    state: Mutex<BackendState>,
    // The map handles are taken out of the object at load time; reading
    // them does not require the state lock, kernel maps are safe for
    // concurrent access.
    counts: PerCpuHashMap<MapData, u64, u64>,
    stacks: StackTraceMap<MapData>,
}

struct BackendState {
    bpf: Ebpf,
    links: Vec<perf_event::PerfEventLinkId>,
    attached: bool,
}

impl EbpfBackend {
    /// Load the probe object from `STROBE_BPF_OBJECT` or the default path.
    pub fn load() -> Result<Self, BackendError> {
        let path = std::env::var("STROBE_BPF_OBJECT")
            .unwrap_or_else(|_| DEFAULT_BPF_OBJECT_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, BackendError> {
        let load_err = |error: String| BackendError::LoadFailed {
            path: path.display().to_string(),
            error,
        };

        let mut bpf = Ebpf::load_file(path).map_err(|e| load_err(e.to_string()))?;

        let counts = bpf
            .take_map("COUNTS")
            .ok_or_else(|| load_err("COUNTS map not found".to_string()))?;
        let counts = PerCpuHashMap::try_from(counts).map_err(|e| load_err(e.to_string()))?;

        let stacks = bpf
            .take_map("STACK_TRACES")
            .ok_or_else(|| load_err("STACK_TRACES map not found".to_string()))?;
        let stacks = StackTraceMap::try_from(stacks).map_err(|e| load_err(e.to_string()))?;

        Ok(Self {
            state: Mutex::new(BackendState { bpf, links: Vec::new(), attached: false }),
            counts,
            stacks,
        })
    }

    fn is_attached(&self) -> bool {
        self.state.lock().unwrap().attached
    }

    /// Read one side of a stack pair, trimming the zero-padded tail.
    fn read_frames(&self, id: u32) -> Vec<u64> {
        if id == STACK_ID_MISSING {
            return Vec::new();
        }
        match self.stacks.get(&id, 0) {
            Ok(trace) => trim_stack(trace.frames().iter().map(|f| f.ip)),
            // The LRU may have evicted the trace between sampling and this
            // read; the stack is simply gone.
            Err(MapError::KeyNotFound) => Vec::new(),
            Err(e) => {
                warn!("stack trace read for id {id} failed: {e}");
                Vec::new()
            }
        }
    }
}

/// The stacks map stores a fixed-length array per trace; a zero PC marks
/// the end of the recorded frames.
fn trim_stack(frames: impl Iterator<Item = u64>) -> Vec<u64> {
    frames.take_while(|&ip| ip != 0).collect()
}

impl ProfileBackend for EbpfBackend {
    fn start(&self, target: Option<Pid>, sample_period_ns: u64) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if state.attached {
            return Err(BackendError::AlreadyAttached);
        }

        let program: &mut PerfEvent = state
            .bpf
            .program_mut(PROGRAM_NAME)
            .ok_or_else(|| BackendError::ProgramNotFound(PROGRAM_NAME.to_string()))?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| {
                BackendError::ProgramLoadFailed(e.to_string())
            })?;
        program.load().map_err(|e| BackendError::ProgramLoadFailed(e.to_string()))?;

        let cpus = online_cpus().map_err(|e| BackendError::OnlineCpus(e.to_string()))?;

        let mut links = Vec::with_capacity(cpus.len());
        for cpu in &cpus {
            let scope = match target {
                Some(pid) => perf_event::PerfEventScope::OneProcessOneCpu {
                    cpu: cpu.0,
                    pid: pid.0 as u32,
                },
                None => perf_event::PerfEventScope::AllProcessesOneCpu { cpu: cpu.0 },
            };

            let attached = program.attach(
                perf_event::PerfTypeId::Software,
                perf_event::perf_sw_ids::PERF_COUNT_SW_CPU_CLOCK as u64,
                scope,
                perf_event::SamplePolicy::Period(sample_period_ns),
                false,
            );

            match attached {
                Ok(link) => links.push(link),
                Err(e) => {
                    // No partial attach: undo everything opened so far.
                    for link in links.drain(..) {
                        let _ = program.detach(link);
                    }
                    let _ = program.unload();
                    return Err(BackendError::AttachFailed { cpu: cpu.0, error: e.to_string() });
                }
            }
        }

        info!(
            "attached cpu-clock sampler to {} cpus (period {sample_period_ns} ns, target {target:?})",
            cpus.len()
        );
        state.links = links;
        state.attached = true;
        Ok(())
    }

    fn stop(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if !state.attached {
            // Nothing attached; maps and program close when the backend is
            // dropped.
            return Ok(());
        }

        let links = std::mem::take(&mut state.links);
        state.attached = false;

        let mut first_err: Option<String> = None;
        match state.bpf.program_mut(PROGRAM_NAME).and_then(|p| {
            TryInto::<&mut PerfEvent>::try_into(p).ok()
        }) {
            Some(program) => {
                for link in links {
                    if let Err(e) = program.detach(link) {
                        first_err.get_or_insert(e.to_string());
                    }
                }
                if let Err(e) = program.unload() {
                    first_err.get_or_insert(e.to_string());
                }
            }
            None => {
                first_err = Some(format!("program {PROGRAM_NAME} disappeared"));
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(BackendError::DetachFailed(e)),
        }
    }

    fn snapshot_counts(&self) -> Result<HashMap<u64, u64>, BackendError> {
        if !self.is_attached() {
            return Err(BackendError::NotAttached);
        }

        let mut totals = HashMap::new();
        for entry in self.counts.iter() {
            let (key, per_cpu) =
                entry.map_err(|e| BackendError::SnapshotFailed(e.to_string()))?;
            let sum: u64 = per_cpu.iter().copied().sum();
            if sum > 0 {
                totals.insert(key, sum);
            }
        }
        Ok(totals)
    }

    fn lookup_stacks(
        &self,
        user_id: u32,
        kernel_id: u32,
    ) -> Result<(Vec<u64>, Vec<u64>), BackendError> {
        if !self.is_attached() {
            return Err(BackendError::NotAttached);
        }
        Ok((self.read_frames(user_id), self.read_frames(kernel_id)))
    }
}
