//! The collector loop
//!
//! Runs on its own thread: every tick it snapshots the accumulated counts,
//! resolves each stack pair, symbolizes both sides and publishes the batch
//! with a non-blocking send. A slow consumer costs dropped batches, never
//! collector stalls; per-entry failures cost that entry, never the batch.

use crossbeam_channel::{select, tick, Receiver, Sender, TrySendError};
use log::warn;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::backend::ProfileBackend;
use crate::domain::Sample;
use crate::symbolization::Symbolize;
use strobe_common::unpack_stack_key;

pub(crate) fn run(
    backend: Arc<dyn ProfileBackend>,
    user_sym: Box<dyn Symbolize + Send>,
    kernel_sym: Box<dyn Symbolize + Send>,
    interval: Duration,
    stop_rx: Receiver<()>,
    samples_tx: Sender<Vec<Sample>>,
) {
    let ticker = tick(interval);

    loop {
        select! {
            // Fires on explicit stop or when the profiler drops the sender.
            recv(stop_rx) -> _ => return,
            recv(ticker) -> _ => {
                let batch = match collect_once(&*backend, &*user_sym, &*kernel_sym) {
                    Some(batch) => batch,
                    None => continue,
                };
                match samples_tx.try_send(batch) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("consumer not ready; dropping sample batch");
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        }
    }
}

/// One tick's worth of work. `None` means the snapshot itself failed and
/// nothing should be published for this tick.
fn collect_once(
    backend: &dyn ProfileBackend,
    user_sym: &dyn Symbolize,
    kernel_sym: &dyn Symbolize,
) -> Option<Vec<Sample>> {
    let counts = match backend.snapshot_counts() {
        Ok(counts) => counts,
        Err(e) => {
            warn!("failed to snapshot counts map: {e}");
            return None;
        }
    };

    let timestamp = SystemTime::now();
    let mut batch = Vec::with_capacity(counts.len());

    for (key, count) in counts {
        let (user_id, kernel_id) = unpack_stack_key(key);

        let (user_pcs, kernel_pcs) = match backend.lookup_stacks(user_id, kernel_id) {
            Ok(stacks) => stacks,
            Err(e) => {
                warn!("failed to resolve stack ids ({user_id}, {kernel_id}): {e}");
                continue;
            }
        };

        let user_stack = match user_sym.symbolize(&user_pcs) {
            Ok(stack) => stack,
            Err(e) => {
                warn!("failed to symbolize user stack: {e}");
                continue;
            }
        };
        let kernel_stack = match kernel_sym.symbolize(&kernel_pcs) {
            Ok(stack) => stack,
            Err(e) => {
                warn!("failed to symbolize kernel stack: {e}");
                continue;
            }
        };

        batch.push(Sample { timestamp, user_stack, kernel_stack, count });
    }

    Some(batch)
}
