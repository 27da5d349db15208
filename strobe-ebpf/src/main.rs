//! Kernel-side sampling probe.
//!
//! One instance of [`on_sample`] is attached to a software cpu-clock perf
//! event per online CPU. On every timer expiry the probe walks the stack of
//! the task that was interrupted, once for the user stack, once for the
//! kernel stack, and bumps an accumulating per-CPU histogram keyed by the
//! packed pair of stack-ids. Userspace drains the histogram periodically;
//! nothing is ever removed here, the LRU maps shed old entries on their own.
//!
//! Both maps are read by userspace through their aya handles:
//!
//! - `STACK_TRACES`: stack-id → up to 127 frame PCs, leaf first, zero padded
//! - `COUNTS`: packed (user_id << 32 | kernel_id) → per-CPU sample count
//!
//! A failed stack walk on one side is recorded as the `0xFFFFFFFF` sentinel
//! in that half of the key; samples where both walks fail are dropped.

#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{map, perf_event},
    maps::{LruPerCpuHashMap, StackTrace},
    programs::PerfEventContext,
};
use strobe_common::{
    pack_stack_key, BPF_F_REUSE_STACKID, BPF_F_USER_STACK, MAX_COUNT_ENTRIES, MAX_STACK_TRACES,
    STACK_ID_MISSING,
};

#[map]
static STACK_TRACES: StackTrace = StackTrace::with_max_entries(MAX_STACK_TRACES, 0);

#[map]
static COUNTS: LruPerCpuHashMap<u64, u64> = LruPerCpuHashMap::with_max_entries(MAX_COUNT_ENTRIES, 0);

#[perf_event]
pub fn on_sample(ctx: PerfEventContext) -> u32 {
    match try_on_sample(&ctx) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn try_on_sample(ctx: &PerfEventContext) -> Result<(), i64> {
    let user_id = capture_stack(ctx, BPF_F_USER_STACK | BPF_F_REUSE_STACKID);
    let kernel_id = capture_stack(ctx, BPF_F_REUSE_STACKID);

    // Nothing usable was captured on either side; drop the sample.
    if user_id == STACK_ID_MISSING && kernel_id == STACK_ID_MISSING {
        return Ok(());
    }

    let key = pack_stack_key(user_id, kernel_id);

    unsafe {
        if let Some(count) = COUNTS.get_ptr_mut(&key) {
            *count += 1;
        } else {
            COUNTS.insert(&key, &1, 0)?;
        }
    }

    Ok(())
}

fn capture_stack(ctx: &PerfEventContext, flags: u64) -> u32 {
    match unsafe { STACK_TRACES.get_stackid(ctx, flags) } {
        Ok(id) if id >= 0 => id as u32,
        _ => STACK_ID_MISSING,
    }
}

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
