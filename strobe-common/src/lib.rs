#![no_std]

// Constants and key encoding shared between the eBPF probe and userspace.
//
// The probe packs the two stack-ids produced per sample into a single u64
// map key; the user side unpacks it when draining the counts map. The
// layout must stay byte-exact on both sides.

/// Maximum number of frames stored per stack trace in the stacks map.
pub const MAX_STACK_DEPTH: usize = 127;

/// Capacity of the kernel stack-trace map (LRU on overflow).
pub const MAX_STACK_TRACES: u32 = 16_384;

/// Capacity of the per-CPU counts map (LRU on overflow).
pub const MAX_COUNT_ENTRIES: u32 = 65_536;

/// Sentinel stack-id meaning "no stack captured for this side".
pub const STACK_ID_MISSING: u32 = 0xFFFF_FFFF;

/// BPF_F_USER_STACK: walk the user stack instead of the kernel stack.
pub const BPF_F_USER_STACK: u64 = 0x100;

/// BPF_F_REUSE_STACKID: overwrite a colliding hash bucket instead of failing.
pub const BPF_F_REUSE_STACKID: u64 = 0x400;

/// Pack a (user, kernel) stack-id pair into a counts-map key.
///
/// The user id occupies the high 32 bits, the kernel id the low 32 bits.
#[inline]
pub const fn pack_stack_key(user_id: u32, kernel_id: u32) -> u64 {
    ((user_id as u64) << 32) | kernel_id as u64
}

/// Split a counts-map key back into its (user, kernel) stack-ids.
#[inline]
pub const fn unpack_stack_key(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}
