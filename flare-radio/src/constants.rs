#![allow(dead_code)]

//! Fixed protocol-level budgets, not meant to be tuned per-deployment. Values
//! that a board integrator legitimately might want to change live in
//! [`crate::config`] instead.

/// Time reserved before the arbiter reclaims the radio, during which the
/// engine must have finished whatever it was doing ("extension decision
/// point" minus "slot-end point").
pub const EARLY_EXPIRE_US: u32 = 700;

/// Additional lead time subtracted from the extension decision point so the
/// engine's own processing (deciding whether to extend, arming the next
/// compare channel) fits before `EARLY_EXPIRE_US` begins.
pub const PROCESSING_LEAD_US: u32 = 2_400;

/// Longest legal single ESB packet duration plus margin; the send semaphore
/// never waits longer than this for a TX-complete signal.
pub const TX_WAIT_TIMEOUT_US: u64 = 2_400;

/// Capacity of the IRQ-to-softirq bounce FIFO.
pub const IRQ_FIFO_CAPACITY: usize = 5;

/// Fixed prefix shared by every flat 16-bit address, and the constant upper
/// two bytes of the underlying 4-byte radio base address.
pub const ADDRESS_PREFIX: u8 = 0xE7;
