//! Radio timeslot multiplexing and the Enhanced ShockBurst link that runs
//! inside each granted slot.
//!
//! [`timeslot::TimeslotSession`] owns the conversation with the proprietary
//! radio arbiter; [`esb::Esb`] owns the link protocol once a slot has the
//! radio in hand. Neither type talks to hardware registers directly — both
//! are generic over a backend trait so the protocol logic is host-testable.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod addressing;
pub mod constants;
pub mod esb;
pub mod timeslot;
pub mod tx_power;

pub use addressing::RadioAddress;
pub use esb::{Esb, EsbConfig, Frame, Mode, Phy, RadioBackend, TxStatus};
pub use timeslot::{
    Action, ArbiterApi, ClientEvent, Priority, SessionCallbacks, SessionId, SessionState, Signal,
    SlotRequest, TimeslotSession,
};
pub use tx_power::{pct_to_dbm, pct_to_power_level, TxPowerLevel};

/// Errors surfaced by the radio timeslot engine's public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// [`TimeslotSession::end_this_timeslot`] was called while the session
    /// had no slot open or pending.
    NoActiveOrPendingSlot,
    /// The session was used before [`TimeslotSession::open`].
    SessionNotOpen,
}
