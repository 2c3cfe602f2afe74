//! BLE GATT attribute server: a declarative service/characteristic model, a
//! byte-exact attribute-database compiler, and the runtime read/write/notify
//! dispatch that sits on top of it.
//!
//! The compiler ([`database::AttributeDatabase`]) and the runtime dispatcher
//! ([`server::GattServer`]) are independent: the former is a pure function of
//! its input, the latter is generic over the link-layer stack so it can run
//! against a host-side double in tests.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod database;
pub mod properties;
pub mod server;
pub mod uuid;

pub use database::{AttributeDatabase, CharacteristicId, CharacteristicSpec, CompiledCharacteristic, Service};
pub use properties::{att_flags, parse_properties, write_permissions_and_key_size_flags_from_properties};
pub use server::{
    AttLinkLayer, ConnHandle, GattServer, ReadCallback, ReadOutcome, SubscribeCallback, TransactionMode,
    WriteCallback, WriteError,
};
pub use uuid::Uuid;

/// Errors surfaced by the GATT attribute server's public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A read or write referenced a handle not present in the compiled
    /// database.
    UnknownHandle,
    /// A prepared write's accumulated fragments exceeded the per-write
    /// capacity.
    WriteOverflow,
}
