//! # Device Registry
//!
//! Identification and discovery registry for laboratory instrument buses.
//! Bus servers announce devices by (bus, channel) only; this crate works out
//! *what* is attached, keeps the authoritative map from channels to stable
//! device names, and tells every interested consumer about connects and
//! disconnects regardless of whether the consumer started before or after
//! the hardware appeared.
//!
//! ## Crate Structure
//!
//! - **`arbiter`**: Registry of externally supplied fallback identification
//!   procedures and the serialized trial chain over them.
//! - **`bus`**: Trait boundary to the external collaborators: bus servers,
//!   the bus directory, the outbound messenger, and ident procedures.
//! - **`config`**: Layered settings (TOML file + environment) via `figment`.
//! - **`error`**: `BusError` and `RegistryError` definitions.
//! - **`hub`**: Per-name subscriber lists and notification fan-out.
//! - **`ident`**: The identification negotiator: standard dialects, parse
//!   rules, and the query loop over them.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`manager`**: The actor task owning all state; its mailbox serializes
//!   identification work process-wide.
//! - **`messages`**: Bus events, the manager command protocol, and the
//!   notification payload.
//! - **`mock`**: Simulated collaborators for tests and the demo binary.
//! - **`registry`**: The device table and its per-channel state machine.

pub mod arbiter;
pub mod bus;
pub mod config;
pub mod error;
pub mod hub;
pub mod ident;
pub mod logging;
pub mod manager;
pub mod messages;
pub mod mock;
pub mod registry;
