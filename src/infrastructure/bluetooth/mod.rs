//! Bluetooth Module
//!
//! Serial-port-like byte link over a BLE GATT connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      BleTransport                        │
//! │  (public API: ports, connect, send, events, stats)       │
//! └───────┬──────────────┬──────────────┬──────────────┬─────┘
//!         │              │              │              │
//!         ▼              ▼              ▼              ▼
//! ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐
//! │  Registry  │  │ Connection │  │   Writer   │  │  Events  │
//! │            │  │            │  │            │  │          │
//! │ - ports    │  │ - GATT     │  │ - FIFO     │  │ - bus    │
//! │ - paths    │  │ - catalog  │  │ - one at a │  │ - status │
//! │            │  │   match    │  │   time     │  │   sink   │
//! └────────────┘  └─────┬──────┘  └─────┬──────┘  └──────────┘
//!                       │               │
//!                       ▼               ▼
//!              ┌──────────────────────────────┐
//!              │  BluetoothAdapter (platform) │
//!              └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`adapter`] - Platform adapter contract and handle types
//! - [`catalog`] - Supported module families by service UUID
//! - [`registry`] - Known peripherals and their `bluetooth_<n>` paths
//! - [`state`] - Connection lifecycle state machine
//! - [`session`] - Per-connection handles, listeners and counters
//! - [`connection`] - GATT handshake
//! - [`writer`] - Serialized write queue
//! - [`events`] - Event bus and user-facing status messages
//! - [`service`] - Main transport coordinator
//! - [`mock`] - In-memory adapter

pub mod adapter;
pub mod catalog;
pub mod connection;
pub mod events;
pub mod mock;
pub mod registry;
pub mod service;
pub mod session;
pub mod state;
pub mod writer;

// Re-export main service for convenience
pub use service::BleTransport;
