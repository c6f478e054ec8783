//! # Futura Modbus - Register Coordinator for Futura Ventilation Units
//!
//! Polls a Futura heat-recovery unit over Modbus TCP, decodes its register
//! map into a typed [`Snapshot`] and issues command writes.
//!
//! ## Features
//!
//! - **Segmented reads**: fixed input/holding segments within the device's
//!   per-call limit, plus run-time discovery of connected ALFA satellites
//! - **Atomic snapshots**: a cycle either publishes a complete snapshot or
//!   leaves the previous one in place
//! - **Single-flight access**: polls, writes and post-write refreshes are
//!   serialized on one connection
//! - **Self-healing session**: any transport fault drops the socket; the next
//!   call reconnects
//!
//! ## Function Codes Used
//!
//! | Code | Function | Used for |
//! |------|----------|----------|
//! | 0x03 | Read Holding Registers | command state |
//! | 0x04 | Read Input Registers | telemetry, satellites |
//! | 0x06 | Write Single Register | mode, timers, setpoints, switches |
//! | 0x10 | Write Multiple Registers | 32-bit away timestamps |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futura_modbus::{Coordinator, FuturaConfig, FuturaResult, VentilationMode};
//!
//! #[tokio::main]
//! async fn main() -> FuturaResult<()> {
//!     let config = FuturaConfig::for_host("192.168.1.40");
//!     let coordinator = Coordinator::from_config(&config)?;
//!
//!     let snapshot = coordinator.poll().await?;
//!     println!("Outdoor: {} °C, mode {}", snapshot.telemetry.temp_outdoor, snapshot.mode_text);
//!
//!     let outcome = coordinator.set_mode(VentilationMode::Level2).await?;
//!     if let Some(snapshot) = outcome.snapshot() {
//!         println!("Mode now {}", snapshot.mode_text);
//!     }
//!
//!     coordinator.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Protocol layer
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants for the supported function codes
pub mod constants;

/// Stack-allocated PDU, request builder and response parsers
pub mod pdu;

/// Transport seam and the Modbus TCP session
pub mod transport;

// ============================================================================
// Device model
// ============================================================================

/// Static register map and satellite addressing
pub mod register_map;

/// Register decode primitives
pub mod codec;

/// Values of the flat key view
pub mod value;

/// Segmented poll-cycle reader
pub mod reader;

/// Typed snapshot and derived fields
pub mod snapshot;

/// Command validation and encoding
pub mod commands;

/// Poll/write coordinator and scheduler
pub mod coordinator;

/// Configuration loading
pub mod config;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use tokio;

pub use coordinator::{CommandOutcome, Coordinator};

pub use error::{FuturaError, FuturaResult};

pub use commands::{AwayWindow, Feature, HumidityPreset, PendingCommand, RegisterWrite};
pub use config::FuturaConfig;
pub use register_map::{ReadSegment, RegisterField, RegisterSpace};
pub use snapshot::{SatelliteReading, Snapshot, VentilationMode};
pub use value::FieldValue;

pub use reader::{RawCycle, SegmentedReader};
pub use transport::{ConnectionState, RegisterTransport, TcpSession, TransportStats};

pub use codec::{decode_i16, decode_u16, decode_u32, RegisterWindow};

pub use pdu::{ModbusPdu, PduBuilder};

/// Default connect and request timeout (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default poll period
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Futura Modbus v{} - register coordinator for Futura ventilation units", VERSION)
}
