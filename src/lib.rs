//! # Rust SCPI
//!
//! Structured SCPI instrument control. Commands and responses are described
//! by explicit field tables (see [`scpi_core`]); this crate adds the
//! transport, the serialised I/O core and the generated command catalogue.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (`config/scpi.toml` plus
//!   `RUST_SCPI_*` environment overrides).
//! - **`tracing_init`**: Subscriber setup for binaries.
//! - **`transport`**: TCP, serial and simulated byte transports, and
//!   resource string parsing.
//! - **`io`**: [`Core`](io::Core), the per-instrument session that runs
//!   every exchange under one lock.
//! - **`catalog`**: Command templates, typed records and thin facades such
//!   as [`BluetoothMeas`](catalog::BluetoothMeas).
//!
//! ## Example
//!
//! ```rust
//! use rust_scpi::catalog::{BluetoothMeas, Repetition};
//! use rust_scpi::io::{Core, IoSettings};
//! use rust_scpi::transport::SimTransport;
//! use std::sync::Arc;
//!
//! let core = Arc::new(Core::new(Box::new(SimTransport::new()), IoSettings::default()));
//! let bt = BluetoothMeas::new(core).unwrap().with_instance(2);
//! bt.set_repetition(Repetition::SingleShot).unwrap();
//! assert_eq!(bt.get_repetition().unwrap(), Repetition::SingleShot);
//! ```

pub mod catalog;
pub mod config;
pub mod io;
pub mod tracing_init;
pub mod transport;

pub use scpi_core::{
    compose, ArgStruct, Bindings, CommandTree, ErrorKind, FieldType, FloatExt, GroupId,
    ScpiError, ScpiRecord, ScpiResult, Sentinel, StructRecord, Value,
};
