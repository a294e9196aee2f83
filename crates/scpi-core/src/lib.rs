//! `scpi-core`
//!
//! Wire-level building blocks for driving SCPI instruments with structured
//! commands and responses. Nothing in this crate performs I/O; the transport
//! core lives in `rust_scpi`.
//!
//! ## Layers (leaves first)
//!
//! - [`arg`]: `ArgStruct` field descriptors and typed [`Value`]s.
//! - [`record`]: `StructRecord` encode/decode engine and the [`ScpiRecord`]
//!   trait for typed records.
//! - [`mnemonic`]: command templates, `<Placeholder>` bindings and the
//!   catalogue [`CommandTree`].
//! - [`block`]: IEEE 488.2 arbitrary block framing.
//! - [`error`]: the shared [`ScpiError`] taxonomy.
//!
//! ## Example
//!
//! ```rust
//! use scpi_core::{ArgStruct, StructRecord};
//!
//! const FIELDS: &[ArgStruct] = &[
//!     ArgStruct::scalar_float("Rms"),
//!     ArgStruct::bool_list("Enabled", 2),
//! ];
//!
//! let rec = StructRecord::parse("Demo", FIELDS, "1.5,ON,0").unwrap();
//! assert_eq!(rec.float("Rms").unwrap(), Some(1.5));
//! assert_eq!(rec.to_scpi_string().unwrap(), "1.5,1,0");
//! ```

pub mod arg;
pub mod block;
pub mod conversions;
pub mod error;
pub mod mnemonic;
pub mod record;

pub use arg::{ArgStruct, FieldType, FloatExt, Sentinel, Value};
pub use error::{ErrorKind, ScpiError, ScpiResult};
pub use mnemonic::{compose, Bindings, CommandTree, GroupId};
pub use record::{ScpiRecord, StructRecord};
