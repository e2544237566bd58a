//! # ridge-core
//!
//! Core types for the RIDGE metadynamics engine.
//!
//! This crate defines the abstractions shared by the grid and bias layers:
//! - **Errors**: unified error handling with `RidgeError`
//! - **Values**: the tagged CV value variants and their distance metrics
//! - **Descriptors**: static CV geometry and the `EngineContext` seam to
//!   the hosting MD engine
//! - **Streams**: the whitespace-token cursor for formatted state and the
//!   binary `MemoryStream` for in-memory checkpoints

pub mod colvar;
pub mod errors;
pub mod memstream;
pub mod parse;
pub mod value;

pub use colvar::{Colvar, EngineContext};
pub use errors::{Result, RidgeError};
pub use memstream::{Decode, Encode, MemoryStream};
pub use parse::TokenCursor;
pub use value::{ColvarKind, ColvarValue};
