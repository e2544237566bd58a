//! # ridge-bias
//!
//! The metadynamics bias: hill deposition and bookkeeping, well-tempered
//! and ensemble-biased scaling, reflection and interval limits, grid
//! projection, multiple-walker coordination over the file system, and
//! state checkpointing in both formatted-text and binary form.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   values per step   ┌───────────────┐
//! │ MD engine  │ ──────────────────▶ │   MetaBias    │
//! │ (external) │ ◀────────────────── │  orchestrator │
//! └────────────┘   energy + forces   └──────┬────────┘
//!                                           │
//!                       ┌───────────────────┼──────────────────┐
//!                 ┌─────▼─────┐      ┌──────▼──────┐   ┌───────▼────────┐
//!                 │HillEnsemble│      │ Reflection/ │   │ Replica        │
//!                 │hills+grids │      │ Interval    │   │ Coordinator    │
//!                 └───────────┘      └─────────────┘   └────────────────┘
//! ```
//!
//! The engine side of the seam is the `EngineContext` trait from
//! `ridge-core`; everything below it is file-system and pure computation.

pub mod bias;
pub mod ensemble;
pub mod hill;
pub mod limits;
pub mod params;
pub mod replica;
pub mod state;

pub use bias::MetaBias;
pub use ensemble::{HillEnsemble, ReadOptions};
pub use hill::{hills_energy, hills_force, Hill, HILL_EXPONENT_CUTOFF};
pub use limits::{IntervalLimits, ReflectionKind, ReflectionLimits};
pub use params::MetaParams;
pub use replica::{ReplicaCoordinator, ReplicaShadow};
