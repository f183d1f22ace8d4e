//! # Cycle Analysis Engine
//!
//! Machine-event analysis engine for industrial machine monitoring.
//!
//! This crate turns raw cycle start/stop events into operation cycles,
//! keeps them associated with the operation slot timeline of each machine,
//! maintains the gap records between consecutive cycles, and incrementally
//! updates the aggregate summaries the reporting side reads.
//!
//! ## Features
//!
//! - **Cycle Detection**: Match start and stop events into full and
//!   partial operation cycles, with estimated boundaries where an event is
//!   missing
//! - **Slot Timeline**: Non-overlapping operation slots per machine, with
//!   create/split/extend/merge maintenance operations
//! - **Consolidation**: Idempotent re-association of cycles to slots,
//!   counter recomputation and average cycle time derivation
//! - **Gap Tracking**: Between-cycles records with percentage deviation
//!   from the nominal pallet-changing or loading/unloading duration
//! - **Aggregates**: Delta-buffered cycle count and duration summaries,
//!   flushed at transaction boundaries
//! - **Pipeline**: Per-machine ordered modification processing with
//!   snapshot rollback on failure
//!
//! ## Architecture
//!
//! - [`models`]: Identifiers, time ranges, machines, cycles, slots and
//!   summary rows
//! - [`store`]: Per-machine arena holding the timeline entities
//! - [`engine`]: The public facade the collaborators call
//! - [`accumulators`]: Incrementally-maintained summary rows
//! - [`pipeline`]: Ordered, transactional modification processing
//! - [`config`]: Analysis tuning knobs, loadable from TOML

pub mod accumulators;
pub mod config;
mod consolidation;
mod detection;
pub mod engine;
pub mod error;
mod gaps;
pub mod models;
pub mod pipeline;
pub mod store;
mod timeline;

pub use config::AnalysisConfig;
pub use engine::Engine;
pub use error::{DetectionError, DetectionResult};
pub use pipeline::{AnalysisStatus, Modification, ModificationKind, Pipeline};
