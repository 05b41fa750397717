//! Transfer engine services, leaf-first:
//!
//! - `chunk_planner`: splits an object size into ordered parts
//! - `checkpoint_store`: durable per-part completion records (SQLite)
//! - `gate` / `metrics`: bounded admission and run-wide counters
//! - `object_planner`: skip / fresh / resume decision per object
//! - `part_worker`: moves one part and records it
//! - `orchestrator`: enumerates a source and drives objects to completion

pub mod checkpoint_store;
pub mod chunk_planner;
pub mod gate;
pub mod ignore;
pub mod listing;
pub mod metrics;
pub mod object_planner;
pub mod orchestrator;
pub mod part_worker;
pub mod retry;
