//! Core data models for the transfer engine.
//!
//! These describe what is being moved (objects and their parts), the
//! destination-side multipart state, and the checkpoint rows persisted in
//! SQLite via `sqlx::FromRow`.

pub mod checkpoint;
pub mod multipart;
pub mod object;
pub mod part;
