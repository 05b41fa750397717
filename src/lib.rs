//! Resumable chunked transfers between S3-compatible storage, the local
//! filesystem and HTTP sources.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod storage;
