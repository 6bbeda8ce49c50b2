//! VICINITY: quota-aware area data aggregator
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod cache;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod engine;
pub mod quota;
pub mod service;
pub mod storage;
pub mod types;
