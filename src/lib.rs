//! captable: capitalization table modeling and exit waterfalls.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod parser;
pub mod engine;
pub mod storage;
