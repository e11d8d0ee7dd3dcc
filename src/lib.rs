//! Market Mayhem: turn-based portfolio game engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod ledger;
pub mod replay;
pub mod signals;
pub mod behavior;
pub mod providers;
pub mod engine;
pub mod storage;
pub mod api;
