//! ocla — a terminal coding assistant with persistent sessions and
//! permission-gated tools.
//!
//! This library crate exposes the modules so integration tests
//! (under `tests/`) can access them.

pub mod agent;
pub mod cli;
pub mod config;
pub mod context;
pub mod logs;
pub mod models;
pub mod permission;
pub mod session;
pub mod tools;
pub mod utils;
