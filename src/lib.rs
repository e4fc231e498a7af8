// ABOUTME: Library root for conveyor - exposes the deployment engine for the binary and tests.
// ABOUTME: The main binary is in main.rs.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod filestore;
pub mod model;
pub mod output;
pub mod planner;
pub mod provider;
pub mod repo;
pub mod store;
pub mod types;
