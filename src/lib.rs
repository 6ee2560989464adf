//! Filestash library
//!
//! Per-client file backup over a one-request-per-connection binary protocol

pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod net_async;
pub mod ops;
pub mod protocol;
pub mod protocol_core;
pub mod registry;
pub mod session;
pub mod store;
