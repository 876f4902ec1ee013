//! Shared library for the chat backend: broker and cache clients, the
//! Postgres repository, JWT verification, presence semantics, the wire
//! protocol, and the ambient app stack (config, logging, shutdown) common
//! to all four binaries.

pub mod broker;
pub mod cache;
pub mod config;
pub mod constants;
pub mod db;
pub mod jwt;
pub mod presence;
pub mod shutdown;
pub mod telemetry;
pub mod wire;
