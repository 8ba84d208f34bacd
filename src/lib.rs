pub mod analysis;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod observability;
pub mod server;
pub mod session;
pub mod sources;
pub mod storage;
