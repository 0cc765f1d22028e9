// Application ports and infrastructure adapters
pub mod app;
pub mod infra;

// Domain data shapes and per-game configuration
pub mod domain;

pub mod common;
pub mod config;
pub mod observability;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;
