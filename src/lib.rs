// Library root: re-exports all modules so integration tests and external
// consumers can access the crate's public API.

pub mod api;
pub mod auction;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod protocol;
pub mod store;
pub mod ws_server;

#[cfg(test)]
mod testutil;
