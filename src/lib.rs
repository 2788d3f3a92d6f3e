pub mod api;
pub mod cli;
pub mod config;
pub mod connector;
pub mod dialect;
pub mod dispatch;
pub mod error;
pub mod ipc;
pub mod manager;
pub mod registry;
pub mod tabular;
