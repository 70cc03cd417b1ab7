//! Relay server and terminal clients for selcap.

pub mod agent;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod logging;
pub mod relay;
