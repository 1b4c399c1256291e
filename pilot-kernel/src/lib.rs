//! Pilot kernel: registry, lifecycle coordination and status supervision
//! of PI data-collection interfaces.

pub mod activation;
pub mod bus;
pub mod config;
pub mod document;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod models;
pub mod mqtt;
pub mod network;
pub mod probe;
pub mod registry;
pub mod simulation;
