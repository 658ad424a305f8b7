#![cfg_attr(test, allow(clippy::unwrap_used, reason = "test code can panic on errors"))]

pub mod assertions;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod log;
pub mod scenarios;
pub mod simulator;
pub mod staging;
pub mod suite;
