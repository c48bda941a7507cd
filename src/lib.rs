//! scanvault - Scan orchestration and result caching library
//!
//! This library exposes the scan pipeline: command construction, process
//! execution, XML result parsing, the two-tier result store with its
//! history index, and report export.

pub mod cli;
pub mod command;
pub mod config;
pub mod constants;
pub mod errors;
pub mod export;
pub mod history;
pub mod logging;
pub mod models;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod runner;
pub mod store;
