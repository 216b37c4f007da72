//! I/O adapters for bootstrap commands.

pub mod atomic;
pub mod cloud;
pub mod config;
pub mod output_store;
pub mod patch;
pub mod paths;
pub mod process;
pub mod tfvars;
