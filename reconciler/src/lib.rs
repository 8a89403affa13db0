//! rootsync Library
//!
//! Deployment reconciler for a git-backed web root.

pub mod app;
pub mod cli;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod remote;
pub mod storage;
pub mod utils;
