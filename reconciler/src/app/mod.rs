//! Application layer: options, command execution and reporting

pub mod options;
pub mod report;
pub mod run;
