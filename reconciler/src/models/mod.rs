//! Data model

pub mod deployment;
