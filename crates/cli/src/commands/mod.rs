//! Subcommand implementations

pub mod domains;
pub mod plan;
pub mod pods;
pub mod status;
