//! CLI subcommand implementations

pub mod load;
pub mod query;
pub mod send;
