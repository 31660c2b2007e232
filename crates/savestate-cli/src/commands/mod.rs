pub mod common;
pub mod completions;
pub mod config;
pub mod dead_letters;
pub mod profile;
pub mod queue;
