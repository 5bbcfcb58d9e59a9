pub mod config;
pub mod error;
pub mod plans;
pub mod types;
