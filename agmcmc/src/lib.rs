pub mod config;
pub mod ops;
