pub mod commands;
pub mod common;
pub mod config;
pub mod output;
pub mod snapshot;

pub type Error = crate::common::error::GridqError;
pub type Result<T> = std::result::Result<T, Error>;

pub use schedd;
