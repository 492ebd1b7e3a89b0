#[macro_use]
pub(crate) mod common;
pub mod cluster;
pub mod scheduler;

#[cfg(test)]
pub mod tests;
