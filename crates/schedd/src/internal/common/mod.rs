#[macro_use]
pub(crate) mod trace;

pub(crate) mod data_structures;
pub(crate) mod error;
pub mod index;
pub mod resources;

pub use data_structures::{Map, Set};
