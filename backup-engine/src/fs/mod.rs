//! File system operations: manifest enumeration and output directory setup.

pub mod protect;
pub mod walker;
