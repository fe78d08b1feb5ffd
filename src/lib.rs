//! Support code of the `bridgetool` binary

pub mod exposition;
pub mod unittest;
