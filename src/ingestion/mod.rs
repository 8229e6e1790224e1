//! Measurement ingestion - normalize probe results and load them into the analytics store

pub mod address;
pub mod batch;
pub mod driver;
pub mod error;
pub mod normalize;
pub mod source;
pub mod types;
pub mod write;

pub use error::*;
pub use types::*;
