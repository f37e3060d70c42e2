// Counting and annotation pipelines

pub mod adapter;
pub mod annotate;
pub mod counter;
pub mod error;
pub mod image;
pub mod types;
pub mod video;
