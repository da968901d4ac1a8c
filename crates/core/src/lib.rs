//! Pure domain logic for the quboflow job pipeline.
//!
//! Nothing in this crate performs I/O: it defines the job model, the wire
//! payloads published on job channels, the error taxonomy, and the three
//! pure stages of the pipeline (parameter binding, dataset decoding and
//! batching, result normalization).

pub mod binding;
pub mod dataset;
pub mod error;
pub mod job;
pub mod messages;
pub mod normalize;
pub mod types;
