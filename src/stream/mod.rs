//! Incremental decoding of the line-delimited response stream and throttled
//! delivery of the accumulated text.

pub mod accumulator;
pub mod decoder;

pub use accumulator::DeltaAccumulator;
pub use decoder::{decode_stream, StreamDecoder};
