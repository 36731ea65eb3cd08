//! Trellis driver library: the read → parse → verify → print/emit
//! pipeline behind the `trellis` binary.

pub mod pipeline;

pub use pipeline::{Emit, Input, PipelineOptions, check, load, run};
