//! Byte stream to message pipeline.
//!
//! Raw response chunks flow through [`FrameDecoder`] (line framing across
//! chunk boundaries), [`interpret`] (payload classification) and
//! [`Assembler`] (message state). Nothing here awaits; the exchange driver
//! feeds chunks in arrival order.

mod assembler;
mod decoder;
mod interpreter;

pub use assembler::{Assembler, Step};
pub use decoder::{Frame, FrameDecoder, Frames, DATA_PREFIX};
pub use interpreter::{interpret, Event, DONE_SENTINEL};
pub(crate) use interpreter::valid_sources;
