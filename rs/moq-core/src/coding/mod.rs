//! Wire encoding shared by every message: QUIC-style varints, length-prefixed
//! strings and byte buffers, and buffered stream [Reader]/[Writer] wrappers.
mod decode;
mod encode;
mod reader;
mod varint;
mod writer;

pub use decode::*;
pub use encode::*;
pub use reader::*;
pub use varint::*;
pub use writer::*;
