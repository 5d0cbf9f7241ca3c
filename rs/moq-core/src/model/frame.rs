use std::fmt;

use bytes::Bytes;

use crate::{Error, Result};

/// A unit of data, representing a point in time.
///
/// This is often a video frame or a packet of audio samples.
/// The payload is immutable and cheap to clone, which is how a frame is fanned out to every consumer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Frame {
	payload: Bytes,
}

impl Frame {
	pub fn new<B: Into<Bytes>>(payload: B) -> Self {
		Self {
			payload: payload.into(),
		}
	}

	pub fn payload(&self) -> &Bytes {
		&self.payload
	}

	pub fn into_payload(self) -> Bytes {
		self.payload
	}

	/// Interpret the payload as UTF-8.
	pub fn as_str(&self) -> Result<&str> {
		std::str::from_utf8(&self.payload).map_err(|_| Error::Decode)
	}

	pub fn len(&self) -> usize {
		self.payload.len()
	}

	pub fn is_empty(&self) -> bool {
		self.payload.is_empty()
	}
}

impl From<Bytes> for Frame {
	fn from(payload: Bytes) -> Self {
		Self { payload }
	}
}

impl From<Vec<u8>> for Frame {
	fn from(payload: Vec<u8>) -> Self {
		Self::new(payload)
	}
}

impl From<&[u8]> for Frame {
	fn from(payload: &[u8]) -> Self {
		Self::new(Bytes::copy_from_slice(payload))
	}
}

impl From<String> for Frame {
	fn from(payload: String) -> Self {
		Self::new(payload)
	}
}

impl From<&str> for Frame {
	fn from(payload: &str) -> Self {
		Self::new(Bytes::copy_from_slice(payload.as_bytes()))
	}
}

impl From<Frame> for Bytes {
	fn from(frame: Frame) -> Self {
		frame.payload
	}
}

impl fmt::Debug for Frame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Frame").field("size", &self.payload.len()).finish()
	}
}
