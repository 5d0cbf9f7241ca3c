use std::string::FromUtf8Error;

use bytes::{Buf, Bytes};
use thiserror::Error;

/// Read the value from the buffer.
///
/// If [DecodeError::Short] is returned, the caller should try again with more data.
/// The buffer is advanced past the decoded value, leaving the remainder for the next field.
pub trait Decode: Sized {
	/// Decode the value from the given buffer.
	fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError>;
}

/// A decode error.
#[derive(Error, Debug, Clone)]
pub enum DecodeError {
	#[error("short buffer")]
	Short,

	#[error("long buffer")]
	Long,

	#[error("invalid string")]
	InvalidString(#[from] FromUtf8Error),

	#[error("invalid path")]
	InvalidPath,

	#[error("invalid type: {0}")]
	InvalidType(u64),

	#[error("invalid value")]
	InvalidValue,

	#[error("bounds exceeded")]
	BoundsExceeded,
}

impl Decode for u8 {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match r.has_remaining() {
			true => Ok(r.get_u8()),
			false => Err(DecodeError::Short),
		}
	}
}

impl Decode for String {
	/// Decode a string with a varint length prefix.
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let v = Bytes::decode(r)?;
		let str = String::from_utf8(v.to_vec())?;

		Ok(str)
	}
}

impl Decode for Bytes {
	/// Decode a buffer with a varint length prefix.
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let len = usize::decode(r)?;
		if r.remaining() < len {
			return Err(DecodeError::Short);
		}

		Ok(r.copy_to_bytes(len))
	}
}

impl<T: Decode> Decode for Vec<T> {
	/// Decode a varint count followed by that many items.
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let count = usize::decode(r)?;

		// Every item takes at least one byte, so don't let a bogus count allocate.
		if count > r.remaining() {
			return Err(DecodeError::Short);
		}

		let mut items = Vec::with_capacity(count);
		for _ in 0..count {
			items.push(T::decode(r)?);
		}

		Ok(items)
	}
}
