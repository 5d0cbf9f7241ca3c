use std::fmt::Debug;

use bytes::{Buf, BufMut, BytesMut};

use crate::coding::{BoundsExceeded, Decode, DecodeError, Encode};

/// A control message, prefixed by the size of its body.
///
/// The size prefix lets the body be decoded in isolation: a message that reads past its body
/// or leaves bytes behind is malformed.
pub trait Message: Sized + Debug {
	fn decode_msg<R: Buf>(r: &mut R) -> Result<Self, DecodeError>;
	fn encode_msg<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded>;
}

impl<T: Message> Encode for T {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		let mut body = BytesMut::new();
		self.encode_msg(&mut body)?;

		body.len().encode(w)?;
		w.put(body);

		Ok(())
	}
}

impl<T: Message> Decode for T {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let size = usize::decode(r)?;
		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		let mut body = r.copy_to_bytes(size);
		let msg = match T::decode_msg(&mut body) {
			Ok(msg) => msg,
			// The whole body is here, so running out is malformed rather than a reason to wait.
			Err(DecodeError::Short) => return Err(DecodeError::InvalidValue),
			Err(err) => return Err(err),
		};

		if body.has_remaining() {
			return Err(DecodeError::Long);
		}

		Ok(msg)
	}
}
