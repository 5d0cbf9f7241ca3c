use bytes::{Buf, BufMut, Bytes};

use crate::{
	coding::{BoundsExceeded, Decode, DecodeError, Encode},
	lite::Message,
	Error,
};

/// The header at the start of each group stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupHeader {
	// The subscribe ID.
	pub subscribe: u64,

	// The group sequence number
	pub sequence: u64,
}

impl Message for GroupHeader {
	fn decode_msg<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(Self {
			subscribe: u64::decode(r)?,
			sequence: u64::decode(r)?,
		})
	}

	fn encode_msg<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.subscribe.encode(w)?;
		self.sequence.encode(w)
	}
}

/// Everything after the header on a group stream.
///
/// A stream that ends without [GroupMessage::Fin] or [GroupMessage::Abort] was truncated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupMessage {
	Frame(Bytes),
	Fin,
	Abort(Error),
}

impl Decode for GroupMessage {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match u64::decode(r)? {
			0 => Ok(Self::Frame(Bytes::decode(r)?)),
			1 => Ok(Self::Fin),
			2 => Ok(Self::Abort(Error::from_code(u32::decode(r)?))),
			t => Err(DecodeError::InvalidType(t)),
		}
	}
}

impl Encode for GroupMessage {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		match self {
			Self::Frame(payload) => {
				0u64.encode(w)?;
				payload.encode(w)
			}
			Self::Fin => 1u64.encode(w),
			Self::Abort(err) => {
				2u64.encode(w)?;
				err.to_code().encode(w)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header() {
		let header = GroupHeader {
			subscribe: 1,
			sequence: 300,
		};

		let encoded = header.encode_bytes().unwrap();
		assert_eq!(encoded.as_ref(), [0x03, 0x01, 0x41, 0x2c]);
		assert_eq!(GroupHeader::decode(&mut encoded.clone()).unwrap(), header);
	}

	#[test]
	fn messages() {
		let mut buf = bytes::BytesMut::new();
		GroupMessage::Frame(Bytes::from_static(b"hi")).encode(&mut buf).unwrap();
		GroupMessage::Abort(Error::Expired).encode(&mut buf).unwrap();
		GroupMessage::Fin.encode(&mut buf).unwrap();
		assert_eq!(buf.as_ref(), [0x00, 0x02, b'h', b'i', 0x02, 0x03, 0x01]);

		let mut buf = buf.freeze();
		assert_eq!(
			GroupMessage::decode(&mut buf).unwrap(),
			GroupMessage::Frame(Bytes::from_static(b"hi"))
		);
		assert_eq!(GroupMessage::decode(&mut buf).unwrap(), GroupMessage::Abort(Error::Expired));
		assert_eq!(GroupMessage::decode(&mut buf).unwrap(), GroupMessage::Fin);
		assert!(matches!(GroupMessage::decode(&mut buf), Err(DecodeError::Short)));
	}
}
