use bytes::{Buf, BufMut};

use crate::{
	coding::{BoundsExceeded, Decode, DecodeError, Encode},
	lite::Message,
	Error, Path,
};

/// Sent by the subscriber to request all future groups for the given track.
///
/// Groups will use the provided ID instead of the full track name, to save bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribe {
	pub id: u64,
	pub broadcast: Path,
	pub track: String,
}

impl Message for Subscribe {
	fn decode_msg<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let id = u64::decode(r)?;
		let broadcast = Path::decode(r)?;
		let track = String::decode(r)?;

		Ok(Self { id, broadcast, track })
	}

	fn encode_msg<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.id.encode(w)?;
		self.broadcast.encode(w)?;
		self.track.encode(w)
	}
}

/// Sent by the publisher when the track ends.
///
/// The subscriber waits for `groups` group streams before finishing the track,
/// since they travel on separate streams and may arrive after this message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeDone {
	pub groups: u64,

	/// None if the track finished cleanly.
	pub error: Option<Error>,
}

impl Message for SubscribeDone {
	fn decode_msg<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let groups = u64::decode(r)?;

		// Zero means no error, otherwise the error code plus one.
		let error = match u32::decode(r)? {
			0 => None,
			code => Some(Error::from_code(code - 1)),
		};

		Ok(Self { groups, error })
	}

	fn encode_msg<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.groups.encode(w)?;

		match &self.error {
			None => 0u32.encode(w),
			Some(err) => err.to_code().checked_add(1).ok_or(BoundsExceeded)?.encode(w),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn subscribe() {
		let msg = Subscribe {
			id: 7,
			broadcast: Path::new("live/room").unwrap(),
			track: "video".to_string(),
		};

		let encoded = msg.encode_bytes().unwrap();
		assert_eq!(encoded.as_ref(), b"\x11\x07\x09live/room\x05video");
		assert_eq!(Subscribe::decode(&mut encoded.clone()).unwrap(), msg);
	}

	#[test]
	fn subscribe_done() {
		let clean = SubscribeDone { groups: 3, error: None };
		let encoded = clean.encode_bytes().unwrap();
		assert_eq!(encoded.as_ref(), [0x02, 0x03, 0x00]);
		assert_eq!(SubscribeDone::decode(&mut encoded.clone()).unwrap(), clean);

		let rejected = SubscribeDone {
			groups: 0,
			error: Some(Error::NotFound),
		};
		let encoded = rejected.encode_bytes().unwrap();
		assert_eq!(SubscribeDone::decode(&mut encoded.clone()).unwrap(), rejected);
	}
}
