use bytes::{Buf, BufMut};

use crate::{
	coding::{BoundsExceeded, Decode, DecodeError, Encode},
	lite::Message,
};

/// Sent by the client to start the session, listing the versions it speaks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientSetup {
	pub versions: Vec<u64>,
}

impl Message for ClientSetup {
	fn decode_msg<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let versions = Vec::<u64>::decode(r)?;
		Ok(Self { versions })
	}

	fn encode_msg<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.versions.encode(w)
	}
}

/// Sent by the server in reply, picking one of the client's versions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSetup {
	pub version: u64,
}

impl Message for ServerSetup {
	fn decode_msg<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let version = u64::decode(r)?;
		Ok(Self { version })
	}

	fn encode_msg<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.version.encode(w)
	}
}
