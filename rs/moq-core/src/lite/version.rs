use std::fmt;

use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::coding::{BoundsExceeded, Decode, DecodeError, Encode};

/// The versions of the lite protocol we support, negotiated during setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum Version {
	Lite01 = 0xff0bad01,
}

impl Version {
	/// Every supported version, in order of preference.
	pub const ALL: [Version; 1] = [Version::Lite01];
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Lite01 => write!(f, "moq-lite-01"),
		}
	}
}

/// The first message on every bidirectional stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum ControlType {
	Session = 0,
	Subscribe = 2,
}

impl Decode for ControlType {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let t = u64::decode(r)?;
		t.try_into().map_err(|_| DecodeError::InvalidType(t))
	}
}

impl Encode for ControlType {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		u64::from(*self).encode(w)
	}
}

/// The first message on every unidirectional stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum DataType {
	Group = 0,
}

impl Decode for DataType {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let t = u64::decode(r)?;
		t.try_into().map_err(|_| DecodeError::InvalidType(t))
	}
}

impl Encode for DataType {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		u64::from(*self).encode(w)
	}
}
