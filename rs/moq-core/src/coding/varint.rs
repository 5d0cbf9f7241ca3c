use std::fmt;

use bytes::{Buf, BufMut};
use thiserror::Error;

use super::{Decode, DecodeError, Encode};

/// The value does not fit in a varint: it is negative or larger than 2^62-1.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("value out of range")]
pub struct BoundsExceeded;

/// An integer less than 2^62.
///
/// Values of this type are suitable for encoding as QUIC variable-length integers.
/// The top two bits of the first byte select the width (1, 2, 4 or 8 bytes) and the
/// remaining bits hold the value, big-endian.
///
/// The value is always held as a `u64`, so nothing above 2^53 loses precision.
#[derive(Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarInt(u64);

impl VarInt {
	/// The largest representable value.
	pub const MAX: Self = Self((1 << 62) - 1);
	/// The smallest representable value.
	pub const ZERO: Self = Self(0);

	/// Construct a `VarInt` infallibly.
	pub const fn from_u32(x: u32) -> Self {
		Self(x as u64)
	}

	/// Construct a `VarInt`, returning None if the value is too large.
	pub const fn from_u64(x: u64) -> Option<Self> {
		if x <= Self::MAX.0 {
			Some(Self(x))
		} else {
			None
		}
	}

	/// Extract the integer value.
	pub const fn into_inner(self) -> u64 {
		self.0
	}

	/// The number of bytes this value occupies on the wire.
	pub const fn size(self) -> usize {
		if self.0 < 1 << 6 {
			1
		} else if self.0 < 1 << 14 {
			2
		} else if self.0 < 1 << 30 {
			4
		} else {
			8
		}
	}
}

impl From<VarInt> for u64 {
	fn from(x: VarInt) -> Self {
		x.0
	}
}

impl From<u8> for VarInt {
	fn from(x: u8) -> Self {
		Self(x.into())
	}
}

impl From<u16> for VarInt {
	fn from(x: u16) -> Self {
		Self(x.into())
	}
}

impl From<u32> for VarInt {
	fn from(x: u32) -> Self {
		Self(x.into())
	}
}

impl TryFrom<u64> for VarInt {
	type Error = BoundsExceeded;

	/// Succeeds iff `x` < 2^62
	fn try_from(x: u64) -> Result<Self, BoundsExceeded> {
		Self::from_u64(x).ok_or(BoundsExceeded)
	}
}

impl TryFrom<usize> for VarInt {
	type Error = BoundsExceeded;

	fn try_from(x: usize) -> Result<Self, BoundsExceeded> {
		Self::try_from(x as u64)
	}
}

impl TryFrom<i64> for VarInt {
	type Error = BoundsExceeded;

	fn try_from(x: i64) -> Result<Self, BoundsExceeded> {
		let x = u64::try_from(x).map_err(|_| BoundsExceeded)?;
		Self::try_from(x)
	}
}

impl TryFrom<VarInt> for usize {
	type Error = BoundsExceeded;

	fn try_from(x: VarInt) -> Result<Self, BoundsExceeded> {
		usize::try_from(x.0).map_err(|_| BoundsExceeded)
	}
}

impl fmt::Debug for VarInt {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl fmt::Display for VarInt {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl Decode for VarInt {
	/// Decode a varint from the given reader.
	///
	/// Nothing is consumed unless the whole varint is available.
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		if !r.has_remaining() {
			return Err(DecodeError::Short);
		}

		let size = 1 << (r.chunk()[0] >> 6);
		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		let x = match size {
			1 => u64::from(r.get_u8() & 0x3f),
			2 => u64::from(r.get_u16() & 0x3fff),
			4 => u64::from(r.get_u32() & 0x3fff_ffff),
			_ => r.get_u64() & 0x3fff_ffff_ffff_ffff,
		};

		Ok(Self(x))
	}
}

impl Encode for VarInt {
	/// Encode a varint to the given writer, using the smallest width that fits.
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		let x = self.0;
		match self.size() {
			1 => w.put_u8(x as u8),
			2 => w.put_u16((0b01 << 14) | x as u16),
			4 => w.put_u32((0b10 << 30) | x as u32),
			_ => w.put_u64((0b11 << 62) | x),
		}

		Ok(())
	}
}

impl Encode for u64 {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		VarInt::try_from(*self)?.encode(w)
	}
}

impl Decode for u64 {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		VarInt::decode(r).map(u64::from)
	}
}

impl Encode for usize {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		VarInt::try_from(*self)?.encode(w)
	}
}

impl Decode for usize {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let v = VarInt::decode(r)?;
		usize::try_from(v).map_err(|_| DecodeError::BoundsExceeded)
	}
}

impl Encode for u32 {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		VarInt::from(*self).encode(w)
	}
}

impl Decode for u32 {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		let v = VarInt::decode(r)?;
		u32::try_from(v.into_inner()).map_err(|_| DecodeError::BoundsExceeded)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bytes::Bytes;

	fn encode(v: u64) -> Vec<u8> {
		let mut buf = Vec::new();
		v.encode(&mut buf).expect("in range");
		buf
	}

	#[test]
	fn widths() {
		assert_eq!(encode(0), [0x00]);
		assert_eq!(encode(63), [0x3f]);
		assert_eq!(encode(64), [0x40, 0x40]);
		assert_eq!(encode(16383), [0x7f, 0xff]);
		assert_eq!(encode(16384), [0x80, 0x00, 0x40, 0x00]);
		assert_eq!(encode((1 << 30) - 1), [0xbf, 0xff, 0xff, 0xff]);
		assert_eq!(encode(1 << 30), [0xc0, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00]);
		assert_eq!(encode(VarInt::MAX.into_inner()), [0xff; 8]);
	}

	#[test]
	fn size_matches_encoding() {
		for v in [0, 63, 64, 16383, 16384, (1 << 30) - 1, 1 << 30, VarInt::MAX.into_inner()] {
			let varint = VarInt::try_from(v).unwrap();
			assert_eq!(varint.size(), encode(v).len(), "size of {v}");
		}
	}

	#[test]
	fn decode_leaves_remainder() {
		// 16384 followed by a trailing byte that belongs to the next field.
		let mut buf = Bytes::from_static(&[0x80, 0x00, 0x40, 0x00, 0x2a]);
		let v = VarInt::decode(&mut buf).unwrap();
		assert_eq!(v.into_inner(), 16384);
		assert_eq!(buf.as_ref(), &[0x2a]);
	}

	#[test]
	fn decode_boundaries() {
		let values = [0, 63, 64, 16383, 16384, (1 << 30) - 1, 1 << 30, (1 << 53) + 1, VarInt::MAX.into_inner()];

		for v in values {
			let encoded = encode(v);
			let mut buf = encoded.as_slice();
			assert_eq!(u64::decode(&mut buf).unwrap(), v);
			assert!(buf.is_empty());
		}
	}

	#[test]
	fn decode_masks_tag() {
		// A non-minimal 8 byte encoding of 5 is still 5.
		let mut buf: &[u8] = &[0xc0, 0, 0, 0, 0, 0, 0, 5];
		assert_eq!(u64::decode(&mut buf).unwrap(), 5);
	}

	#[test]
	fn overflow() {
		assert_eq!(VarInt::try_from(1u64 << 62), Err(BoundsExceeded));
		assert_eq!(VarInt::try_from(u64::MAX), Err(BoundsExceeded));
		assert_eq!(VarInt::try_from(-1i64), Err(BoundsExceeded));
		assert_eq!((1u64 << 62).encode(&mut Vec::new()), Err(BoundsExceeded));
		assert!(VarInt::from_u64(1 << 62).is_none());
	}

	#[test]
	fn truncated() {
		let mut empty: &[u8] = &[];
		assert!(matches!(VarInt::decode(&mut empty), Err(DecodeError::Short)));

		// Claims 8 bytes but only 1 is present, and nothing is consumed.
		let mut short: &[u8] = &[0xc0];
		assert!(matches!(VarInt::decode(&mut short), Err(DecodeError::Short)));
		assert_eq!(short, &[0xc0]);

		let mut short: &[u8] = &[0x40];
		assert!(matches!(VarInt::decode(&mut short), Err(DecodeError::Short)));
	}
}
