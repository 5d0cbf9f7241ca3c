use bytes::{BufMut, Bytes, BytesMut};

use super::BoundsExceeded;

/// Write the value to the buffer.
///
/// Encoding only fails when an integer does not fit in a varint.
pub trait Encode: Sized {
	/// Encode the value to the given writer.
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded>;

	/// Encode the value into a [Bytes] buffer.
	///
	/// NOTE: This will allocate.
	fn encode_bytes(&self) -> Result<Bytes, BoundsExceeded> {
		let mut buf = BytesMut::new();
		self.encode(&mut buf)?;
		Ok(buf.freeze())
	}
}

impl Encode for u8 {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		w.put_u8(*self);
		Ok(())
	}
}

impl Encode for String {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.as_str().encode(w)
	}
}

impl Encode for &str {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.len().encode(w)?;
		w.put(self.as_bytes());
		Ok(())
	}
}

impl Encode for Bytes {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.len().encode(w)?;
		w.put_slice(self);
		Ok(())
	}
}

impl<T: Encode> Encode for Vec<T> {
	fn encode<W: BufMut>(&self, w: &mut W) -> Result<(), BoundsExceeded> {
		self.len().encode(w)?;
		for item in self.iter() {
			item.encode(w)?;
		}
		Ok(())
	}
}
