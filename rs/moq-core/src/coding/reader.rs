use std::{fmt::Debug, io};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{coding::*, Error};

/// A reader for decoding messages from a stream.
///
/// Partial messages are buffered until enough bytes arrive to decode them.
pub struct Reader<S: AsyncRead + Unpin> {
	stream: S,
	buffer: BytesMut,
}

impl<S: AsyncRead + Unpin> Reader<S> {
	pub fn new(stream: S) -> Self {
		Self {
			stream,
			buffer: Default::default(),
		}
	}

	/// Decode the next message from the stream.
	pub async fn decode<T: Decode + Debug>(&mut self) -> Result<T, Error> {
		loop {
			let mut cursor = io::Cursor::new(&self.buffer);
			match T::decode(&mut cursor) {
				Ok(msg) => {
					self.buffer.advance(cursor.position() as usize);
					return Ok(msg);
				}
				Err(DecodeError::Short) => {
					// Try to read more data
					if !self.read_more().await? {
						// Stream closed while we still need more data
						return Err(Error::Decode);
					}
				}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Decode the next message unless the stream is closed.
	pub async fn decode_maybe<T: Decode + Debug>(&mut self) -> Result<Option<T>, Error> {
		if !self.has_more().await? {
			return Ok(None);
		}

		Ok(Some(self.decode().await?))
	}

	/// Wait until the stream is closed, erroring if there are any additional bytes.
	pub async fn closed(&mut self) -> Result<(), Error> {
		if self.has_more().await? {
			return Err(Error::Decode);
		}

		Ok(())
	}

	/// Returns true if there is more data available in the buffer or stream.
	async fn has_more(&mut self) -> Result<bool, Error> {
		if !self.buffer.is_empty() {
			return Ok(true);
		}

		self.read_more().await
	}

	/// Try to read more data from the stream. Returns true if data was read, false if stream closed.
	async fn read_more(&mut self) -> Result<bool, Error> {
		match self.stream.read_buf(&mut self.buffer).await {
			Ok(0) => Ok(false),
			Ok(_) => Ok(true),
			Err(e) => Err(Error::from_io(e)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::io::AsyncWriteExt;

	#[tokio::test]
	async fn split_across_reads() {
		let (mut tx, rx) = tokio::io::duplex(64);
		let mut reader = Reader::new(rx);

		// A 4 byte varint delivered one byte at a time, followed by a 1 byte varint.
		let task = tokio::spawn(async move {
			for byte in [0x80, 0x00, 0x40, 0x00, 0x05] {
				tx.write_all(&[byte]).await.unwrap();
				tokio::task::yield_now().await;
			}
		});

		assert_eq!(reader.decode::<u64>().await.unwrap(), 16384);
		assert_eq!(reader.decode::<u64>().await.unwrap(), 5);
		task.await.unwrap();

		// The writer was dropped, so the stream is finished.
		assert_eq!(reader.decode_maybe::<u64>().await.unwrap(), None);
	}

	#[tokio::test]
	async fn truncated_stream() {
		let (mut tx, rx) = tokio::io::duplex(64);
		let mut reader = Reader::new(rx);

		tx.write_all(&[0xc0, 0x00]).await.unwrap();
		drop(tx);

		assert_eq!(reader.decode::<u64>().await, Err(Error::Decode));
	}
}
