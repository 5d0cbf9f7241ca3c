use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{coding::*, Error};

/// A writer for encoding messages to a stream.
pub struct Writer<S: AsyncWrite + Unpin> {
	stream: S,
	buffer: bytes::BytesMut,
}

impl<S: AsyncWrite + Unpin> Writer<S> {
	pub fn new(stream: S) -> Self {
		Self {
			stream,
			buffer: Default::default(),
		}
	}

	/// Encode a message and write it to the stream in full.
	pub async fn encode<T: Encode>(&mut self, msg: &T) -> Result<(), Error> {
		self.buffer.clear();
		msg.encode(&mut self.buffer)?;

		self.stream.write_all_buf(&mut self.buffer).await.map_err(Error::from_io)?;
		self.stream.flush().await.map_err(Error::from_io)
	}

	/// Mark the clean termination of the stream.
	pub async fn finish(&mut self) -> Result<(), Error> {
		self.stream.shutdown().await.map_err(Error::from_io)
	}
}
