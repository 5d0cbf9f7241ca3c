//! The seam between the protocol and whatever carries its streams.
//!
//! A [Session] opens and accepts ordered byte streams, much like a QUIC or WebTransport connection.
//! Streams are plain tokio [AsyncRead]/[AsyncWrite] halves; cleanly finishing a stream is a `shutdown`.
//!
//! [mem] provides an in-process implementation, used for tests and local pipelines.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Error, Result};

pub mod mem;

pub trait Session: Clone + Send + Sync + 'static {
	type SendStream: AsyncWrite + Unpin + Send + 'static;
	type RecvStream: AsyncRead + Unpin + Send + 'static;

	/// Open a new bidirectional stream.
	fn open_bi(&self) -> impl Future<Output = Result<(Self::SendStream, Self::RecvStream)>> + Send;

	/// Accept the next bidirectional stream opened by the peer.
	fn accept_bi(&self) -> impl Future<Output = Result<(Self::SendStream, Self::RecvStream)>> + Send;

	/// Open a new unidirectional stream.
	fn open_uni(&self) -> impl Future<Output = Result<Self::SendStream>> + Send;

	/// Accept the next unidirectional stream opened by the peer.
	fn accept_uni(&self) -> impl Future<Output = Result<Self::RecvStream>> + Send;

	/// Close the session immediately, sending the code to the peer.
	fn close(&self, code: u32, reason: &str);

	/// Block until the session is closed by either side, returning the reason.
	fn closed(&self) -> impl Future<Output = Error> + Send;
}
