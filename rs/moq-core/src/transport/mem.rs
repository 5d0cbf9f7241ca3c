use std::sync::Arc;

use tokio::{
	io::{DuplexStream, ReadHalf, WriteHalf},
	sync::watch,
};

use crate::{Error, Result};

// The amount of data buffered per direction before a writer blocks.
const STREAM_BUFFER: usize = 64 * 1024;

pub type SendStream = WriteHalf<DuplexStream>;
pub type RecvStream = ReadHalf<DuplexStream>;

/// Create two connected sessions, like a client and server on either side of a network.
pub fn pair() -> (Session, Session) {
	let (a_bi, b_bi) = async_channel::unbounded();
	let (b_bi_tx, a_bi_rx) = async_channel::unbounded();
	let (a_uni, b_uni) = async_channel::unbounded();
	let (b_uni_tx, a_uni_rx) = async_channel::unbounded();

	let closed = watch::Sender::new(None);

	let a = Session {
		bi: (a_bi, a_bi_rx),
		uni: (a_uni, a_uni_rx),
		closed: closed.clone(),
		_guard: Arc::new(Guard { closed: closed.clone() }),
	};

	let b = Session {
		bi: (b_bi_tx, b_bi),
		uni: (b_uni_tx, b_uni),
		closed: closed.clone(),
		_guard: Arc::new(Guard { closed }),
	};

	(a, b)
}

/// One end of an in-memory session.
///
/// Each stream is a [tokio::io::duplex] pipe handed to the peer over a channel.
#[derive(Clone)]
pub struct Session {
	// Streams we open are sent to the peer, streams the peer opens are received here.
	bi: (
		async_channel::Sender<(SendStream, RecvStream)>,
		async_channel::Receiver<(SendStream, RecvStream)>,
	),
	uni: (async_channel::Sender<RecvStream>, async_channel::Receiver<RecvStream>),

	// Shared by both ends.
	closed: watch::Sender<Option<Error>>,

	// Closes the session when every clone of this end is dropped.
	_guard: Arc<Guard>,
}

impl Session {
	fn error(&self) -> Error {
		self.closed.borrow().clone().unwrap_or(Error::Transport)
	}

	fn shutdown(&self, err: Error) {
		self.closed.send_if_modified(|closed| match closed {
			Some(_) => false,
			None => {
				*closed = Some(err);
				true
			}
		});

		self.bi.0.close();
		self.bi.1.close();
		self.uni.0.close();
		self.uni.1.close();
	}
}

impl super::Session for Session {
	type SendStream = SendStream;
	type RecvStream = RecvStream;

	async fn open_bi(&self) -> Result<(SendStream, RecvStream)> {
		let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
		let (local_recv, local_send) = tokio::io::split(local);
		let (remote_recv, remote_send) = tokio::io::split(remote);

		self.bi
			.0
			.send((remote_send, remote_recv))
			.await
			.map_err(|_| self.error())?;

		Ok((local_send, local_recv))
	}

	async fn accept_bi(&self) -> Result<(SendStream, RecvStream)> {
		self.bi.1.recv().await.map_err(|_| self.error())
	}

	async fn open_uni(&self) -> Result<SendStream> {
		let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
		let (_, local_send) = tokio::io::split(local);
		let (remote_recv, _) = tokio::io::split(remote);

		self.uni.0.send(remote_recv).await.map_err(|_| self.error())?;

		Ok(local_send)
	}

	async fn accept_uni(&self) -> Result<RecvStream> {
		self.uni.1.recv().await.map_err(|_| self.error())
	}

	fn close(&self, code: u32, reason: &str) {
		tracing::debug!(code, reason, "closing session");
		self.shutdown(Error::from_code(code));
	}

	async fn closed(&self) -> Error {
		let mut closed = self.closed.subscribe();
		let err = match closed.wait_for(Option::is_some).await {
			Ok(err) => err.clone().unwrap_or(Error::Transport),
			Err(_) => Error::Transport,
		};
		err
	}
}

struct Guard {
	closed: watch::Sender<Option<Error>>,
}

impl Drop for Guard {
	fn drop(&mut self) {
		self.closed.send_if_modified(|closed| match closed {
			Some(_) => false,
			None => {
				*closed = Some(Error::Transport);
				true
			}
		});
	}
}
