use crate::{
	coding::{Reader, Writer},
	transport::Session,
	Result,
};

/// A [Writer] and [Reader] pair for a single bidirectional stream.
pub(super) struct Stream<S: Session> {
	pub writer: Writer<S::SendStream>,
	pub reader: Reader<S::RecvStream>,
}

impl<S: Session> Stream<S> {
	pub async fn open(session: &S) -> Result<Self> {
		let (send, recv) = session.open_bi().await?;
		Ok(Self {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}

	pub async fn accept(session: &S) -> Result<Self> {
		let (send, recv) = session.accept_bi().await?;
		Ok(Self {
			writer: Writer::new(send),
			reader: Reader::new(recv),
		})
	}
}
