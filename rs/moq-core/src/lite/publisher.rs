use std::collections::HashMap;

use futures::{stream::FuturesUnordered, FutureExt, StreamExt};
use tokio::sync::watch;

use crate::{
	coding::Writer,
	lite::{self, Stream},
	model::GroupConsumer,
	transport::Session,
	BroadcastConsumer, Error, Path, Result,
};

/// Serves subscriptions from the peer using our published broadcasts.
pub(super) struct Publisher<S: Session> {
	session: S,
	published: watch::Receiver<HashMap<Path, BroadcastConsumer>>,
}

impl<S: Session> Publisher<S> {
	pub fn new(session: S, published: watch::Receiver<HashMap<Path, BroadcastConsumer>>) -> Self {
		Self { session, published }
	}

	pub async fn run(self) -> Result<()> {
		loop {
			let mut stream = Stream::accept(&self.session).await?;

			// We process each control stream in received order.
			// This adds some head-of-line blocking but the type is sent immediately.
			let kind = stream.reader.decode().await?;

			if let Err(err) = match kind {
				lite::ControlType::Subscribe => self.recv_subscribe(stream).await,
				_ => Err(Error::UnexpectedStream),
			} {
				tracing::warn!(%err, "control stream error");
			}
		}
	}

	async fn recv_subscribe(&self, mut stream: Stream<S>) -> Result<()> {
		let subscribe = stream.reader.decode::<lite::Subscribe>().await?;

		let session = self.session.clone();
		let published = self.published.clone();

		web_async::spawn(async move {
			let res = tokio::select! {
				res = Self::run_subscribe(session.clone(), &mut stream, &subscribe, published) => res,
				err = session.closed() => Err(err),
			};

			let lite::Subscribe { id, broadcast, track } = &subscribe;
			match res {
				Ok(()) => tracing::info!(%id, %broadcast, %track, "subscribed complete"),
				Err(Error::Cancel | Error::Transport) => tracing::debug!(%id, %broadcast, %track, "subscribed cancelled"),
				Err(err) => tracing::warn!(%id, %broadcast, %track, %err, "subscribed error"),
			}
		});

		Ok(())
	}

	async fn run_subscribe(
		session: S,
		stream: &mut Stream<S>,
		subscribe: &lite::Subscribe,
		mut published: watch::Receiver<HashMap<Path, BroadcastConsumer>>,
	) -> Result<()> {
		tracing::info!(id = %subscribe.id, broadcast = %subscribe.broadcast, track = %subscribe.track, "subscribed started");

		// Wait until the broadcast is published, or the subscriber gives up.
		let broadcast = tokio::select! {
			res = published.wait_for(|published| published.contains_key(&subscribe.broadcast)) => {
				let published = res.map_err(|_| Error::Closed)?;
				published.get(&subscribe.broadcast).cloned().ok_or(Error::NotFound)?
			}
			res = stream.reader.closed() => return res.and(Err(Error::Cancel)),
		};

		let mut track = broadcast.subscribe_track(&subscribe.track);

		// All of the groups we're currently serving.
		let mut tasks = FuturesUnordered::new();
		let mut groups = 0;

		let res = loop {
			let group = tokio::select! {
				biased;
				// The subscriber closed their side, so we're done.
				res = stream.reader.closed() => return res.and(Err(Error::Cancel)),
				group = track.next_group() => group,
				// This is a hack to avoid waking up the select! loop each time a group completes.
				// We poll all of the groups until they're all complete, only matching `else` when all are complete.
				true = async {
					// Constantly poll all of the groups until they're all complete.
					while tasks.next().await.is_some() {}
					// Never match
					false
				} => unreachable!("never match"),
			};

			let group = match group {
				Ok(Some(group)) => group,
				Ok(None) => break Ok(()),
				Err(err) => break Err(err),
			};

			tracing::debug!(subscribe = %subscribe.id, track = %subscribe.track, group = %group.sequence, "serving group");

			// Write the header before counting the group, so it can't be overtaken by the done message.
			let mut writer = Writer::new(session.open_uni().await?);
			writer.encode(&lite::DataType::Group).await?;
			writer
				.encode(&lite::GroupHeader {
					subscribe: subscribe.id,
					sequence: group.sequence,
				})
				.await?;

			groups += 1;
			tasks.push(Self::serve_group(writer, group).map(|res| {
				if let Err(err) = res {
					tracing::debug!(%err, "group error");
				}
			}));
		};

		let done = lite::SubscribeDone {
			groups,
			error: res.err(),
		};
		tracing::debug!(subscribe = %subscribe.id, ?done, "subscribe done");
		stream.writer.encode(&done).await?;

		// Finish serving the remaining groups.
		while tasks.next().await.is_some() {}

		stream.writer.finish().await
	}

	async fn serve_group(mut writer: Writer<S::SendStream>, mut group: GroupConsumer) -> Result<()> {
		loop {
			let msg = match group.read_frame().await {
				Ok(Some(frame)) => lite::GroupMessage::Frame(frame.into_payload()),
				Ok(None) => break,
				Err(err) => {
					writer.encode(&lite::GroupMessage::Abort(err)).await?;
					return writer.finish().await;
				}
			};

			writer.encode(&msg).await?;
		}

		writer.encode(&lite::GroupMessage::Fin).await?;
		writer.finish().await
	}
}
