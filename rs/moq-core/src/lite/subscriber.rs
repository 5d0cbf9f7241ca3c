use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use web_async::Lock;

use crate::{
	coding::Reader,
	lite::{self, Stream},
	model::GroupProducer,
	transport::Session,
	BroadcastProducer, Error, Path, Result, TrackProducer,
};

struct SubscribeState {
	track: TrackProducer,

	// The number of group streams received, and how many are still being read.
	received: u64,
	active: u64,

	// Set when the publisher says the track is done.
	done: Option<lite::SubscribeDone>,
}

/// Fetches tracks from the peer for broadcasts we consume.
#[derive(Clone)]
pub(super) struct Subscriber<S: Session> {
	session: S,
	subscribes: Lock<HashMap<u64, SubscribeState>>,
	next_id: Arc<AtomicU64>,
}

impl<S: Session> Subscriber<S> {
	pub fn new(session: S) -> Self {
		Self {
			session,
			subscribes: Default::default(),
			next_id: Default::default(),
		}
	}

	pub async fn run(self, consumed: async_channel::Receiver<(Path, BroadcastProducer)>) -> Result<()> {
		tokio::select! {
			res = self.clone().run_groups() => res,
			res = self.run_broadcasts(consumed) => res,
		}
	}

	async fn run_broadcasts(self, consumed: async_channel::Receiver<(Path, BroadcastProducer)>) -> Result<()> {
		// Returns once every connection handle is gone.
		while let Ok((path, broadcast)) = consumed.recv().await {
			tracing::debug!(broadcast = %path, "consuming broadcast");
			web_async::spawn(self.clone().run_broadcast(path, broadcast));
		}

		Ok(())
	}

	async fn run_broadcast(self, path: Path, mut broadcast: BroadcastProducer) {
		loop {
			let request = match broadcast.requested_track().await {
				Ok(Some(request)) => request,
				Ok(None) => break,
				Err(err) => {
					tracing::debug!(broadcast = %path, %err, "broadcast closed");
					break;
				}
			};

			let track = match request.accept() {
				Ok(track) => track,
				Err(err) => {
					tracing::debug!(broadcast = %path, %err, "failed to accept track");
					continue;
				}
			};

			web_async::spawn(self.clone().run_subscribe(path.clone(), track));
		}
	}

	async fn run_subscribe(self, broadcast: Path, mut track: TrackProducer) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);

		self.subscribes.lock().insert(
			id,
			SubscribeState {
				track: track.clone(),
				received: 0,
				active: 0,
				done: None,
			},
		);

		let msg = lite::Subscribe {
			id,
			broadcast,
			track: track.name().to_string(),
		};

		tracing::info!(%id, broadcast = %msg.broadcast, track = %msg.track, "subscribe started");

		match self.run_track(&msg, &track).await {
			// The track is finished once every group arrives.
			Ok(done) => {
				tracing::debug!(%id, ?done, "subscribe done");
				let mut subscribes = self.subscribes.lock();
				if let Some(state) = subscribes.get_mut(&id) {
					state.done = Some(done);
				}
				Self::finish(&mut subscribes, id);
			}
			Err(err) => {
				match &err {
					Error::Cancel => tracing::debug!(%id, track = %msg.track, "subscribe cancelled"),
					err => tracing::warn!(%id, track = %msg.track, %err, "subscribe error"),
				}

				self.subscribes.lock().remove(&id);
				let _ = track.abort(err);
			}
		}
	}

	async fn run_track(&self, msg: &lite::Subscribe, track: &TrackProducer) -> Result<lite::SubscribeDone> {
		let mut stream = Stream::open(&self.session).await?;
		stream.writer.encode(&lite::ControlType::Subscribe).await?;
		stream.writer.encode(msg).await?;

		let done = tokio::select! {
			done = stream.reader.decode::<lite::SubscribeDone>() => done?,
			// Nobody is reading the track, so tell the publisher to stop by closing the stream.
			res = track.unused() => return res.and(Err(Error::Cancel)),
			// Closed locally, probably aborted by a consumer.
			res = track.closed() => return res.and(Err(Error::Cancel)),
		};

		stream.writer.finish().await?;

		Ok(done)
	}

	// Finish the track if the publisher is done and every group has been read.
	fn finish(subscribes: &mut HashMap<u64, SubscribeState>, id: u64) {
		let ready = match subscribes.get(&id) {
			Some(SubscribeState {
				done: Some(done),
				received,
				active,
				..
			}) => *received >= done.groups && *active == 0,
			_ => false,
		};

		if !ready {
			return;
		}

		let Some(SubscribeState {
			mut track,
			done: Some(done),
			..
		}) = subscribes.remove(&id)
		else {
			return;
		};

		let _ = match done.error {
			None => track.close(),
			Some(err) => track.abort(err),
		};
	}

	async fn run_groups(self) -> Result<()> {
		loop {
			let stream = self.session.accept_uni().await?;
			let mut reader = Reader::new(stream);

			// The header is read inline so every group is counted before its track can finish.
			let kind = reader.decode::<lite::DataType>().await?;
			let header = match kind {
				lite::DataType::Group => reader.decode::<lite::GroupHeader>().await?,
			};

			let group = {
				let mut subscribes = self.subscribes.lock();
				let Some(state) = subscribes.get_mut(&header.subscribe) else {
					tracing::debug!(subscribe = %header.subscribe, "unknown subscription");
					continue;
				};

				state.received += 1;

				match state.track.create_group(header.sequence) {
					Ok(group) => {
						state.active += 1;
						group
					}
					Err(err) => {
						tracing::debug!(subscribe = %header.subscribe, group = %header.sequence, %err, "dropping group");
						Self::finish(&mut subscribes, header.subscribe);
						continue;
					}
				}
			};

			web_async::spawn(self.clone().run_group(header.subscribe, reader, group));
		}
	}

	async fn run_group(self, id: u64, mut reader: Reader<S::RecvStream>, mut group: GroupProducer) {
		if let Err(err) = Self::read_group(&mut reader, &mut group).await {
			tracing::debug!(subscribe = %id, group = %group.sequence, %err, "group error");
			let _ = group.abort(err);
		}

		let mut subscribes = self.subscribes.lock();
		if let Some(state) = subscribes.get_mut(&id) {
			state.active -= 1;
		}
		Self::finish(&mut subscribes, id);
	}

	async fn read_group(reader: &mut Reader<S::RecvStream>, group: &mut GroupProducer) -> Result<()> {
		loop {
			match reader.decode::<lite::GroupMessage>().await? {
				lite::GroupMessage::Frame(payload) => group.write_frame(payload)?,
				lite::GroupMessage::Fin => return group.close(),
				lite::GroupMessage::Abort(err) => return group.abort(err),
			}
		}
	}
}
