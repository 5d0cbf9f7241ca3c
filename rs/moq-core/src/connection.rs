use std::{collections::HashMap, sync::Arc};

use tokio::sync::watch;
use web_async::Lock;

use crate::{lite, transport, BroadcastConsumer, BroadcastProducer, Error, Path, Result};

// The transport, minus the parts that need generics.
trait Close: Send + Sync {
	fn close(&self, code: u32, reason: &str);
}

impl<S: transport::Session> Close for S {
	fn close(&self, code: u32, reason: &str) {
		transport::Session::close(self, code, reason)
	}
}

struct State {
	session: Box<dyn Close>,

	// Broadcasts we serve to the peer.
	published: watch::Sender<HashMap<Path, BroadcastConsumer>>,

	// Broadcasts we fetch from the peer.
	consumed: Lock<HashMap<Path, BroadcastConsumer>>,

	// Only used to stop new broadcasts from being queued after termination.
	requests: async_channel::Receiver<(Path, BroadcastProducer)>,

	closed: watch::Sender<Option<Error>>,
}

impl State {
	// Tear everything down exactly once, no matter which side ended the session.
	fn terminate(&self, err: Error) {
		let first = self.closed.send_if_modified(|closed| match closed {
			Some(_) => false,
			None => {
				*closed = Some(err.clone());
				true
			}
		});

		if !first {
			return;
		}

		match &err {
			Error::Closed => tracing::info!("connection closed"),
			Error::Transport => tracing::info!("connection terminated"),
			err => tracing::warn!(%err, "connection error"),
		}

		self.requests.close();

		let mut published = HashMap::new();
		self.published.send_if_modified(|current| {
			std::mem::swap(current, &mut published);
			!published.is_empty()
		});

		let consumed = std::mem::take(&mut *self.consumed.lock());

		for (path, broadcast) in published.into_iter().chain(consumed) {
			tracing::debug!(broadcast = %path, %err, "closing broadcast");
			let _ = broadcast.abort(err.clone());
		}

		self.session.close(err.to_code(), &err.to_string());
	}

	fn check(&self) -> Result<()> {
		match self.closed.borrow().clone() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}
}

/// A session with a peer, publishing and consuming broadcasts by [Path].
///
/// The connection is closed when [Connection::close] is called, the peer closes it, the transport fails,
/// or every clone of the handle is dropped.
/// Closing aborts every published and consumed broadcast, which cascades to their tracks and groups.
#[derive(Clone)]
pub struct Connection {
	state: Arc<State>,
	requests: async_channel::Sender<(Path, BroadcastProducer)>,
	version: lite::Version,
}

impl Connection {
	/// Perform the client handshake over the given session and start serving it.
	pub async fn connect<S: transport::Session>(session: S) -> Result<Self> {
		match lite::connect(&session).await {
			Ok(version) => Ok(Self::start(session, version)),
			Err(err) => {
				tracing::warn!(%err, "connect failed");
				transport::Session::close(&session, err.to_code(), &err.to_string());
				Err(err)
			}
		}
	}

	/// Perform the server handshake over the given session and start serving it.
	pub async fn accept<S: transport::Session>(session: S) -> Result<Self> {
		match lite::accept(&session).await {
			Ok(version) => Ok(Self::start(session, version)),
			Err(err) => {
				tracing::warn!(%err, "accept failed");
				transport::Session::close(&session, err.to_code(), &err.to_string());
				Err(err)
			}
		}
	}

	fn start<S: transport::Session>(session: S, version: lite::Version) -> Self {
		let (requests, consumed) = async_channel::unbounded();

		let state = Arc::new(State {
			session: Box::new(session.clone()),
			published: watch::Sender::new(HashMap::new()),
			consumed: Default::default(),
			requests: consumed.clone(),
			closed: watch::Sender::new(None),
		});

		tracing::info!(%version, "connection established");

		let published = state.published.subscribe();
		let task = state.clone();

		web_async::spawn(async move {
			let err = match lite::run(session, published, consumed).await {
				Ok(()) => Error::Closed,
				Err(err) => err,
			};

			task.terminate(err);
		});

		Self {
			state,
			requests,
			version,
		}
	}

	/// The negotiated protocol version.
	pub fn version(&self) -> lite::Version {
		self.version
	}

	/// Make a broadcast available to the peer under the given path.
	///
	/// Returns [Error::Duplicate] if the path is already published on this connection.
	/// The broadcast is unpublished automatically when it closes.
	pub fn publish(&self, path: Path, broadcast: BroadcastConsumer) -> Result<()> {
		self.state.check()?;

		let mut result = Ok(());
		self.state.published.send_if_modified(|published| {
			if published.contains_key(&path) {
				result = Err(Error::Duplicate);
				return false;
			}

			published.insert(path.clone(), broadcast.clone());
			true
		});
		result?;

		tracing::debug!(broadcast = %path, "published broadcast");

		// Lives as long as the entry: it ends on close, unpublish, or termination.
		let published = self.state.published.clone();
		web_async::spawn(async move {
			let mut entries = published.subscribe();
			let removed = async {
				let _ = entries
					.wait_for(|entries| !entries.get(&path).is_some_and(|existing| existing.is_clone(&broadcast)))
					.await;
			};

			tokio::select! {
				_ = removed => return,
				_ = broadcast.closed() => {},
			}

			published.send_if_modified(|published| match published.get(&path) {
				Some(existing) if existing.is_clone(&broadcast) => {
					tracing::debug!(broadcast = %path, "unpublished closed broadcast");
					published.remove(&path);
					true
				}
				_ => false,
			});
		});

		Ok(())
	}

	/// Stop serving a broadcast to new subscriptions.
	///
	/// Returns [Error::NotFound] if nothing is published at the path.
	pub fn unpublish(&self, path: &Path) -> Result<BroadcastConsumer> {
		let mut removed = None;
		self.state.published.send_if_modified(|published| {
			removed = published.remove(path);
			removed.is_some()
		});

		removed.ok_or(Error::NotFound)
	}

	/// Consume a broadcast published by the peer, returning immediately.
	///
	/// Tracks subscribed on the returned broadcast are fetched lazily, waiting until the peer publishes the path.
	/// Consuming the same path again shares the broadcast while it's open.
	pub fn consume(&self, path: Path) -> BroadcastConsumer {
		let mut consumed = self.state.consumed.lock();

		if let Some(existing) = consumed.get(&path) {
			if !existing.is_closed() {
				return existing.clone();
			}
		}

		let mut broadcast = BroadcastProducer::new();
		let consumer = broadcast.consume();

		if let Err(err) = self.state.check() {
			let _ = broadcast.abort(err);
			return consumer;
		}

		if let Err(err) = self.requests.try_send((path.clone(), broadcast)) {
			let (_, mut broadcast) = err.into_inner();
			let _ = broadcast.abort(Error::Closed);
			return consumer;
		}

		consumed.insert(path.clone(), consumer.clone());
		drop(consumed);

		// Forget the broadcast once it closes, unless it was replaced already.
		let entries = self.state.consumed.clone();
		let closed = consumer.clone();
		web_async::spawn(async move {
			let _ = closed.closed().await;

			let mut entries = entries.lock();
			if entries.get(&path).is_some_and(|existing| existing.is_clone(&closed)) {
				entries.remove(&path);
			}
		});

		consumer
	}

	/// Close the connection and everything it carries.
	///
	/// Closing an already closed connection has no effect.
	pub fn close(&self) {
		self.state.terminate(Error::Closed);
	}

	/// Block until the connection is closed, returning the reason.
	///
	/// A local [Connection::close] results in [Error::Closed].
	pub async fn closed(&self) -> Error {
		let mut closed = self.state.closed.subscribe();
		let err = match closed.wait_for(Option::is_some).await {
			Ok(err) => err.clone().unwrap_or(Error::Closed),
			Err(_) => Error::Closed,
		};
		err
	}

	pub fn is_closed(&self) -> bool {
		self.state.closed.borrow().is_some()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use futures::FutureExt;

	use super::*;
	use crate::{transport::mem, Broadcast, Frame, Produce, TrackConsumer, TrackRequest};

	const TIMEOUT: Duration = Duration::from_secs(5);

	async fn pair() -> (Connection, Connection) {
		let (client, server) = mem::pair();
		let (client, server) = tokio::join!(Connection::connect(client), Connection::accept(server));
		(client.unwrap(), server.unwrap())
	}

	async fn next_frames(track: &mut TrackConsumer) -> Result<Option<Vec<Frame>>> {
		let Some(mut group) = track.next_group().await? else {
			return Ok(None);
		};

		group.read_all().await.map(Some)
	}

	async fn next_request(broadcast: &mut BroadcastProducer) -> TrackRequest {
		tokio::time::timeout(TIMEOUT, broadcast.requested_track())
			.await
			.unwrap()
			.unwrap()
			.expect("no request")
	}

	#[tokio::test]
	async fn publish_consume() {
		let (client, server) = pair().await;
		assert_eq!(client.version(), lite::Version::Lite01);

		let path = Path::new("live/clock").unwrap();
		let Produce {
			mut producer,
			consumer,
		} = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();

		let remote = client.consume(path.clone());
		let mut track = remote.subscribe_track("seconds");

		let request = tokio::time::timeout(TIMEOUT, producer.requested_track())
			.await
			.unwrap()
			.unwrap()
			.expect("no request");
		assert_eq!(request.name(), "seconds");
		let mut seconds = request.accept().unwrap();

		let mut group = seconds.append_group().unwrap();
		group.write_frame("0").unwrap();
		group.write_frame("1").unwrap();
		group.close().unwrap();
		seconds.close().unwrap();

		let frames = tokio::time::timeout(TIMEOUT, next_frames(&mut track))
			.await
			.unwrap()
			.unwrap()
			.expect("no group");
		assert_eq!(frames, vec![Frame::from("0"), Frame::from("1")]);

		// The track finishes after the last group.
		let end = tokio::time::timeout(TIMEOUT, track.next_group()).await.unwrap();
		assert!(end.unwrap().is_none());

		// Consuming the same path shares the broadcast.
		assert!(client.consume(path).is_clone(&remote));
	}

	#[tokio::test]
	async fn reject() {
		let (client, server) = pair().await;

		let path = Path::new("room").unwrap();
		let Produce {
			mut producer,
			consumer,
		} = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();

		let track = client.consume(path).subscribe_track("missing");

		let request = tokio::time::timeout(TIMEOUT, producer.requested_track())
			.await
			.unwrap()
			.unwrap()
			.expect("no request");
		request.reject(Error::App(404));

		let err = tokio::time::timeout(TIMEOUT, track.closed()).await.unwrap();
		assert_eq!(err, Err(Error::App(404)));

		// The rest of the connection is unaffected.
		assert!(!client.is_closed());
		assert!(!server.is_closed());
	}

	#[tokio::test]
	async fn publish_later() {
		let (client, server) = pair().await;
		let path = Path::new("late").unwrap();

		// Subscribe before the broadcast exists.
		let mut track = client.consume(path.clone()).subscribe_track("audio");

		let Produce {
			mut producer,
			consumer,
		} = Broadcast::produce();
		let mut audio = producer.create_track("audio").unwrap();
		server.publish(path, consumer).unwrap();

		// Wait until the subscription reaches the publisher.
		tokio::time::timeout(TIMEOUT, async {
			while audio.unused().now_or_never().is_some() {
				tokio::time::sleep(Duration::from_millis(1)).await;
			}
		})
		.await
		.unwrap();

		let mut group = audio.append_group().unwrap();
		group.write_frame("hello").unwrap();
		group.close().unwrap();

		let frames = tokio::time::timeout(TIMEOUT, next_frames(&mut track))
			.await
			.unwrap()
			.unwrap()
			.expect("no group");
		assert_eq!(frames, vec![Frame::from("hello")]);
	}

	#[tokio::test]
	async fn duplicate_publish() {
		let (_client, server) = pair().await;
		let path = Path::new("dup").unwrap();

		let first = Broadcast::produce();
		let second = Broadcast::produce();

		server.publish(path.clone(), first.consumer.clone()).unwrap();
		assert_eq!(server.publish(path.clone(), second.consumer), Err(Error::Duplicate));

		assert!(server.unpublish(&path).unwrap().is_clone(&first.consumer));
		assert_eq!(server.unpublish(&path).err(), Some(Error::NotFound));
	}

	#[tokio::test]
	async fn close_cascades() {
		let (client, server) = pair().await;

		let path = Path::new("cascade").unwrap();
		let Produce {
			producer: published,
			consumer,
		} = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();

		let remote = client.consume(path.clone());
		let track = remote.subscribe_track("video");

		client.close();
		client.close();
		assert_eq!(client.closed().await, Error::Closed);

		// Everything the client consumed is closed.
		assert_eq!(track.closed().await, Err(Error::Closed));
		assert_eq!(remote.closed().await, Err(Error::Closed));

		// The server sees the close and tears down its published broadcasts.
		let err = tokio::time::timeout(TIMEOUT, server.closed()).await.unwrap();
		assert_eq!(err, Error::Closed);
		assert_eq!(published.closed().await, Err(Error::Closed));

		// Nothing new can be published or consumed.
		assert_eq!(server.publish(path.clone(), Broadcast::produce().consumer), Err(Error::Closed));
		assert_eq!(client.consume(path).closed().await, Err(Error::Closed));
	}

	#[tokio::test]
	async fn unpublish_closed() {
		let (_client, server) = pair().await;
		let path = Path::new("gone").unwrap();

		let Produce {
			mut producer,
			consumer,
		} = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();

		producer.close().unwrap();

		// The broadcast is removed automatically once closed.
		tokio::time::timeout(TIMEOUT, async {
			while server.state.published.borrow().contains_key(&path) {
				tokio::time::sleep(Duration::from_millis(1)).await;
			}
		})
		.await
		.unwrap();

		assert_eq!(server.unpublish(&path).err(), Some(Error::NotFound));
	}

	#[tokio::test]
	async fn unpublish_releases() {
		let (_client, server) = pair().await;
		let path = Path::new("released").unwrap();

		let Produce { producer, consumer } = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();
		drop(server.unpublish(&path).unwrap());

		// Nothing keeps a reference to the broadcast once it's unpublished.
		tokio::time::timeout(TIMEOUT, async {
			while producer.consumers() > 0 {
				tokio::time::sleep(Duration::from_millis(1)).await;
			}
		})
		.await
		.unwrap();

		assert!(!producer.is_closed());
	}

	#[tokio::test]
	async fn consume_forgets_closed() {
		let (client, _server) = pair().await;
		let path = Path::new("forgotten").unwrap();

		let remote = client.consume(path.clone());
		remote.abort(Error::Cancel).unwrap();

		tokio::time::timeout(TIMEOUT, async {
			while client.state.consumed.lock().contains_key(&path) {
				tokio::time::sleep(Duration::from_millis(1)).await;
			}
		})
		.await
		.unwrap();

		// A new broadcast is fetched next time.
		let again = client.consume(path);
		assert!(!again.is_clone(&remote));
		assert!(!again.is_closed());
	}

	#[tokio::test]
	async fn dropped_handles() {
		let (client, server) = pair().await;
		let remote = client.consume(Path::new("orphan").unwrap());

		drop(client);

		let err = tokio::time::timeout(TIMEOUT, server.closed()).await.unwrap();
		assert_eq!(err, Error::Closed);
		assert_eq!(remote.closed().await, Err(Error::Closed));
	}

	#[tokio::test]
	async fn errors_cross() {
		let (client, server) = pair().await;
		let path = Path::new("errors").unwrap();

		let Produce {
			mut producer,
			consumer,
		} = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();

		let mut track = client.consume(path).subscribe_track("video");
		let mut video = next_request(&mut producer).await.accept().unwrap();

		let mut group = video.append_group().unwrap();
		group.write_frame("partial").unwrap();
		group.abort(Error::App(7)).unwrap();
		video.abort(Error::App(9)).unwrap();

		// The group error arrives after the frames written before it.
		let mut remote = tokio::time::timeout(TIMEOUT, track.next_group())
			.await
			.unwrap()
			.unwrap()
			.expect("no group");
		let frame = tokio::time::timeout(TIMEOUT, remote.read_frame()).await.unwrap();
		assert_eq!(frame, Ok(Some(Frame::from("partial"))));
		let err = tokio::time::timeout(TIMEOUT, remote.read_frame()).await.unwrap();
		assert_eq!(err, Err(Error::App(7)));

		// Then the track error.
		let err = tokio::time::timeout(TIMEOUT, track.closed()).await.unwrap();
		assert_eq!(err, Err(Error::App(9)));
	}

	#[tokio::test]
	async fn unused_cancels() {
		let (client, server) = pair().await;
		let path = Path::new("idle").unwrap();

		let Produce {
			mut producer,
			consumer,
		} = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();

		let track = client.consume(path).subscribe_track("video");
		let video = next_request(&mut producer).await.accept().unwrap();
		assert!(video.unused().now_or_never().is_none());

		// Nobody reads the track anymore, so the subscription is cancelled.
		drop(track);
		let res = tokio::time::timeout(TIMEOUT, video.unused()).await.unwrap();
		assert_eq!(res, Ok(()));

		// The connection itself is unaffected.
		assert!(!client.is_closed());
	}

	#[tokio::test]
	async fn dropped_track() {
		let (client, server) = pair().await;
		let path = Path::new("abandoned").unwrap();

		let Produce {
			mut producer,
			consumer,
		} = Broadcast::produce();
		server.publish(path.clone(), consumer).unwrap();

		let track = client.consume(path).subscribe_track("video");
		let video = next_request(&mut producer).await.accept().unwrap();

		// Dropped without closing, which the subscriber sees instead of hanging.
		drop(video);
		let err = tokio::time::timeout(TIMEOUT, track.closed()).await.unwrap();
		assert_eq!(err, Err(Error::Dropped));
	}
}
