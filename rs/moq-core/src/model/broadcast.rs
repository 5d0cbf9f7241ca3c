use std::collections::{HashMap, VecDeque};

use super::{Cascade, Consumer, Produce, Producer, Track, TrackConsumer, TrackProducer, TrackWeak};
use crate::{Error, Result};

/// A collection of media tracks that can be published and subscribed to.
///
/// Create via [`Broadcast::produce`] to obtain both [`BroadcastProducer`] and [`BroadcastConsumer`] pair.
#[derive(Clone, Default)]
pub struct Broadcast {
	// NOTE: Broadcasts have no names because they're relative to the connection.
}

impl Broadcast {
	pub fn produce() -> Produce<BroadcastProducer, BroadcastConsumer> {
		let producer = BroadcastProducer::new();
		let consumer = producer.consume();
		Produce::new(producer, consumer)
	}
}

#[derive(Default)]
pub(crate) struct BroadcastState {
	// Tracks that are being produced.
	// Not owned: a track closes with Dropped once the application drops every producer.
	tracks: HashMap<String, TrackWeak>,

	// Tracks requested by a consumer that the producer has not answered yet.
	pending: HashMap<String, TrackProducer>,

	// The names of pending tracks, in the order they were requested.
	requested: VecDeque<String>,

	// No more requests will be served.
	fin: bool,
}

impl Cascade for BroadcastState {
	fn cascade(&mut self, closed: &Result<()>) {
		for (_, track) in self.tracks.drain() {
			let _ = match closed {
				Ok(()) => track.close(),
				Err(err) => track.abort(err.clone()),
			};
		}

		// Nobody will answer these, so they're never a clean close.
		let err = closed.clone().err().unwrap_or(Error::Closed);
		for (_, mut track) in self.pending.drain() {
			let _ = track.abort(err.clone());
		}

		self.requested.clear();
	}
}

impl BroadcastState {
	// Returns the live track with the given name, discarding it if closed.
	fn live(&mut self, name: &str) -> Option<&TrackWeak> {
		if self.tracks.get(name).is_some_and(TrackWeak::is_closed) {
			self.tracks.remove(name);
		}

		self.tracks.get(name)
	}

	fn subscribe(&mut self, track: &Track) -> TrackConsumer {
		if let Some(existing) = self.live(&track.name) {
			return existing.consume();
		}

		// Duplicate requests share a single track.
		match self.pending.get(&track.name) {
			Some(pending) if !pending.is_closed() => return pending.consume(),
			Some(_) => {
				self.pending.remove(&track.name);
			}
			None => {}
		}

		let mut producer = TrackProducer::new(track.clone());

		// Need to make the consumer before queuing the request to avoid unused.
		let consumer = producer.consume();

		if self.fin {
			let _ = producer.abort(Error::NotFound);
			return consumer;
		}

		tracing::debug!(track = %track.name, "track requested");
		self.pending.insert(track.name.clone(), producer);
		self.requested.push_back(track.name.clone());

		consumer
	}
}

/// Receive track requests and create tracks.
#[derive(Clone, Debug)]
pub struct BroadcastProducer {
	state: Producer<BroadcastState>,
}

impl Default for BroadcastProducer {
	fn default() -> Self {
		Self::new()
	}
}

impl BroadcastProducer {
	pub fn new() -> Self {
		Self {
			state: Producer::new(BroadcastState::default()),
		}
	}

	/// Return the next track requested by a consumer, or None once [Self::finish] or [Self::close] is called.
	///
	/// The request must be accepted or rejected; dropping it rejects it with [Error::NotFound].
	pub async fn requested_track(&mut self) -> Result<Option<TrackRequest>> {
		loop {
			let ready = self
				.state
				.wait_for(|state| (!state.requested.is_empty() || state.fin).then_some(()))
				.await?;

			if ready.is_none() {
				return Ok(None);
			}

			let next = self.state.modify(|state| {
				Ok(state
					.requested
					.pop_front()
					.map(|name| (state.pending.get(&name).cloned(), name)))
			});

			let next = match next {
				Ok(next) => next,
				// Closed between the wait and the pop.
				Err(_) => return self.closed_request(),
			};

			match next {
				Some((Some(track), name)) => {
					return Ok(Some(TrackRequest {
						name,
						track: Some(track),
						broadcast: self.clone(),
					}))
				}
				// The request was answered already, possibly by create_track.
				Some((None, _)) => continue,
				None => return Ok(None),
			}
		}
	}

	fn closed_request(&self) -> Result<Option<TrackRequest>> {
		match self.state.borrow().closed() {
			Some(Ok(())) => Ok(None),
			Some(Err(err)) => Err(err.clone()),
			None => Err(Error::Closed),
		}
	}

	/// Create a new track, answering any outstanding request for the same name.
	///
	/// Returns [Error::Duplicate] if a track with the same name is already being produced.
	pub fn create_track<T: Into<Track>>(&mut self, track: T) -> Result<TrackProducer> {
		let track = track.into();

		self.state.modify(|state| {
			if state.live(&track.name).is_some() {
				return Err(Error::Duplicate);
			}

			let mut producer = match state.pending.remove(&track.name) {
				Some(pending) if !pending.is_closed() => pending,
				_ => TrackProducer::new(track.clone()),
			};

			producer.set_max_latency(track.max_latency)?;
			state.tracks.insert(track.name.clone(), producer.weak());

			Ok(producer)
		})
	}

	/// Serve a track created elsewhere, for as long as the caller keeps producing it.
	///
	/// Returns [Error::Duplicate] if the name is already produced, or requested and waiting for an answer.
	pub fn publish_track(&mut self, track: &TrackProducer) -> Result<()> {
		self.state.modify(|state| {
			if state.live(track.name()).is_some() {
				return Err(Error::Duplicate);
			}

			if state.pending.get(track.name()).is_some_and(|pending| !pending.is_closed()) {
				return Err(Error::Duplicate);
			}

			state.tracks.insert(track.name().to_string(), track.weak());
			Ok(())
		})
	}

	/// Stop serving a track; existing consumers keep reading until the track is closed.
	pub fn remove_track(&mut self, name: &str) -> Result<TrackProducer> {
		self.state.modify(|state| {
			state
				.tracks
				.remove(name)
				.and_then(|track| track.upgrade())
				.ok_or(Error::NotFound)
		})
	}

	/// Signal that no more tracks will be served.
	///
	/// Outstanding requests can still be answered, while new requests for unknown tracks are rejected.
	pub fn finish(&mut self) -> Result<()> {
		self.state.modify(|state| {
			state.fin = true;
			Ok(())
		})
	}

	pub fn consume(&self) -> BroadcastConsumer {
		BroadcastConsumer {
			state: self.state.consume(),
		}
	}

	/// Clean termination of the broadcast, closing every track.
	pub fn close(&mut self) -> Result<()> {
		self.state.close()
	}

	/// Terminate the broadcast and every track with an error.
	pub fn abort(&mut self, err: Error) -> Result<()> {
		self.state.abort(err)
	}

	pub async fn closed(&self) -> Result<()> {
		self.state.closed().await
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed().is_some()
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

/// A track requested by a consumer, waiting for the producer to accept or reject it.
#[derive(Debug)]
pub struct TrackRequest {
	name: String,

	// Some until answered.
	track: Option<TrackProducer>,

	broadcast: BroadcastProducer,
}

impl TrackRequest {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Start producing the requested track.
	pub fn accept(mut self) -> Result<TrackProducer> {
		let Some(track) = self.track.take() else {
			return Err(Error::Duplicate);
		};

		self.broadcast.state.modify(|state| {
			// Already answered by create_track.
			if state.tracks.get(&self.name).is_some_and(|existing| existing.is_clone(&track)) {
				return Ok(track);
			}

			match state.pending.get(&self.name) {
				Some(pending) if pending.is_clone(&track) => {}
				_ => return Err(Error::Duplicate),
			}

			state.pending.remove(&self.name);
			state.tracks.insert(self.name.clone(), track.weak());

			Ok(track)
		})
	}

	/// Refuse the request; the requester observes the error as the track closing.
	pub fn reject(mut self, err: Error) {
		self.answer(err);
	}

	fn answer(&mut self, err: Error) {
		let Some(mut track) = self.track.take() else {
			return;
		};

		tracing::debug!(track = %self.name, %err, "track rejected");

		let _ = self.broadcast.state.modify(|state| {
			if state.pending.get(&self.name).is_some_and(|pending| pending.is_clone(&track)) {
				state.pending.remove(&self.name);
			}
			Ok(())
		});

		let _ = track.abort(err);
	}
}

impl Drop for TrackRequest {
	fn drop(&mut self) {
		self.answer(Error::NotFound);
	}
}

/// Subscribe to arbitrary tracks by name.
#[derive(Clone, Debug)]
pub struct BroadcastConsumer {
	state: Consumer<BroadcastState>,
}

impl BroadcastConsumer {
	/// Subscribe to a track by name, returning immediately.
	///
	/// If the track isn't produced yet, a request is queued for the producer.
	/// The returned track is closed with an error if the request is rejected or the broadcast closes first.
	pub fn subscribe_track<T: Into<Track>>(&self, track: T) -> TrackConsumer {
		let track = track.into();

		match self.state.modify(|state| Ok(state.subscribe(&track))) {
			Ok(consumer) => consumer,
			Err(err) => {
				let mut producer = TrackProducer::new(track);
				let consumer = producer.consume();
				let _ = producer.abort(err);
				consumer
			}
		}
	}

	pub async fn closed(&self) -> Result<()> {
		self.state.closed().await
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed().is_some()
	}

	/// Close the broadcast with an error, as seen by the producer and every track.
	pub fn abort(&self, err: Error) -> Result<()> {
		self.state.finish(Err(err))
	}

	/// Check if this is the exact same instance of a broadcast.
	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl BroadcastProducer {
	pub fn assert_request(&mut self) -> TrackRequest {
		self.requested_track()
			.now_or_never()
			.expect("request would have blocked")
			.expect("would have errored")
			.expect("no request")
	}

	pub fn assert_no_request(&mut self) {
		assert!(
			self.requested_track().now_or_never().is_none(),
			"request would not have blocked"
		);
	}

	pub fn consumers(&self) -> usize {
		self.state.borrow().consumers()
	}

	pub fn assert_requests_done(&mut self) {
		let request = self
			.requested_track()
			.now_or_never()
			.expect("request would have blocked")
			.expect("would have errored");
		assert!(request.is_none(), "unexpected request");
	}
}

#[cfg(test)]
impl BroadcastConsumer {
	pub fn assert_not_closed(&self) {
		assert!(self.closed().now_or_never().is_none(), "should not be closed");
	}

	pub fn assert_closed(&self) {
		assert!(self.closed().now_or_never().is_some(), "should be closed");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert() {
		let mut producer = BroadcastProducer::new();
		let mut track1 = TrackProducer::new("track1");

		// Make sure we can publish before a consumer is created.
		producer.publish_track(&track1).unwrap();
		assert_eq!(producer.publish_track(&TrackProducer::new("track1")), Err(Error::Duplicate));

		let consumer = producer.consume();
		let mut track1_sub = consumer.subscribe_track("track1");
		track1_sub.assert_no_group();

		track1.append_group().unwrap();
		track1_sub.assert_group();

		// No request was made for a track that already exists.
		producer.assert_no_request();
	}

	#[test]
	fn requests() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();
		let consumer2 = consumer.clone();

		let mut track1 = consumer.subscribe_track("track1");
		track1.assert_not_closed();
		track1.assert_no_group();

		// Duplicate requests share a track while it's pending.
		let mut track2 = consumer2.subscribe_track(Track::new("track1"));
		assert!(track2.is_clone(&track1));

		let request = producer.assert_request();
		assert_eq!(request.name(), "track1");
		producer.assert_no_request();

		let mut track = request.accept().unwrap();
		track.append_group().unwrap();
		track1.assert_group();
		track2.assert_group();

		// Later subscriptions share the accepted track.
		let track3 = consumer.subscribe_track("track1");
		assert!(track3.is_clone(&track1));
		producer.assert_no_request();
	}

	#[test]
	fn reject() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let track1 = consumer.subscribe_track("video");
		producer.assert_request().reject(Error::App(404));
		track1.assert_error(Error::App(404));

		// A rejected track is requested again.
		let track2 = consumer.subscribe_track("video");
		track2.assert_not_closed();
		drop(producer.assert_request());
		track2.assert_error(Error::NotFound);

		// The broadcast itself is unaffected.
		consumer.assert_not_closed();
	}

	#[test]
	fn create_answers_request() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let mut sub = consumer.subscribe_track("audio");
		let mut track = producer.create_track("audio").unwrap();
		assert_eq!(producer.create_track("audio").err(), Some(Error::Duplicate));

		track.append_group().unwrap();
		sub.assert_group();

		// The queued request was answered, so it's skipped.
		producer.assert_no_request();
		assert_eq!(producer.remove_track("audio").unwrap().name(), "audio");
		assert_eq!(producer.remove_track("audio").err(), Some(Error::NotFound));
	}

	#[test]
	fn finish() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let pending = consumer.subscribe_track("early");
		producer.finish().unwrap();

		// Requests made before the finish are still served.
		let request = producer.assert_request();
		producer.assert_requests_done();
		let _track = request.accept().unwrap();
		pending.assert_not_closed();

		// But new ones are rejected immediately.
		let late = consumer.subscribe_track("late");
		late.assert_error(Error::NotFound);
	}

	#[test]
	fn close_pending() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let mut accepted = consumer.subscribe_track("accepted");
		let _track = producer.assert_request().accept().unwrap();
		let mut never = consumer.subscribe_track("never");

		producer.close().unwrap();
		consumer.assert_closed();
		producer.assert_requests_done();

		// A request nobody answered errors instead of hanging.
		assert_eq!(never.next_group().now_or_never().unwrap().err(), Some(Error::Closed));
		accepted.assert_finished();

		let after = consumer.subscribe_track("after");
		after.assert_error(Error::Closed);
	}

	#[test]
	fn abort_cascades() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let mut track = producer.create_track("video").unwrap();
		let mut group = track.append_group().unwrap();
		let sub = consumer.subscribe_track("never");

		consumer.abort(Error::App(9)).unwrap();
		assert!(producer.is_closed());
		assert_eq!(producer.abort(Error::App(9)), Ok(()));
		assert_eq!(producer.close(), Err(Error::Closed));

		assert_eq!(track.append_group().err(), Some(Error::App(9)));
		assert_eq!(group.write_frame("late"), Err(Error::App(9)));
		sub.assert_error(Error::App(9));
		assert_eq!(producer.requested_track().now_or_never().unwrap().err(), Some(Error::App(9)));
	}

	#[test]
	fn dropped() {
		let producer = BroadcastProducer::new();
		let consumer = producer.consume();
		let track = consumer.subscribe_track("video");

		drop(producer);
		consumer.assert_closed();
		track.assert_error(Error::Dropped);
	}

	#[test]
	fn dropped_track() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let track = producer.create_track("video").unwrap();
		let mut sub = consumer.subscribe_track("video");
		sub.assert_no_group();

		// The broadcast doesn't keep the track alive.
		drop(track);
		assert_eq!(sub.next_group().now_or_never().unwrap().err(), Some(Error::Dropped));

		// The name can be produced again.
		let _track = producer.create_track("video").unwrap();
		consumer.assert_not_closed();
	}

	#[test]
	fn dropped_accepted_track() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let mut sub = consumer.subscribe_track("audio");
		let track = producer.assert_request().accept().unwrap();
		sub.assert_no_group();

		drop(track);
		assert_eq!(sub.next_group().now_or_never().unwrap().err(), Some(Error::Dropped));
		assert_eq!(producer.remove_track("audio").err(), Some(Error::NotFound));
	}

	#[test]
	fn published_track_follows_caller() {
		let mut producer = BroadcastProducer::new();
		let consumer = producer.consume();

		let track = TrackProducer::new("meta");
		producer.publish_track(&track).unwrap();
		let sub = consumer.subscribe_track("meta");
		sub.assert_not_closed();

		drop(track);
		sub.assert_error(Error::Dropped);
	}
}
