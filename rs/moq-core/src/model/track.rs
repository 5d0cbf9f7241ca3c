//! A track is a named sequence of groups, split into a [TrackProducer] and [TrackConsumer] handle.
//!
//! A [TrackProducer] creates groups with increasing sequence numbers.
//! Groups are independent: an aborted group does not affect the groups around it.
//!
//! A [TrackConsumer] receives each group created after it was made, in sequence order.
//! A cloned [TrackConsumer] receives a copy of all new groups going forward (fanout).
//!
//! Groups may be evicted from the cache based on [Track::max_latency], in which case slow consumers skip them.
//! The track is closed with [Error::Dropped] when all producers are dropped without closing.

use std::{
	collections::{HashMap, VecDeque},
	fmt,
	ops::Deref,
	sync::Arc,
	time::Duration,
};

use tokio::time::Instant;

use super::{Cascade, Consumer, Group, GroupConsumer, GroupProducer, Produce, Producer, Weak};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
	/// The name of the track, unique within a broadcast.
	pub name: String,

	/// Groups created more than this long ago are evicted when a new group is created.
	///
	/// Groups are kept until the track is released when None.
	pub max_latency: Option<Duration>,
}

impl Track {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			max_latency: None,
		}
	}

	pub fn with_max_latency(mut self, max_latency: Duration) -> Self {
		self.max_latency = Some(max_latency);
		self
	}

	pub fn produce(self) -> Produce<TrackProducer, TrackConsumer> {
		let producer = TrackProducer::new(self);
		let consumer = producer.consume();
		Produce::new(producer, consumer)
	}
}

impl<T: AsRef<str>> From<T> for Track {
	fn from(name: T) -> Self {
		Self::new(name.as_ref())
	}
}

#[derive(Debug)]
struct GroupEntry {
	consumer: GroupConsumer,
	created: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct TrackState {
	// Groups in order of creation.
	// If None, the group has expired but was not in the front of the queue.
	groups: VecDeque<Option<GroupEntry>>,

	// +1 every time we remove a group from the front.
	offset: usize,

	// The minimum sequence number for the next group.
	next_sequence: u64,

	max_latency: Option<Duration>,

	// The next index of each consumer, so groups every consumer has passed can be released.
	cursors: HashMap<u64, usize>,
	next_cursor: u64,
}

impl TrackState {
	fn create_group(&mut self, info: Group) -> Result<GroupProducer> {
		if info.sequence < self.next_sequence {
			return Err(Error::Old);
		}

		let now = Instant::now();
		self.expire(now);
		self.release();

		let producer = GroupProducer::new(info);
		self.next_sequence = producer.sequence.saturating_add(1);
		self.groups.push_back(Some(GroupEntry {
			consumer: producer.consume(),
			created: now,
		}));

		Ok(producer)
	}

	// Evict any groups older than max_latency.
	fn expire(&mut self, now: Instant) {
		let Some(max_latency) = self.max_latency else {
			return;
		};

		for slot in self.groups.iter_mut() {
			let expired = match slot {
				Some(entry) => now.saturating_duration_since(entry.created) > max_latency,
				None => false,
			};

			if !expired {
				continue;
			}

			if let Some(entry) = slot.take() {
				// The group might already be finished, which is fine.
				let _ = entry.consumer.finish(Err(Error::Expired));
				tracing::trace!(sequence = entry.consumer.sequence, "expired group");
			}
		}

		self.pop_released();
	}

	// Drop finished groups that every consumer has already read past.
	// Late consumers start at the end, so nobody can ask for them again.
	fn release(&mut self) {
		let offset = self.offset;
		let end = offset + self.groups.len();
		let min = self.cursors.values().copied().min().unwrap_or(end);

		for (i, slot) in self.groups.iter_mut().enumerate() {
			if offset + i >= min {
				break;
			}

			if slot.as_ref().is_some_and(|entry| entry.consumer.is_closed()) {
				*slot = None;
			}
		}

		self.pop_released();
	}

	fn pop_released(&mut self) {
		while let Some(None) = self.groups.front() {
			self.groups.pop_front();
			self.offset += 1;
		}
	}

	// Start a new consumer cursor, by default after the newest group.
	fn register(&mut self, index: Option<usize>) -> (u64, usize) {
		let index = index.unwrap_or(self.offset + self.groups.len());
		let id = self.next_cursor;
		self.next_cursor += 1;
		self.cursors.insert(id, index);
		(id, index)
	}

	fn advance(&mut self, id: u64, index: usize) {
		if let Some(cursor) = self.cursors.get_mut(&id) {
			*cursor = index;
		}
		self.release();
	}

	fn unregister(&mut self, id: u64) {
		self.cursors.remove(&id);
		self.release();
	}

	// Returns the next cached group at or after the absolute index.
	fn next(&self, index: usize) -> Option<(usize, GroupConsumer)> {
		let start = index.saturating_sub(self.offset);
		self.groups
			.iter()
			.enumerate()
			.skip(start)
			.find_map(|(i, entry)| entry.as_ref().map(|entry| (self.offset + i, entry.consumer.clone())))
	}
}

impl Cascade for TrackState {
	fn cascade(&mut self, closed: &Result<()>) {
		// Unfinished groups are truncated, so even a clean close must not make them read as complete.
		// Groups that are already closed keep their own outcome.
		let err = match closed {
			Ok(()) => Error::Closed,
			Err(err) => err.clone(),
		};

		for entry in self.groups.iter().flatten() {
			let _ = entry.consumer.finish(Err(err.clone()));
		}
	}
}

/// A producer for a track, used to create new groups.
#[derive(Clone)]
pub struct TrackProducer {
	state: Producer<TrackState>,
	name: Arc<String>,
}

impl TrackProducer {
	pub fn new<T: Into<Track>>(info: T) -> Self {
		let info = info.into();
		Self {
			state: Producer::new(TrackState {
				max_latency: info.max_latency,
				..Default::default()
			}),
			name: Arc::new(info.name),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn max_latency(&self) -> Option<Duration> {
		self.state.borrow().max_latency
	}

	/// Change how long groups are cached, applied the next time a group is created.
	pub fn set_max_latency(&mut self, max_latency: Option<Duration>) -> Result<()> {
		self.state.modify(|state| {
			state.max_latency = max_latency;
			Ok(())
		})
	}

	/// Create a new group with the given sequence number.
	///
	/// Returns [Error::Old] if the sequence number is lower than the next expected one.
	pub fn create_group<T: Into<Group>>(&mut self, info: T) -> Result<GroupProducer> {
		let info = info.into();
		self.state.modify(|state| state.create_group(info))
	}

	/// Create a new group with the next sequence number.
	pub fn append_group(&mut self) -> Result<GroupProducer> {
		self.state.modify(|state| {
			let info = Group {
				sequence: state.next_sequence,
			};
			state.create_group(info)
		})
	}

	/// Clean termination of the track; any groups still open are aborted with [Error::Closed].
	pub fn close(&mut self) -> Result<()> {
		self.state.close()
	}

	/// Terminate the track and any open groups with an error.
	pub fn abort(&mut self, err: Error) -> Result<()> {
		self.state.abort(err)
	}

	/// Create a new consumer for the track, receiving groups created from now on.
	pub fn consume(&self) -> TrackConsumer {
		let state = self.state.consume();
		let (cursor, index) = state.update(|state| state.register(None));

		TrackConsumer {
			state,
			name: self.name.clone(),
			index,
			cursor,
		}
	}

	/// A handle that can consume or close the track without keeping it alive.
	pub(crate) fn weak(&self) -> TrackWeak {
		TrackWeak {
			state: self.state.weak(),
			name: self.name.clone(),
		}
	}

	/// Block until there are no active consumers.
	///
	/// Returns an error if the track is closed first.
	pub async fn unused(&self) -> Result<()> {
		self.state.unused().await
	}

	pub async fn closed(&self) -> Result<()> {
		self.state.closed().await
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed().is_some()
	}

	/// Return true if this is the same track.
	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

impl From<Track> for TrackProducer {
	fn from(info: Track) -> Self {
		TrackProducer::new(info)
	}
}

impl fmt::Debug for TrackProducer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TrackProducer")
			.field("name", &self.name)
			.field("state", &self.state)
			.finish()
	}
}

/// A [TrackProducer] that doesn't count as a producer.
///
/// Held by the broadcast, so the track still closes with [Error::Dropped] once the application drops it.
#[derive(Clone, Debug)]
pub(crate) struct TrackWeak {
	state: Weak<TrackState>,
	name: Arc<String>,
}

impl TrackWeak {
	pub fn upgrade(&self) -> Option<TrackProducer> {
		Some(TrackProducer {
			state: self.state.upgrade()?,
			name: self.name.clone(),
		})
	}

	pub fn consume(&self) -> TrackConsumer {
		let state = self.state.consume();
		let (cursor, index) = state.update(|state| state.register(None));

		TrackConsumer {
			state,
			name: self.name.clone(),
			index,
			cursor,
		}
	}

	pub fn close(&self) -> Result<()> {
		self.state.finish(Ok(()))
	}

	pub fn abort(&self, err: Error) -> Result<()> {
		self.state.finish(Err(err))
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed().is_some()
	}

	pub fn is_clone(&self, other: &TrackProducer) -> bool {
		self.state.is_clone(&other.state)
	}
}

/// A consumer for a track, used to read groups.
pub struct TrackConsumer {
	state: Consumer<TrackState>,
	name: Arc<String>,

	// The absolute index of the next group to return.
	index: usize,

	// Our entry in the track's cursors.
	cursor: u64,
}

impl TrackConsumer {
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Return the next group in sequence order, or None when the track is finished.
	///
	/// Groups that were evicted before we got to them are skipped.
	pub async fn next_group(&mut self) -> Result<Option<GroupConsumer>> {
		let index = self.index;
		let Some((index, group)) = self.state.wait_for(|state| state.next(index)).await? else {
			return Ok(None);
		};

		self.index = index + 1;

		let cursor = self.cursor;
		self.state.update(|state| state.advance(cursor, index + 1));

		Ok(Some(group))
	}

	/// Block until the track is closed.
	pub async fn closed(&self) -> Result<()> {
		self.state.closed().await
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed().is_some()
	}

	/// Ask the track to close with an error, which the producer and every other consumer observe.
	pub fn abort(&self, err: Error) -> Result<()> {
		self.state.finish(Err(err))
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.is_clone(&other.state)
	}
}

impl Clone for TrackConsumer {
	// The clone starts where we are, then runs independently.
	fn clone(&self) -> Self {
		let state = self.state.clone();
		let (cursor, index) = state.update(|state| state.register(Some(self.index)));

		Self {
			state,
			name: self.name.clone(),
			index,
			cursor,
		}
	}
}

impl Drop for TrackConsumer {
	fn drop(&mut self) {
		let cursor = self.cursor;
		self.state.update(|state| state.unregister(cursor));
	}
}

impl Deref for TrackConsumer {
	type Target = str;

	fn deref(&self) -> &Self::Target {
		&self.name
	}
}

impl fmt::Debug for TrackConsumer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TrackConsumer")
			.field("name", &self.name)
			.field("index", &self.index)
			.finish()
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl TrackConsumer {
	pub fn assert_group(&mut self) -> GroupConsumer {
		self.next_group()
			.now_or_never()
			.expect("group would have blocked")
			.expect("would have errored")
			.expect("track was closed")
	}

	pub fn assert_no_group(&mut self) {
		assert!(
			self.next_group().now_or_never().is_none(),
			"next group would not have blocked"
		);
	}

	pub fn assert_finished(&mut self) {
		let group = self
			.next_group()
			.now_or_never()
			.expect("next group would have blocked")
			.expect("would have errored");
		assert!(group.is_none(), "track was not finished");
	}

	pub fn assert_not_closed(&self) {
		assert!(self.closed().now_or_never().is_none(), "should not be closed");
	}

	pub fn assert_closed(&self) {
		assert!(self.closed().now_or_never().is_some(), "should be closed");
	}

	pub fn assert_error(&self, expected: Error) {
		let err = self
			.closed()
			.now_or_never()
			.expect("should not block")
			.expect_err("should be error");
		assert_eq!(err, expected);
	}
}
