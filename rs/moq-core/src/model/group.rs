//! A group is a stream of frames, split into a [GroupProducer] and [GroupConsumer] handle.
//!
//! A [GroupProducer] writes an ordered stream of frames.
//!
//! A [GroupConsumer] reads an ordered stream of frames.
//! The reader can be cloned, in which case each reader receives a copy of each frame. (fanout)
//!
//! The group is closed with [Error::Dropped] when all producers are dropped without closing.
use std::ops::Deref;

use super::{Cascade, Consumer, Frame, Produce, Producer};
use crate::{Error, Result};

/// A group contains a sequence number because they can arrive out of order.
///
/// You can use [crate::TrackProducer::append_group] if you just want to +1 the sequence number.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Group {
	pub sequence: u64,
}

impl Group {
	pub fn produce(self) -> Produce<GroupProducer, GroupConsumer> {
		let producer = GroupProducer::new(self);
		let consumer = producer.consume();
		Produce::new(producer, consumer)
	}
}

impl<T: Into<u64>> From<T> for Group {
	fn from(sequence: T) -> Self {
		Self {
			sequence: sequence.into(),
		}
	}
}

#[derive(Default, Debug)]
pub(crate) struct GroupState {
	// The frames that have been written thus far.
	// Retained until the group is released, so late readers replay from the start.
	frames: Vec<Frame>,
}

// Groups have no children.
impl Cascade for GroupState {
	fn cascade(&mut self, _closed: &Result<()>) {}
}

/// Create a group, frame-by-frame.
#[derive(Clone, Debug)]
pub struct GroupProducer {
	state: Producer<GroupState>,
	info: Group,
}

impl GroupProducer {
	pub fn new(info: Group) -> Self {
		Self {
			state: Producer::new(GroupState::default()),
			info,
		}
	}

	pub fn info(&self) -> &Group {
		&self.info
	}

	/// Append a frame, making it visible to every current and future consumer.
	///
	/// Fails if the group is already closed.
	pub fn write_frame<F: Into<Frame>>(&mut self, frame: F) -> Result<()> {
		let frame = frame.into();
		self.state.modify(|state| {
			state.frames.push(frame);
			Ok(())
		})
	}

	/// Clean termination of the group.
	pub fn close(&mut self) -> Result<()> {
		self.state.close()
	}

	/// Terminate the group with an error, delivered to consumers after any frames already written.
	pub fn abort(&mut self, err: Error) -> Result<()> {
		self.state.abort(err)
	}

	/// Create a new consumer for the group, starting at the first frame.
	pub fn consume(&self) -> GroupConsumer {
		GroupConsumer {
			state: self.state.consume(),
			info: self.info.clone(),
			index: 0,
		}
	}

	pub async fn closed(&self) -> Result<()> {
		self.state.closed().await
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed().is_some()
	}
}

impl Deref for GroupProducer {
	type Target = Group;

	fn deref(&self) -> &Self::Target {
		&self.info
	}
}

/// Consume a group, frame-by-frame.
///
/// If the consumer is cloned, it will receive a copy of all unread frames.
#[derive(Clone, Debug)]
pub struct GroupConsumer {
	state: Consumer<GroupState>,
	info: Group,

	// The number of frames we've read.
	// NOTE: Cloned readers inherit this offset, but then run in parallel.
	index: usize,
}

impl GroupConsumer {
	pub fn info(&self) -> &Group {
		&self.info
	}

	/// Read the next frame, or None when the group is finished.
	///
	/// Frames written before an error are still returned, then the error.
	pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
		let index = self.index;
		let frame = self.state.wait_for(|state| state.frames.get(index).cloned()).await?;

		if frame.is_some() {
			self.index += 1;
		}

		Ok(frame)
	}

	/// Read every remaining frame until the group is finished.
	pub async fn read_all(&mut self) -> Result<Vec<Frame>> {
		let mut frames = Vec::new();
		while let Some(frame) = self.read_frame().await? {
			frames.push(frame);
		}

		Ok(frames)
	}

	pub async fn closed(&self) -> Result<()> {
		self.state.closed().await
	}

	pub fn is_closed(&self) -> bool {
		self.state.borrow().closed().is_some()
	}

	// Used by the track to close groups it still holds.
	pub(crate) fn finish(&self, closed: Result<()>) -> Result<()> {
		self.state.finish(closed)
	}
}

impl Deref for GroupConsumer {
	type Target = Group;

	fn deref(&self) -> &Self::Target {
		&self.info
	}
}

#[cfg(test)]
use futures::FutureExt;

#[cfg(test)]
impl GroupConsumer {
	pub fn assert_frame(&mut self, expected: &str) {
		let frame = self
			.read_frame()
			.now_or_never()
			.expect("frame would have blocked")
			.expect("would have errored")
			.expect("group was closed");
		assert_eq!(frame.as_str().unwrap(), expected);
	}

	pub fn assert_no_frame(&mut self) {
		assert!(
			self.read_frame().now_or_never().is_none(),
			"read frame would not have blocked"
		);
	}

	pub fn assert_finished(&mut self) {
		let frame = self
			.read_frame()
			.now_or_never()
			.expect("read frame would have blocked")
			.expect("would have errored");
		assert!(frame.is_none(), "group was not finished");
	}

	pub fn assert_error(&mut self, expected: Error) {
		let err = self
			.read_frame()
			.now_or_never()
			.expect("read frame would have blocked")
			.expect_err("should be an error");
		assert_eq!(err, expected);
	}
}
