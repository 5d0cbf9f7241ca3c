use std::{fmt, ops::Deref};

use tokio::sync::watch;

use crate::{Error, Result};

/// Called exactly once, when the state transitions to closed.
///
/// Used to close child entities (groups of a track, tracks of a broadcast) with the same outcome.
pub(crate) trait Cascade {
	fn cascade(&mut self, closed: &Result<()>);
}

pub(crate) struct State<T> {
	value: T,

	// Some once closed, cleanly or with an error.
	closed: Option<Result<()>>,

	// Reference counts of the handles.
	producers: usize,
	consumers: usize,
}

impl<T> State<T> {
	pub fn closed(&self) -> Option<&Result<()>> {
		self.closed.as_ref()
	}

	/// Returns the error to report when modifying a closed state.
	fn check(&self) -> Result<()> {
		match &self.closed {
			None => Ok(()),
			Some(Ok(())) => Err(Error::Closed),
			Some(Err(err)) => Err(err.clone()),
		}
	}
}

impl<T: Cascade> State<T> {
	/// First close wins. Returns true if this call closed the state.
	fn finish(&mut self, result: Result<()>) -> Result<bool> {
		match &self.closed {
			Some(closed) if *closed == result => Ok(false),
			Some(_) => Err(Error::Closed),
			None => {
				self.value.cascade(&result);
				self.closed = Some(result);
				Ok(true)
			}
		}
	}
}

#[cfg(test)]
impl<T> State<T> {
	pub fn consumers(&self) -> usize {
		self.consumers
	}
}

impl<T> Deref for State<T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.value
	}
}

// Shared by the producer and consumer handles.
fn modify<T, R>(state: &watch::Sender<State<T>>, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
	let mut result = Err(Error::Closed);

	state.send_if_modified(|state| {
		result = state.check().and_then(|_| f(&mut state.value));
		result.is_ok()
	});

	result
}

fn finish<T: Cascade>(state: &watch::Sender<State<T>>, closed: Result<()>) -> Result<()> {
	let mut result = Ok(());

	state.send_if_modified(|state| match state.finish(closed) {
		Ok(modified) => modified,
		Err(err) => {
			result = Err(err);
			false
		}
	});

	result
}

async fn wait_for<T, R>(state: &watch::Sender<State<T>>, mut f: impl FnMut(&T) -> Option<R>) -> Result<Option<R>> {
	let mut rx = state.subscribe();
	let mut output = None;

	// Values are returned before the close, so consumers drain everything that was written.
	let state = rx
		.wait_for(|state| {
			output = f(&state.value);
			output.is_some() || state.closed.is_some()
		})
		.await
		.map_err(|_| Error::Dropped)?;

	if output.is_some() {
		return Ok(output);
	}

	match state.closed.clone() {
		Some(Ok(())) => Ok(None),
		Some(Err(err)) => Err(err),
		None => Err(Error::Dropped),
	}
}

fn update<T, R>(state: &watch::Sender<State<T>>, f: impl FnOnce(&mut T) -> R) -> R {
	let mut f = Some(f);
	let mut result = None;

	state.send_if_modified(|state| {
		if let Some(f) = f.take() {
			result = Some(f(&mut state.value));
		}
		false
	});

	// send_if_modified always runs the closure exactly once.
	match result {
		Some(result) => result,
		None => unreachable!("closure was not called"),
	}
}

async fn closed<T>(state: &watch::Sender<State<T>>) -> Result<()> {
	let mut rx = state.subscribe();
	let state = rx.wait_for(|state| state.closed.is_some()).await.map_err(|_| Error::Dropped)?;
	state.closed.clone().unwrap_or(Err(Error::Dropped))
}

/// The writing half of some shared state.
///
/// When every clone is dropped without closing, the state is closed with [Error::Dropped].
pub(crate) struct Producer<T: Cascade> {
	state: watch::Sender<State<T>>,
}

impl<T: Cascade> Producer<T> {
	pub fn new(value: T) -> Self {
		Self {
			state: watch::Sender::new(State {
				value,
				closed: None,
				producers: 1,
				consumers: 0,
			}),
		}
	}

	/// Mutate the value and wake up any consumers, failing if closed.
	pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
		modify(&self.state, f)
	}

	pub fn close(&self) -> Result<()> {
		finish(&self.state, Ok(()))
	}

	pub fn abort(&self, err: Error) -> Result<()> {
		finish(&self.state, Err(err))
	}

	pub fn borrow(&self) -> watch::Ref<'_, State<T>> {
		self.state.borrow()
	}

	pub fn consume(&self) -> Consumer<T> {
		self.state.send_if_modified(|state| {
			state.consumers += 1;
			false
		});

		Consumer {
			state: self.state.clone(),
		}
	}

	pub async fn wait_for<R>(&self, f: impl FnMut(&T) -> Option<R>) -> Result<Option<R>> {
		wait_for(&self.state, f).await
	}

	pub async fn closed(&self) -> Result<()> {
		closed(&self.state).await
	}

	/// Block until there are no consumers, or error if closed first.
	pub async fn unused(&self) -> Result<()> {
		let mut rx = self.state.subscribe();
		let state = rx
			.wait_for(|state| state.consumers == 0 || state.closed.is_some())
			.await
			.map_err(|_| Error::Dropped)?;

		match state.consumers {
			0 => Ok(()),
			_ => state.check(),
		}
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.same_channel(&other.state)
	}

	/// A handle that doesn't keep the state open.
	pub fn weak(&self) -> Weak<T> {
		Weak {
			state: self.state.clone(),
		}
	}
}

impl<T: Cascade> Clone for Producer<T> {
	fn clone(&self) -> Self {
		self.state.send_if_modified(|state| {
			state.producers += 1;
			false
		});

		Self {
			state: self.state.clone(),
		}
	}
}

impl<T: Cascade> Drop for Producer<T> {
	fn drop(&mut self) {
		self.state.send_if_modified(|state| {
			state.producers -= 1;
			if state.producers > 0 || state.closed.is_some() {
				return false;
			}

			let dropped = Err(Error::Dropped);
			state.value.cascade(&dropped);
			state.closed = Some(dropped);
			true
		});
	}
}

impl<T: Cascade> fmt::Debug for Producer<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("Producer")
			.field("closed", &state.closed)
			.field("producers", &state.producers)
			.field("consumers", &state.consumers)
			.finish()
	}
}

/// The reading half of some shared state.
///
/// Consumers may still close the state, which is how a reader asks the writer to stop.
pub(crate) struct Consumer<T: Cascade> {
	state: watch::Sender<State<T>>,
}

impl<T: Cascade> Consumer<T> {
	pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
		modify(&self.state, f)
	}

	pub fn finish(&self, closed: Result<()>) -> Result<()> {
		finish(&self.state, closed)
	}

	pub fn borrow(&self) -> watch::Ref<'_, State<T>> {
		self.state.borrow()
	}

	pub async fn wait_for<R>(&self, f: impl FnMut(&T) -> Option<R>) -> Result<Option<R>> {
		wait_for(&self.state, f).await
	}

	pub async fn closed(&self) -> Result<()> {
		closed(&self.state).await
	}

	pub fn is_clone(&self, other: &Self) -> bool {
		self.state.same_channel(&other.state)
	}

	/// Mutate bookkeeping without waking anybody, even when closed.
	pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		update(&self.state, f)
	}
}

impl<T: Cascade> Clone for Consumer<T> {
	fn clone(&self) -> Self {
		self.state.send_if_modified(|state| {
			state.consumers += 1;
			false
		});

		Self {
			state: self.state.clone(),
		}
	}
}

impl<T: Cascade> Drop for Consumer<T> {
	fn drop(&mut self) {
		self.state.send_if_modified(|state| {
			state.consumers -= 1;
			state.consumers == 0
		});
	}
}

impl<T: Cascade> fmt::Debug for Consumer<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("Consumer")
			.field("closed", &state.closed)
			.field("consumers", &state.consumers)
			.finish()
	}
}

/// A producer handle that doesn't count towards [Producer] references.
///
/// The state still closes with [Error::Dropped] once every real producer is gone.
pub(crate) struct Weak<T: Cascade> {
	state: watch::Sender<State<T>>,
}

impl<T: Cascade> Weak<T> {
	/// Returns a real producer, or None once every producer was dropped.
	pub fn upgrade(&self) -> Option<Producer<T>> {
		let mut alive = false;
		self.state.send_if_modified(|state| {
			if state.producers > 0 {
				state.producers += 1;
				alive = true;
			}
			false
		});

		alive.then(|| Producer {
			state: self.state.clone(),
		})
	}

	pub fn finish(&self, closed: Result<()>) -> Result<()> {
		finish(&self.state, closed)
	}

	pub fn borrow(&self) -> watch::Ref<'_, State<T>> {
		self.state.borrow()
	}

	pub fn consume(&self) -> Consumer<T> {
		self.state.send_if_modified(|state| {
			state.consumers += 1;
			false
		});

		Consumer {
			state: self.state.clone(),
		}
	}

	pub fn is_clone(&self, other: &Producer<T>) -> bool {
		self.state.same_channel(&other.state)
	}
}

impl<T: Cascade> Clone for Weak<T> {
	fn clone(&self) -> Self {
		Self {
			state: self.state.clone(),
		}
	}
}

impl<T: Cascade> fmt::Debug for Weak<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("Weak")
			.field("closed", &state.closed)
			.field("producers", &state.producers)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Default)]
	struct Counter(usize);

	impl Cascade for Counter {
		fn cascade(&mut self, _closed: &Result<()>) {
			self.0 += 1;
		}
	}

	#[test]
	fn weak_does_not_keep_open() {
		let producer = Producer::new(Counter::default());
		let consumer = producer.consume();
		let weak = producer.weak();

		let upgraded = weak.upgrade().expect("producer is alive");
		drop(producer);
		assert!(consumer.borrow().closed().is_none());

		drop(upgraded);
		assert_eq!(consumer.borrow().closed(), Some(&Err(Error::Dropped)));
		assert_eq!(consumer.borrow().0, 1);

		// Too late to revive it.
		assert!(weak.upgrade().is_none());
	}

	#[test]
	fn update_is_silent() {
		let producer = Producer::new(Counter::default());
		let consumer = producer.consume();
		let mut rx = producer.state.subscribe();
		rx.mark_unchanged();

		consumer.update(|counter| counter.0 = 5);
		assert!(!rx.has_changed().unwrap());
		assert_eq!(producer.borrow().0, 5);

		// Works on closed state too.
		producer.close().unwrap();
		assert_eq!(consumer.update(|counter| counter.0), 6);
	}
}
