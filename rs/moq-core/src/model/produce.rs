/// A producer and consumer pair, returned by the `produce` constructors.
///
/// Either half may be cloned freely. A new consumer can be made at any time from the producer,
/// so dropping the consumer here does not close anything.
#[derive(Clone, Debug)]
pub struct Produce<P, C> {
	pub producer: P,
	pub consumer: C,
}

impl<P, C> Produce<P, C> {
	pub fn new(producer: P, consumer: C) -> Self {
		Self { producer, consumer }
	}
}
