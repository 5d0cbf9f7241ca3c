//! # moq-core: live media pub/sub
//!
//! `moq-core` delivers live media with sub-second latency.
//! Media is split into independent groups so a slow consumer can skip ahead instead of buffering.
//!
//! ## API
//!
//! The API is built around Producer/Consumer pairs, with the hierarchy:
//! - [Connection]: A session with a peer, publishing and consuming [Broadcast]s by [Path].
//! - [Broadcast]: A collection of [Track]s, produced by a single publisher.
//! - [Track]: A collection of [Group]s, delivered out-of-order until expired.
//! - [Group]: A collection of [Frame]s, delivered in order until cancelled.
//!
//! For example, a media encoder could:
//! - [Connection::connect] over a [transport::Session] to reach a peer.
//! - [Broadcast::produce] and [Connection::publish] the [BroadcastConsumer] half.
//! - [BroadcastProducer::create_track] for each track, or answer [BroadcastProducer::requested_track] on demand.
//! - [TrackProducer::append_group] for each Group of Pictures (each I-frame) or audio frame.
//! - [GroupProducer::write_frame] for each frame in the group.
//!
//! It's similar but in reverse for consuming media:
//! - [Connection::consume] to get a [BroadcastConsumer] for a path published by the peer.
//! - [BroadcastConsumer::subscribe_track] to subscribe to a [TrackConsumer] for a specific track.
//! - [TrackConsumer::next_group] to block until the next group is available.
//! - [GroupConsumer::read_frame] to block until the next frame is available.
//!
//! Closing anything closes everything beneath it with the same outcome.
//! A [Connection] closes its broadcasts, a broadcast closes its tracks, and a track closes its groups.

mod connection;
mod error;
mod model;
mod path;

pub mod coding;
pub mod lite;
pub mod transport;

pub use connection::*;
pub use error::*;
pub use model::*;
pub use path::*;
