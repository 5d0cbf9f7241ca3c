//! The wire protocol spoken between two connections.
//!
//! You should not use this module directly; see [crate::Connection] for the high-level API.
//!
//! Every bidirectional stream starts with a [ControlType]:
//! - [ControlType::Session]: the [ClientSetup]/[ServerSetup] handshake.
//! - [ControlType::Subscribe]: a [Subscribe] request answered by a [SubscribeDone] when the track ends.
//!
//! Every unidirectional stream starts with a [DataType]:
//! - [DataType::Group]: a [GroupHeader] followed by [GroupMessage]s.

mod group;
mod message;
mod publisher;
mod session;
mod setup;
mod stream;
mod subscribe;
mod subscriber;
mod version;

pub use group::*;
pub use message::*;
use publisher::*;
pub(crate) use session::*;
pub use setup::*;
use stream::*;
pub use subscribe::*;
use subscriber::*;
pub use version::*;
