use crate::coding;

/// A list of possible errors that can occur during the session.
///
/// Errors are cloned and fanned out to every consumer of a closed entity,
/// and compared to decide whether a second close is a repeat or a conflict.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
	/// The underlying transport failed.
	#[error("transport error")]
	Transport,

	#[error("decode error")]
	Decode,

	#[error("unsupported versions")]
	Version,

	/// An unexpected stream type was received
	#[error("unexpected stream type")]
	UnexpectedStream,

	/// Some VarInt was too large and we were too lazy to handle it
	#[error("varint bounds exceeded")]
	BoundsExceeded,

	/// A duplicate ID was used
	// The broadcast/track/path is a duplicate
	#[error("duplicate")]
	Duplicate,

	// Cancel is returned when there are no more readers.
	#[error("cancelled")]
	Cancel,

	/// The entity (or the connection carrying it) was closed.
	#[error("closed")]
	Closed,

	/// Every producer handle was dropped without closing.
	#[error("dropped")]
	Dropped,

	/// The group is older than the latest group and dropped.
	#[error("old")]
	Old,

	/// The group was evicted from the cache before it was finished.
	#[error("expired")]
	Expired,

	// The application closes the stream with a code.
	#[error("app code={0}")]
	App(u16),

	#[error("not found")]
	NotFound,

	#[error("invalid path")]
	InvalidPath,

	#[error("protocol violation")]
	ProtocolViolation,

	#[error("unexpected message")]
	UnexpectedMessage,
}

impl Error {
	/// An integer code that is sent over the wire.
	pub fn to_code(&self) -> u32 {
		match self {
			Self::Cancel => 0,
			Self::Closed => 1,
			Self::Old => 2,
			Self::Expired => 3,
			Self::Transport => 4,
			Self::Decode => 5,
			Self::Dropped => 6,
			Self::InvalidPath => 7,
			Self::Version => 9,
			Self::UnexpectedStream => 10,
			Self::BoundsExceeded => 11,
			Self::Duplicate => 12,
			Self::NotFound => 13,
			Self::ProtocolViolation => 15,
			Self::UnexpectedMessage => 16,
			Self::App(app) => *app as u32 + 64,
		}
	}

	/// Decode an error from a wire code.
	pub fn from_code(code: u32) -> Self {
		match code {
			0 => Self::Cancel,
			1 => Self::Closed,
			2 => Self::Old,
			3 => Self::Expired,
			4 => Self::Transport,
			5 => Self::Decode,
			6 => Self::Dropped,
			7 => Self::InvalidPath,
			9 => Self::Version,
			10 => Self::UnexpectedStream,
			11 => Self::BoundsExceeded,
			12 => Self::Duplicate,
			13 => Self::NotFound,
			15 => Self::ProtocolViolation,
			16 => Self::UnexpectedMessage,
			code if code >= 64 => match u16::try_from(code - 64) {
				Ok(app) => Self::App(app),
				Err(_) => Self::ProtocolViolation,
			},
			_ => Self::ProtocolViolation,
		}
	}

	/// Convert an IO error from a stream into an [Error].
	pub(crate) fn from_io(err: std::io::Error) -> Self {
		tracing::debug!(%err, "stream error");
		Self::Transport
	}
}

impl From<coding::DecodeError> for Error {
	fn from(err: coding::DecodeError) -> Self {
		tracing::warn!(%err, "decode error");
		Error::Decode
	}
}

impl From<coding::BoundsExceeded> for Error {
	fn from(err: coding::BoundsExceeded) -> Self {
		tracing::warn!(%err, "bounds exceeded");
		Error::BoundsExceeded
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn code_roundtrip() {
		let errors = [
			Error::Cancel,
			Error::Closed,
			Error::Dropped,
			Error::Expired,
			Error::NotFound,
			Error::Duplicate,
			Error::App(7),
		];

		for err in errors {
			assert_eq!(Error::from_code(err.to_code()), err);
		}
	}

	#[test]
	fn unknown_code() {
		assert_eq!(Error::from_code(8), Error::ProtocolViolation);
		assert_eq!(Error::from_code(64 + u16::MAX as u32 + 1), Error::ProtocolViolation);
		assert_eq!(Error::from_code(64), Error::App(0));
	}
}
