use std::{fmt, str::FromStr};

use bytes::{Buf, BufMut};

use crate::{
	coding::{BoundsExceeded, Decode, DecodeError, Encode},
	Error, Result,
};

/// The delimiter between path segments, both on the wire and in string form.
pub const DELIMITER: char = '/';

/// A normalized, slash-delimited name used to address a broadcast on a connection.
///
/// A single leading and trailing slash is trimmed. Empty segments (ex. `a//b` or `a//`) are invalid.
/// The empty string is the root path with zero segments.
///
/// Two paths are equal iff their segments are equal, which is why we only store the canonical form.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct Path(String);

impl Path {
	/// Parse and normalize a path.
	pub fn new(path: &str) -> Result<Self> {
		let path = path.strip_prefix(DELIMITER).unwrap_or(path);
		let path = match path.strip_suffix(DELIMITER) {
			// Just slashes, ex. `//`.
			Some("") => return Err(Error::InvalidPath),
			Some(path) => path,
			None => path,
		};

		if !path.is_empty() && path.split(DELIMITER).any(str::is_empty) {
			return Err(Error::InvalidPath);
		}

		Ok(Self(path.to_string()))
	}

	/// The root path, containing no segments.
	pub fn root() -> Self {
		Self::default()
	}

	/// Returns true if this is the root path.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// The canonical string form.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Iterate over the segments in order.
	pub fn segments(&self) -> impl Iterator<Item = &str> {
		self.0.split(DELIMITER).filter(|segment| !segment.is_empty())
	}

	/// Append another path to this one.
	pub fn join(&self, other: &Path) -> Path {
		match (self.is_empty(), other.is_empty()) {
			(_, true) => self.clone(),
			(true, false) => other.clone(),
			(false, false) => Self(format!("{}{}{}", self.0, DELIMITER, other.0)),
		}
	}

	/// Remove a prefix from this path, matching whole segments only.
	///
	/// Returns None if this path does not start with `prefix`.
	pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
		if prefix.is_empty() {
			return Some(self.clone());
		}

		let rest = self.0.strip_prefix(prefix.as_str())?;
		if rest.is_empty() {
			return Some(Self::root());
		}

		rest.strip_prefix(DELIMITER).map(|rest| Self(rest.to_string()))
	}
}

impl FromStr for Path {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::new(s)
	}
}

impl TryFrom<&str> for Path {
	type Error = Error;

	fn try_from(s: &str) -> Result<Self> {
		Self::new(s)
	}
}

impl TryFrom<String> for Path {
	type Error = Error;

	fn try_from(s: String) -> Result<Self> {
		Self::new(&s)
	}
}

impl From<Path> for String {
	fn from(path: Path) -> Self {
		path.0
	}
}

impl AsRef<str> for Path {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Path {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl fmt::Debug for Path {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.0)
	}
}

impl Encode for Path {
	fn encode<W: BufMut>(&self, w: &mut W) -> std::result::Result<(), BoundsExceeded> {
		self.as_str().encode(w)
	}
}

impl Decode for Path {
	fn decode<R: Buf>(r: &mut R) -> std::result::Result<Self, DecodeError> {
		let path = String::decode(r)?;
		Self::new(&path).map_err(|_| DecodeError::InvalidPath)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalize() {
		let path = Path::new("/live/room/").unwrap();
		assert_eq!(path.as_str(), "live/room");
		assert_eq!(path, Path::new("live/room").unwrap());
		assert_eq!(path.segments().collect::<Vec<_>>(), ["live", "room"]);
	}

	#[test]
	fn empty_segments() {
		assert_eq!(Path::new("live//room"), Err(Error::InvalidPath));
		// Only one trailing slash is trimmed, the rest are empty segments.
		assert_eq!("a///".parse::<Path>(), Err(Error::InvalidPath));
		assert_eq!(Path::new("//a"), Err(Error::InvalidPath));
		assert_eq!(Path::new("//"), Err(Error::InvalidPath));
		assert_eq!(Path::new("a/").unwrap().as_str(), "a");
	}

	#[test]
	fn root() {
		let root = Path::new("/").unwrap();
		assert!(root.is_empty());
		assert_eq!(root, Path::root());
		assert_eq!(root.segments().count(), 0);
	}

	#[test]
	fn join_and_strip() {
		let live = Path::new("live").unwrap();
		let room = Path::new("room/1").unwrap();

		let joined = live.join(&room);
		assert_eq!(joined.as_str(), "live/room/1");
		assert_eq!(joined.strip_prefix(&live), Some(room));
		assert_eq!(joined.strip_prefix(&joined), Some(Path::root()));

		// Only whole segments match.
		let partial = Path::new("liv").unwrap();
		assert_eq!(joined.strip_prefix(&partial), None);
	}

	#[test]
	fn wire() {
		let path = Path::new("live/room").unwrap();
		let encoded = path.encode_bytes().unwrap();
		assert_eq!(encoded.as_ref(), b"\x09live/room");

		let invalid: &[u8] = b"\x04a//b";
		assert!(matches!(Path::decode(&mut &invalid[..]), Err(DecodeError::InvalidPath)));
	}
}
