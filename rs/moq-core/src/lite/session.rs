use std::collections::HashMap;

use tokio::sync::watch;

use crate::{
	lite::{ClientSetup, ControlType, Publisher, ServerSetup, Stream, Subscriber, Version},
	transport::Session,
	BroadcastConsumer, BroadcastProducer, Error, Path, Result,
};

/// Perform the client side of the handshake, returning the version chosen by the server.
pub(crate) async fn connect<S: Session>(session: &S) -> Result<Version> {
	let mut stream = Stream::open(session).await?;

	let client = ClientSetup {
		versions: Version::ALL.iter().copied().map(u64::from).collect(),
	};

	stream.writer.encode(&ControlType::Session).await?;
	stream.writer.encode(&client).await?;
	tracing::trace!(?client, "sent client setup");

	// The server closes the session if it can't pick a version, which is more useful than the stream ending.
	let server = tokio::select! {
		biased;
		err = session.closed() => return Err(err),
		server = stream.reader.decode::<ServerSetup>() => server?,
	};
	tracing::trace!(?server, "received server setup");

	let version = Version::try_from(server.version).map_err(|_| Error::Version)?;
	stream.writer.finish().await?;

	Ok(version)
}

/// Perform the server side of the handshake, picking the first offered version we support.
pub(crate) async fn accept<S: Session>(session: &S) -> Result<Version> {
	let mut stream = Stream::accept(session).await?;

	let kind = stream.reader.decode::<ControlType>().await?;
	if kind != ControlType::Session {
		return Err(Error::UnexpectedStream);
	}

	let client = stream.reader.decode::<ClientSetup>().await?;
	tracing::trace!(?client, "received client setup");

	let Some(version) = client.versions.iter().find_map(|v| Version::try_from(*v).ok()) else {
		let err = Error::Version;
		session.close(err.to_code(), "unsupported versions");
		return Err(err);
	};

	let server = ServerSetup { version: version.into() };
	stream.writer.encode(&server).await?;
	stream.writer.finish().await?;
	tracing::trace!(?server, "sent server setup");

	Ok(version)
}

/// Serve the session until it closes or errors.
///
/// Local broadcasts are served from `published`; broadcasts sent over `consumed` are fetched from the peer.
pub(crate) async fn run<S: Session>(
	session: S,
	published: watch::Receiver<HashMap<Path, BroadcastConsumer>>,
	consumed: async_channel::Receiver<(Path, BroadcastProducer)>,
) -> Result<()> {
	let publisher = Publisher::new(session.clone(), published);
	let subscriber = Subscriber::new(session.clone());

	tokio::select! {
		res = publisher.run() => res,
		res = subscriber.run(consumed) => res,
		err = session.closed() => Err(err),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{coding::Writer, transport::mem};

	#[tokio::test]
	async fn handshake() {
		let (client, server) = mem::pair();
		let (client, server) = tokio::join!(connect(&client), accept(&server));
		assert_eq!(client.unwrap(), Version::Lite01);
		assert_eq!(server.unwrap(), Version::Lite01);
	}

	#[tokio::test]
	async fn unsupported_version() {
		let (client, server) = mem::pair();

		let offer = async {
			let (send, _recv) = client.open_bi().await.unwrap();
			let mut writer = Writer::new(send);
			writer.encode(&ControlType::Session).await.unwrap();
			writer.encode(&ClientSetup { versions: vec![1, 2] }).await.unwrap();
			client.closed().await
		};

		let (err, res) = tokio::join!(offer, accept(&server));
		assert_eq!(res, Err(Error::Version));
		assert_eq!(err, Error::Version);
	}
}
