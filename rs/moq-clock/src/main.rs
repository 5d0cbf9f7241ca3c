use std::time::Duration;

use anyhow::Context;
use clap::Parser;

mod clock;
mod log;

use moq_core::*;

/// Publish a clock and consume it again, over an in-memory connection.
#[derive(Parser, Clone)]
pub struct Config {
	/// The path of the clock broadcast.
	#[arg(long, default_value = "clock")]
	pub broadcast: String,

	/// The name of the clock track.
	#[arg(long, default_value = "seconds")]
	pub track: String,

	/// Exit after receiving this many minutes, or run forever.
	#[arg(long)]
	pub groups: Option<u64>,

	/// Drop minutes older than this many seconds.
	#[arg(long)]
	pub max_latency: Option<u64>,

	/// The log configuration.
	#[command(flatten)]
	pub log: log::Log,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::parse();
	config.log.init();

	let path = Path::new(&config.broadcast).context("invalid broadcast path")?;

	let (client, server) = transport::mem::pair();
	let (client, server) = tokio::try_join!(Connection::connect(client), Connection::accept(server))?;

	let mut track = Track::new(&config.track);
	if let Some(max_latency) = config.max_latency {
		track = track.with_max_latency(Duration::from_secs(max_latency));
	}

	let mut broadcast = Broadcast::produce();
	let publisher = clock::Publisher::new(broadcast.producer.create_track(track.clone())?);

	// Any other track is unknown.
	broadcast.producer.finish()?;
	server.publish(path.clone(), broadcast.consumer)?;

	tracing::info!(broadcast = %path, track = %track.name, "subscribing to clock");
	let subscriber = clock::Subscriber::new(client.consume(path).subscribe_track(track));

	let res = tokio::select! {
		res = publisher.run() => res.context("publisher failed"),
		res = subscriber.run(config.groups) => res.context("subscriber failed"),
		err = server.closed() => Err::<(), _>(err).context("server closed"),
		err = client.closed() => Err::<(), _>(err).context("client closed"),
	};

	client.close();
	server.close();

	res
}
