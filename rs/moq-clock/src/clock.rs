use anyhow::Context;

use chrono::prelude::*;
use moq_core::*;

/// Writes one group per minute, with a frame for every second.
pub struct Publisher {
	track: TrackProducer,
}

impl Publisher {
	pub fn new(track: TrackProducer) -> Self {
		Self { track }
	}

	pub async fn run(mut self) -> anyhow::Result<()> {
		let start = Utc::now();
		let mut now = start;

		// Just for fun, don't start at zero.
		let mut sequence = start.minute();

		loop {
			let segment = self.track.create_group(sequence)?;
			sequence += 1;

			tokio::spawn(async move {
				if let Err(err) = Self::send_segment(segment, now).await {
					tracing::warn!(%err, "failed to send minute");
				}
			});

			let next = (now + chrono::TimeDelta::minutes(1))
				.with_second(0)
				.and_then(|next| next.with_nanosecond(0))
				.context("invalid timestamp")?;

			tokio::time::sleep((next - now).to_std()?).await;

			// Just assume we didn't undersleep.
			now = next;
		}
	}

	async fn send_segment(mut segment: GroupProducer, mut now: DateTime<Utc>) -> anyhow::Result<()> {
		// Everything but the second.
		let base = now.format("%Y-%m-%d %H:%M:").to_string();
		segment.write_frame(base)?;

		loop {
			segment.write_frame(now.format("%S").to_string())?;

			let next = (now + chrono::TimeDelta::seconds(1))
				.with_nanosecond(0)
				.context("invalid timestamp")?;

			tokio::time::sleep((next - now).to_std()?).await;

			// Get the current time again to check if we overslept.
			let next = Utc::now();
			if next.minute() != now.minute() {
				break;
			}

			now = next;
		}

		segment.close()?;

		Ok(())
	}
}

/// Prints each second as it arrives.
pub struct Subscriber {
	track: TrackConsumer,
}

impl Subscriber {
	pub fn new(track: TrackConsumer) -> Self {
		Self { track }
	}

	/// Print groups until the track ends or `limit` groups were read.
	pub async fn run(mut self, limit: Option<u64>) -> anyhow::Result<()> {
		let mut count = 0;

		while limit.is_none_or(|limit| count < limit) {
			let Some(mut group) = self.track.next_group().await? else {
				break;
			};

			tracing::debug!(sequence = group.sequence, "received minute");
			count += 1;

			let base = group
				.read_frame()
				.await
				.context("failed to read first frame")?
				.context("empty group")?;

			let base = String::from_utf8_lossy(base.payload()).into_owned();

			while let Some(frame) = group.read_frame().await? {
				let second = String::from_utf8_lossy(frame.payload());
				println!("{base}{second}");
			}
		}

		Ok(())
	}
}
