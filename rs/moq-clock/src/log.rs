use clap::Args;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Args, Clone, Debug)]
pub struct Log {
	/// The default log level, overridden per target by RUST_LOG.
	#[arg(long = "log-level", env = "MOQ_LOG_LEVEL", default_value = "info")]
	pub level: tracing::Level,
}

impl Log {
	pub fn level(&self) -> LevelFilter {
		LevelFilter::from_level(self.level)
	}

	pub fn init(&self) {
		let filter = EnvFilter::builder()
			.with_default_directive(self.level().into())
			.from_env_lossy();

		tracing_subscriber::fmt()
			.with_writer(std::io::stderr)
			.with_env_filter(filter)
			.init();
	}
}
