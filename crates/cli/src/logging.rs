use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbosity: u8) {
	// 0 = connection lifecycle and errors, runtime noise suppressed
	// 1 (-v) = debug for the relay, info for the runtime
	// 2+ (-vv) = trace for everything
	let filter = match verbosity {
		0 => "info,sdr_runtime=warn",
		1 => "debug,sdr_runtime=info",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
