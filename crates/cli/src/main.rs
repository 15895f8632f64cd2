use clap::Parser;
use sdr_cli::{cli::Cli, logging, run};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = run(cli).await {
		eprintln!("sdr: {err:#}");
		std::process::exit(1);
	}
}
