use std::path::PathBuf;

use clap::Parser;

use gossamer::util::Shutdown;

/// Partition leadership and cluster membership for a gossamer broker.
#[derive(Debug, Parser)]
#[command(name = "gossamer", version)]
struct Args {
    /// Location of the config file.
    #[arg(long, value_name = "PATH", default_value = "Config.toml")]
    config: PathBuf,

    /// Log filter directives, overrides RUST_LOG.
    #[arg(long, value_name = "FILTER")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    gossamer::logger::init(args.log.as_deref())?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    ctrlc::set_handler(move || signal.shutdown())?;

    gossamer::gossamer(args.config, shutdown).await
}
