//! Magkal - magnetometer scale and bias calibration

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so console mode keeps stdout to itself
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli_args: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "magkal starting");

    match magkal_cli::run_cli_main(&cli_args) {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("magkal error: {e:#}");
            std::process::exit(1);
        }
    }
}
