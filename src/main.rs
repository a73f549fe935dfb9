//! Main entry point for the SMC bridge CLI

use clap::Parser;
use smc_bridge::{args::Args, client::SmcBridgeApp, config::BridgeConfig, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Print version and build metadata for binary identity verification
    let pkg_version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    eprintln!("smc-bridge v{} (git {}) built {}", pkg_version, git_hash, build_time);

    let args = Args::parse();
    logging::setup(args.verbose)?;

    let config = BridgeConfig::load_or_default();
    let app = SmcBridgeApp::new(config);

    let outcome = app.handle_args(args).await;
    app.shutdown().await;
    outcome?;

    Ok(())
}
