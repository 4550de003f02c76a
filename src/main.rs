use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use webdesk::config::KernelConfig;
use webdesk::kernel::{panic_reporter, Kernel};

#[derive(Parser)]
#[command(name = "webdesk", about = "Desktop kernel: processes, windows, and files over a service backend.")]
struct Cli {
    /// Config file (defaults to ~/.webdesk/config.yaml then .webdesk/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL, overriding config and WEBDESK_API_URL
    #[arg(long)]
    api_url: Option<String>,

    /// Log in as this user after boot
    #[arg(short, long)]
    user: Option<String>,

    /// Password for --user
    #[arg(long, env = "WEBDESK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Launch an app once the desktop is up (repeatable)
    #[arg(short, long = "launch", value_name = "APP")]
    launch: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("webdesk=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => KernelConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KernelConfig::load(),
    };
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }

    let kernel = Arc::new(Kernel::builder(config).build()?);
    std::panic::set_hook(panic_reporter(kernel.error_sink()));
    kernel.boot().await.context("boot failed")?;

    if let Some(user) = &cli.user {
        let password = cli.password.as_deref().unwrap_or_default();
        match kernel.login(user, password).await {
            Ok(user) => info!(user = %user.username, "logged in"),
            Err(e) => kernel.report_error("login", &e.to_string()).await,
        }
    }

    for app in &cli.launch {
        if let Err(e) = kernel.launch(app, json!({})).await {
            // The process manager has already notified the desktop.
            warn!(app, error = %e, "launch failed");
        }
    }

    info!(surface = %kernel.surface(), "desktop up; Ctrl-C to quit");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    kernel.shutdown("interrupted");
    Ok(())
}
