mod api_client;
mod config;
mod controller;
mod dashboard;
mod fallback;
mod feed;
mod filter;
mod highlight;
mod live;
mod model;
mod networks;
mod pagination;
mod utils;
mod ws_transport;

use anyhow::Result;
use clap::Parser;

use crate::{
    api_client::ApiClient, config::Settings, controller::FeedConfig, fallback::FallbackMode,
    networks::NetworkDirectory, ws_transport::WsTransport,
};

#[derive(Debug, Parser)]
#[command(name = "arbscope", version)]
struct Cli {
    /// Override EXTERNAL_API_BASE_URL
    #[arg(long)]
    api_base_url: Option<String>,
    /// Override LIVE_WS_URL
    #[arg(long)]
    ws_url: Option<String>,
    /// Override DASHBOARD_PORT
    #[arg(long)]
    port: Option<u16>,
    /// Start with the live stream enabled
    #[arg(long)]
    realtime: bool,
    /// Override FETCH_FALLBACK (error|synthetic)
    #[arg(long)]
    fallback: Option<FallbackMode>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(u) = cli.api_base_url {
        settings.api_base_url = u;
    }
    if let Some(u) = cli.ws_url {
        settings.live_ws_url = u;
    }
    if let Some(p) = cli.port {
        settings.dashboard_port = p;
    }
    if cli.realtime {
        settings.realtime_enabled = true;
    }
    if let Some(f) = cli.fallback {
        settings.fetch_fallback = f;
    }
    settings.validate()?;

    log::info!(
        "app.start api={} ws={} realtime={} fallback={:?} page_size={} live_idle_secs={}",
        settings.api_base_url,
        settings.live_ws_url,
        settings.realtime_enabled,
        settings.fetch_fallback,
        settings.default_page_size,
        settings.live_idle_secs
    );

    let api = ApiClient::new(&settings.api_base_url, settings.http_timeout())?;
    let (feed, controller_task) = controller::spawn(
        FeedConfig::from_settings(&settings),
        api,
        WsTransport::new(settings.live_handshake_timeout(), settings.live_idle_timeout()),
        fallback::from_mode(settings.fetch_fallback),
        NetworkDirectory::with_builtin(),
    );

    let url = format!("http://{}:{}/", settings.dashboard_host, settings.dashboard_port);
    let open_browser = settings.dashboard_open_browser;
    let mut server = tokio::spawn(dashboard::serve_dashboard(settings, feed));

    if open_browser {
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(650)).await;
            let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
        });
    }

    let server_exited = tokio::select! {
        res = &mut server => {
            match res {
                Ok(Ok(())) => log::warn!("dashboard.stopped"),
                Ok(Err(e)) => log::error!("dashboard.error {:#}", e),
                Err(e) => log::error!("dashboard.join_error {}", e),
            }
            true
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("app.shutdown signal=ctrl_c");
            false
        }
    };

    // Dropping the server drops the last controller handle, which makes the
    // controller close its live session and return.
    if !server_exited {
        server.abort();
        let _ = server.await;
    }
    if tokio::time::timeout(std::time::Duration::from_secs(2), controller_task).await.is_err() {
        log::warn!("app.shutdown controller did not stop in time");
    }
    Ok(())
}
