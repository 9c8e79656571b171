use anyhow::Context;
use docrag::{Services, Settings};
use docrag_server::server::{ServerConfig, run_server};
use tracing_subscriber::EnvFilter;

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let defaults = ServerConfig::default();
    let host = env("DOCRAG_HOST").unwrap_or(defaults.host);
    let port = match env("DOCRAG_PORT") {
        Some(raw) => raw.parse().with_context(|| format!("invalid DOCRAG_PORT '{raw}'"))?,
        None => defaults.port,
    };

    let settings = Settings::from_env().context("invalid settings")?;
    let services =
        Services::init(settings).await.context("failed to initialise retrieval services")?;
    run_server(ServerConfig { host, port }, services).await
}
