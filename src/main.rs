use mimalloc::MiMalloc;
use nullscan::config::ClientConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so the session transcript on stdout stays readable.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "nullscan=info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration (NULLSCAN_API_URL): {e}"))?;

    tracing::info!(
        api_url = %config.api_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting nullscan client"
    );

    nullscan::cli::run(config).await
}
