use patter::config::Config;
use patter::{AppState, app, db};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_filter.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_pool = db::connect(&cfg.database_url).await?;
    info!(database_url = %cfg.database_url, "message log ready");

    let bind = cfg.bind_address.clone();
    let state = AppState::new(db_pool, cfg);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "patter listening");
    axum::serve(listener, app(state)).await?;

    Ok(())
}
