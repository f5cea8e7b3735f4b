use std::net::SocketAddr;
use tokio::net::TcpListener;

use dealroom_server::config::{generate_config_template, Config};
use dealroom_server::{authorizer_for, chat, db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dealroom_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }

    tracing::info!("Dealroom chat server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    chat::reaper::spawn_expired_connection_sweep(db.clone(), config.chat.reap_interval_secs);
    tracing::info!(
        "Expired connection sweep scheduled every {}s (ttl {}s)",
        config.chat.reap_interval_secs,
        config.chat.connection_ttl_secs
    );

    let authorizer = authorizer_for(&config.chat);
    let app_state = state::AppState::new(db, authorizer, config.chat.clone());
    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
