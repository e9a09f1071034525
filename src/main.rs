use colabri_code::config::Config;
use colabri_code::routes::create_app;
use colabri_code::store::RoomHub;
use std::panic;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Loaded before tracing, whose default filter reads `log_level`
    let (config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter().into()))
        .init();

    info!("Starting relay ({})...", config.environment);

    if let Some(e) = load_error {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
    }

    let hub = RoomHub::new(config.room_idle());
    let app = create_app(hub.clone());

    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            return;
        }
    };

    info!("🚀 Relay running on http://{}", config.server_address());
    info!("📡 Rooms available at ws://{}/ws/<room_id>", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    let shutdown_hub = hub.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down, {} rooms still open", shutdown_hub.room_count());
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!("Server error: {}", e);
    }
}
