use signal_server::api::routes;
use signal_server::config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let (host, port) = config.bind_address();

    tracing::info!(host = ?host, port = port, "Starting signaling server");

    warp::serve(routes::routes(&config)).run((host, port)).await;
}
