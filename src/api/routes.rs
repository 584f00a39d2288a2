use std::sync::Arc;
use warp::Filter;

use super::websocket;
use crate::config::Config;
use crate::signaling::RelayServer;

/// Creates the signaling WebSocket route backed by a shared relay server.
pub fn signaling_route(
    relay: Arc<RelayServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("signal")
        .and(warp::ws())
        .and(with_relay(relay))
        .map(|ws: warp::ws::Ws, relay: Arc<RelayServer>| {
            ws.on_upgrade(move |websocket| websocket::handle_signaling_socket(websocket, relay))
        })
}

/// All server routes: signaling WebSocket plus health and config endpoints.
pub fn routes(
    config: &Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let relay = Arc::new(RelayServer::new(config.chat.max_message_len));
    signaling_route(relay)
        .or(health_check())
        .or(config_endpoint())
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("signal")
        .and(warp::path("health"))
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Signaling Server",
                "version": "1.0.0"
            }))
        })
}

/// Client bootstrap configuration: where to reach the signaling endpoint
/// and which STUN server to use for candidate gathering.
pub fn config_endpoint() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
{
    warp::path("signal")
        .and(warp::path("config"))
        .and(warp::get())
        .map(|| {
            use std::env;

            let config = serde_json::json!({
                "SIGNALING_WEBSOCKET_URL": env::var("SIGNALING_WEBSOCKET_URL").ok(),
                "STUN_SERVER_URL": env::var("STUN_SERVER_URL").ok(),
                "BOOKING_SERVICE_URL": env::var("BOOKING_SERVICE_URL").ok(),
            });

            warp::reply::json(&config)
        })
}

fn with_relay(
    relay: Arc<RelayServer>,
) -> impl Filter<Extract = (Arc<RelayServer>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || relay.clone())
}
