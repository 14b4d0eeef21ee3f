//! HTTP gateway for slopestream
//!
//! Write path: validate the URL and body, then publish the event to the
//! broker's write queue and answer 201 accepted-for-async-processing.
//! Read paths: translate the URL into a typed query request, round-trip
//! it through the query correlation protocol and shape the reply. A query
//! deadline expiring surfaces as 504; internal detail never crosses the
//! boundary.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use slopestream_broker::{ChannelPool, RpcClient};
use slopestream_types::Result;

/// Shared gateway state
pub struct AppState {
    /// Pool used by the write path to publish ride events
    pub publish_pool: ChannelPool,
    /// Query correlation client for the read paths
    pub rpc: RpcClient,
    /// Queue carrying serialized ride events
    pub write_queue: String,
}

impl AppState {
    pub fn new(publish_pool: ChannelPool, rpc: RpcClient, write_queue: impl Into<String>) -> Self {
        Self {
            publish_pool,
            rpc,
            write_queue: write_queue.into(),
        }
    }
}

/// Build the gateway router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/skiers/:resortID/seasons/:seasonID/days/:dayID/skiers/:skierID",
            post(routes::post_ride).get(routes::get_day_vertical),
        )
        .route("/skiers/:skierID/vertical", get(routes::get_resort_vertical))
        .route(
            "/resorts/:resortID/seasons/:seasonID/day/:dayID/skiers",
            get(routes::get_unique_skiers),
        )
        .fallback(routes::invalid_url)
        .with_state(state)
}

/// Bind and serve until the listener fails
pub async fn serve(router: Router, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router).await?;
    Ok(())
}
