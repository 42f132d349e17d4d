//! Process entry point: parses configuration, wires the registry
//! components together, starts the background tasks and serves HTTP.

mod config;
mod http;
mod middleware;
mod state;

use actix_web::{App, HttpServer, middleware::Logger, web};
use clap::Parser;
use tracing::info;

use crate::{config::ServerConfig, middleware::SharedSecretAuth, state::AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    let _logging_guard = beacon_common::logging::init(&config.logging_config())?;

    if config.storage_type != "memory" {
        tracing::warn!(storage_type = %config.storage_type, "only in-memory storage is implemented, ignoring requested backend");
    }

    let state = web::Data::new(AppState::new(&config));
    if config.cluster_enabled {
        for peer in &config.cluster_nodes {
            if let Some((host, port)) = peer.rsplit_once(':')
                && let Ok(port) = port.parse::<u16>()
            {
                state.cluster_manager.add_node(beacon_cluster::ClusterNode::new(host.to_string(), port));
            } else {
                tracing::warn!(peer, "ignoring malformed cluster peer address");
            }
        }
    }

    state.heartbeat_monitor.start();
    if config.health_check_enabled {
        state.health_checker.start(config.health_check_default_interval());
    }
    if config.cluster_enabled {
        state.cluster_sync.start(config.cluster_probe_interval());
        state.cluster_manager.start(config.cluster_probe_interval());
    }

    info!(node_id = %state.node_id, port = config.port, "starting beacon-registry");

    let bind_address = config.bind_address.clone();
    let port = config.port;
    let http_state = state.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(http_state.clone())
            .wrap(Logger::default())
            .wrap(SharedSecretAuth)
            .configure(http::configure)
    })
    .bind((bind_address.as_str(), port))?
    .run();

    let server_handle = server.handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        server_handle.stop(true).await;
    });

    server.await?;
    state.shutdown().await;
    Ok(())
}
