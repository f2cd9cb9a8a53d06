//! hive-daemon: the HiveMind broker service.
//!
//! Single OS process on a Tokio runtime. Loads the configuration, opens the
//! client record store selected by `database.module`, builds the listener,
//! and runs the agent-bus worker until shutdown. The network transport is
//! an external collaborator: when `network_protocol.module` is set it is
//! resolved against the transport registry populated by the embedding
//! integration; when empty the daemon runs headless and an embedder drives
//! [`hive_listener::HiveMindListener`] directly.

mod config;
mod identity;

use std::sync::Arc;

use tracing::{error, info};

use hive_listener::binary::DefaultBinaryHandler;
use hive_listener::registry::store_registry;
use hive_listener::HiveMindListener;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hive=info".parse()?),
        )
        .init();

    info!("HiveMind daemon starting");

    // 1. Configuration; any resolution failure is a config error (exit != 0)
    let config = ServerConfig::load()?;
    let data_dir = ServerConfig::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Node identity
    let identity = identity::load_or_create(&data_dir)?;
    info!(name = %identity.name, site_id = %identity.site_id, "node identity loaded");

    // 3. Client record store
    let registry = store_registry();
    let store = registry
        .create(&config.database.module, &config.database_options())
        .map_err(|e| anyhow::anyhow!("database config error: {e}"))?;
    info!(module = %config.database.module, "client store ready");

    // 4. Listener
    let listener = Arc::new(HiveMindListener::new(
        config.listener_config()?,
        identity,
        store,
        Arc::new(DefaultBinaryHandler),
    )?);

    // 5. Agent-bus worker
    let agent_worker = listener.spawn_agent_worker();

    // 6. Transport
    let network = &config.network_protocol;
    if network.module.is_empty() {
        info!("no network protocol configured, running headless");
    } else {
        // transports register themselves when embedding the daemon; an
        // unknown module at this point is a configuration error
        error!(module = %network.module, "network protocol module is not registered");
        anyhow::bail!("network config error: unknown module {:?}", network.module);
    }
    info!(
        host = %network.host,
        port = network.port,
        ssl = network.ssl,
        "listener ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    agent_worker.abort();
    info!("daemon stopped");
    Ok(())
}
