use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tracing::info;

use crate::lib::{
    api::server::TaskServer,
    cluster::{
        local::LocalDockerCluster,
        types::{ClusterEvent, ClusterInterface, EventKind},
    },
    config::Config,
    manager::{
        coordinator::SubmissionCoordinator, registry::TaskRegistry,
        state_machine::TaskStateMachine,
    },
    registry::{
        durable::DurableRegistry, etcd::EtcdStore, memory::MemoryStore, store::KeyValueStore,
    },
};

mod lib {
    pub mod api;
    pub mod cluster;
    pub mod config;
    pub mod manager;
    pub mod registry;
    pub mod tasks;
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.log_filter())?;

    let cluster = LocalDockerCluster::new(config.clone()).context("Failed to connect to docker")?;

    // Subscribe before registering so the confirmation cannot be missed.
    let mut registered = cluster.events(EventKind::Registered);
    cluster
        .register_framework()
        .await
        .context("Failed to register framework")?;

    match tokio::time::timeout(config.registration_timeout(), registered.recv()).await {
        Ok(Ok(ClusterEvent::Registered { framework_id })) => {
            info!(framework_id = %framework_id, "Registration successful.");
        }
        Ok(Ok(event)) => bail!("Unexpected event while registering: {:?}", event),
        Ok(Err(e)) => return Err(e).context("Event feed failed during registration"),
        Err(_) => bail!(
            "Registration timed out after {:?}; --ip must route to this host from the cluster manager",
            config.registration_timeout()
        ),
    }

    cluster.start_monitor();

    let store: Arc<dyn KeyValueStore> = if config.etcd.is_empty() {
        info!("No etcd endpoints configured, keeping state in memory");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(EtcdStore::new(config.etcd.clone()).context("Invalid etcd configuration")?)
    };

    let durable = Arc::new(
        DurableRegistry::new(store, cluster.clone(), &config.store_root)
            .await
            .context("Failed to initialise durable registry")?,
    );
    durable.spawn_reconciliation(config.reconcile_interval(), config.node_ttl());

    let registry = Arc::new(TaskRegistry::new(cluster.clone()).with_durable(durable));
    tokio::spawn(TaskStateMachine::new(registry.clone()).run(cluster.events(EventKind::Update)));

    let coordinator = SubmissionCoordinator::new(registry.clone(), cluster.clone());
    let server = TaskServer::new(registry, coordinator, cluster.clone());
    let addr = SocketAddr::new(config.ip, config.port);

    tokio::select! {
        result = server.start_server(addr) => {
            result.context("API server failed")?;
        }
        _ = shutdown_signal() => {
            info!("Unregistering framework");
            cluster
                .unregister_framework()
                .await
                .context("Failed to unregister framework")?;
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
