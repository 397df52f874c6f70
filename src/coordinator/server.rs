//! Coordinator server

use crate::cluster::HttpCluster;
use crate::common::{CoordinatorConfig, Error, Result};
use crate::coordinator::balance::ClusterBalanceExecutor;
use crate::coordinator::broker::HttpBroker;
use crate::coordinator::http::create_router;
use crate::coordinator::observer::{
    start_checker_task, start_observer_tasks, BrokerTargetObserver, CollectionObserver,
    NotifyChecker,
};
use crate::coordinator::services::{Collaborators, QueryCoord, Stores};
use std::sync::Arc;
use tokio::sync::watch;

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting query coordinator: {}", self.config.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Broker: {}", self.config.broker_addr);
        tracing::info!("  Job workers: {}", self.config.job_workers);

        let stores = Stores::new(&self.config);

        let broker = Arc::new(HttpBroker::new(self.config.broker_addr.clone())?);
        let cluster = Arc::new(HttpCluster::new(stores.nodes.clone())?);
        let target_observer = Arc::new(BrokerTargetObserver::new(
            stores.meta.clone(),
            stores.targets.clone(),
            stores.dist.clone(),
            broker.clone(),
        ));
        let collection_observer = Arc::new(CollectionObserver::new(
            stores.meta.clone(),
            stores.targets.clone(),
            stores.dist.clone(),
        ));
        let checker = Arc::new(NotifyChecker::new());
        let balancer = Arc::new(ClusterBalanceExecutor::new(cluster.clone(), stores.dist.clone()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let observer_handle = start_observer_tasks(
            target_observer.clone(),
            collection_observer,
            self.config.observer_interval,
            shutdown_rx.clone(),
        );
        let checker_handle = start_checker_task(
            checker.clone(),
            stores.meta.clone(),
            stores.nodes.clone(),
            shutdown_rx,
        );

        let coord = Arc::new(QueryCoord::new(
            self.config.clone(),
            stores,
            Collaborators {
                broker,
                cluster,
                target_observer,
                checker,
                balancer,
            },
        ));
        coord.start();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind {}: {}", self.config.bind_addr, e)))?;
        let http_server = axum::serve(listener, create_router(coord.clone()));

        tracing::info!("✓ Query coordinator ready");

        tokio::select! {
            res = http_server => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
        }

        coord.stop();
        let _ = shutdown_tx.send(true);
        let _ = tokio::join!(observer_handle, checker_handle);
        Ok(())
    }
}
