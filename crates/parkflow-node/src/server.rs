//! Node runtime: wires the hub, background tasks and HTTP server together.

use parkflow_realtime::{ConnectionHub, HeartbeatMonitor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::{OccupancySimulator, ParkingEvents};
use crate::snapshots::DashboardSnapshots;

/// A configured, not yet running node.
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    state: AppState,
}

impl Node {
    /// Build the hub and its snapshot source from `config`.
    pub fn new(config: NodeConfig) -> Self {
        let snapshots = Arc::new(DashboardSnapshots::new(config.simulator.capacity));
        let hub = Arc::new(ConnectionHub::new(config.hub.clone(), snapshots));
        Self {
            state: AppState::new(hub),
            config,
        }
    }

    /// The hub served by this node.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.state.hub
    }

    /// Publisher for this node's hub.
    pub fn events(&self) -> &ParkingEvents {
        &self.state.events
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, NodeError> {
        let addr = self.config.server.listen_addr;
        TcpListener::bind(addr)
            .await
            .map_err(|source| NodeError::Bind { addr, source })
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// On shutdown every client gets `server_shutdown` and is disconnected,
    /// then in-flight HTTP requests are drained.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), NodeError> {
        let tasks = shutdown.child_token();

        let heartbeat = HeartbeatMonitor::new(self.state.hub.clone())?.spawn(tasks.clone());
        let simulator = self.config.simulator.enabled.then(|| {
            OccupancySimulator::new(self.state.events.clone(), self.config.simulator.clone())
                .spawn(tasks.clone())
        });

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "ParkFlow node listening");
        }

        let app = create_router(self.state.clone(), &self.config.server);
        let hub = self.state.hub.clone();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Shutting down real-time hub");
            hub.shutdown().await;
        })
        .await;

        tasks.cancel();
        let _ = heartbeat.await;
        if let Some(simulator) = simulator {
            let _ = simulator.await;
        }

        result.map_err(NodeError::Serve)
    }
}
