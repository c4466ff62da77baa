//! TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection;
use crate::hub::Hub;

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    fn build_hub(&self) -> Arc<Hub> {
        tracing::info!(history_size = self.config.history_size, "Creating hub");
        Arc::new(Hub::new(self.config.history_size))
    }

    /// Run the server until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        tracing::info!("Listening on {}", self.config.listen_addr);
        let hub = self.build_hub();

        tokio::select! {
            res = accept_loop(listener, hub, self.config.max_line_len) => res,
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl-C")?;
                tracing::info!("Server stopped by interrupt");
                Ok(())
            }
        }
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let (addr, _hub, handle) = self.start_with_hub().await?;
        Ok((addr, handle))
    }

    /// Like [`Server::start`], also returning the hub so tests can inspect it.
    pub async fn start_with_hub(self) -> Result<(SocketAddr, Arc<Hub>, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let hub = self.build_hub();
        let handle = tokio::spawn(accept_loop(listener, Arc::clone(&hub), self.config.max_line_len));
        Ok((addr, hub, handle))
    }
}

async fn accept_loop(listener: TcpListener, hub: Arc<Hub>, max_line_len: usize) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await.context("accept failed")?;
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            if let Err(e) = connection::handle(stream, hub, max_line_len).await {
                tracing::error!("Connection error: {e:#}");
            }
        });
    }
}
