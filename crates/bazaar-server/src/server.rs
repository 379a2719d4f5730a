//! TCP listener: one task per accepted connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::dispatcher::AppState;
use crate::session;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Server {
    listener: TcpListener,
    state: AppState,
    slots: Option<Arc<Semaphore>>,
}

impl Server {
    /// Bind the configured listen address.
    pub async fn bind(state: AppState) -> io::Result<Self> {
        let listener = TcpListener::bind(state.config.listen_addr).await?;
        let slots = match state.config.max_connections {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Ok(Self {
            listener,
            state,
            slots,
        })
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Accept connections until the task is cancelled.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Marketplace server listening");

        loop {
            // With a connection cap, wait for a free slot before accepting;
            // excess clients queue in the listen backlog.
            let permit = match &self.slots {
                Some(slots) => match Arc::clone(slots).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return Ok(()),
                },
                None => None,
            };

            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Could not disable Nagle");
            }

            debug!(peer = %peer, "Accepted connection");
            let state = self.state.clone();
            tokio::spawn(async move {
                session::serve_connection(state, stream, peer).await;
                drop(permit);
            });
        }
    }
}
