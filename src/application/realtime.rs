use crate::domain::RealtimeEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out point between background services and realtime clients.
#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeEvent>,
    clients: Arc<AtomicUsize>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish to every connected client. Returns how many received it;
    /// zero when nobody is listening, which is not an error.
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                debug!("Realtime event dropped: no connected clients");
                0
            }
        }
    }

    pub fn connect(&self) -> ClientSession {
        self.clients.fetch_add(1, Ordering::SeqCst);
        ClientSession {
            rx: self.tx.subscribe(),
            clients: self.clients.clone(),
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One connected client. Leaves the client count when dropped.
pub struct ClientSession {
    rx: broadcast::Receiver<RealtimeEvent>,
    clients: Arc<AtomicUsize>,
}

impl ClientSession {
    pub async fn recv(&mut self) -> Result<RealtimeEvent, broadcast::error::RecvError> {
        self.rx.recv().await
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::SeqCst);
    }
}
