use crate::application::RealtimeHub;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

pub const SOCKET_PATH: &str = "/socket";

/// Mount the realtime channel on the router that the HTTP listener serves,
/// so both share one port.
pub fn attach_realtime_channel(router: Router, hub: RealtimeHub) -> Router {
    router.route(SOCKET_PATH, get(socket_handler).with_state(hub))
}

async fn socket_handler(ws: WebSocketUpgrade, State(hub): State<RealtimeHub>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, hub))
}

async fn run_session(mut socket: WebSocket, hub: RealtimeHub) {
    let mut session = hub.connect();
    info!(clients = hub.connected_clients(), "Realtime client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Realtime socket read failed");
                    break;
                }
            },
            event = session.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode realtime event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Realtime client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    drop(session);
    info!(clients = hub.connected_clients(), "Realtime client disconnected");
}
