//! Read side of one WebSocket connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::metrics::WS_FRAMES_IGNORED_TOTAL;
use crate::websocket::manager::ConnectionManager;

/// Drive one upgraded socket until either side closes it.
///
/// The write half goes to the manager's delivery loop; this task reads
/// client frames and feeds them to [`ConnectionManager::handle_inbound`].
#[instrument(skip_all, fields(session_id))]
pub async fn run_ws_session(socket: WebSocket, manager: Arc<ConnectionManager>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let session = match manager.accept(ws_tx).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "websocket session rejected");
            return;
        }
    };
    let id = session.id().clone();
    let _ = tracing::Span::current().record("session_id", id.as_str());

    loop {
        tokio::select! {
            () = session.closed() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = manager.handle_inbound(&id, text.as_str());
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        let _ = manager.handle_inbound(&id, text);
                    }
                    Err(_) => {
                        session.mark_alive();
                        counter!(WS_FRAMES_IGNORED_TOTAL).increment(1);
                        debug!("ignoring non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => session.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break;
                }
            }
        }
    }

    let _ = manager.disconnect(&id);
}
