use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use crate::engine::DriverError;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const OUTBOUND_QUEUE: usize = 64;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// One DevTools websocket connection. Commands are JSON-RPC style messages
/// matched to responses by id; events are ignored. Shared by the browser
/// handle and every tab session.
pub(crate) struct CdpConnection {
    next_id: AtomicU64,
    outbound: mpsc::Sender<Message>,
    pending: Pending,
}

impl CdpConnection {
    pub(crate) async fn connect(ws_url: &str) -> Result<Arc<Self>, DriverError> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|err| DriverError::Protocol(format!("websocket connect: {err}")))?;
        let (mut write, mut read) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let pending: Pending = Arc::default();

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(err) = write.send(msg).await {
                    warn!("devtools send failed: {err}");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(err) => {
                        debug!("unparseable devtools message: {err}");
                        continue;
                    }
                };
                if let Some(id) = value.get("id").and_then(Value::as_u64) {
                    if let Some(waiter) = reader_pending.lock().unwrap().remove(&id) {
                        let _ = waiter.send(value);
                    }
                }
                // Everything without an id is an event; this client drives the
                // page purely through command responses.
            }
            // Connection gone: fail every in-flight call.
            reader_pending.lock().unwrap().clear();
        });

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            outbound,
            pending,
        }))
    }

    /// Issues one command, optionally scoped to a tab session, and waits for
    /// its response.
    pub(crate) async fn call(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let mut msg = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session_id {
            msg["sessionId"] = json!(session);
        }

        if self
            .outbound
            .send(Message::text(msg.to_string()))
            .await
            .is_err()
        {
            self.pending.lock().unwrap().remove(&id);
            return Err(DriverError::Closed);
        }

        let response = match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(DriverError::Closed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                return Err(DriverError::Timeout);
            }
        };

        if let Some(error) = response.get("error") {
            let text = error["message"].as_str().unwrap_or("unknown");
            return Err(DriverError::Protocol(format!("{method}: {text}")));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}
