//! Turns the pub/sub WebSocket push feed into pull-based batches.

use crate::error::{Error, Result};
use crate::wire::{Frame, FrameEvent};

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use synap_reactive::RawMessage;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
struct Inbox {
    messages: VecDeque<RawMessage>,
    capacity: usize,
    closed: Option<String>,
}

impl Inbox {
    fn push(&mut self, message: RawMessage) {
        if self.messages.len() >= self.capacity {
            self.messages.pop_front();
            debug!("topic bridge full, dropped oldest message");
        }
        self.messages.push_back(message);
    }
}

/// One WebSocket subscription, buffering pushed messages until they are
/// drained. The connection is closed when the bridge is closed or dropped.
#[derive(Debug)]
pub(crate) struct TopicBridge {
    inbox: Arc<Mutex<Inbox>>,
    cancel: CancellationToken,
}

impl TopicBridge {
    pub(crate) async fn connect(url: &Url, auth_token: Option<&str>, capacity: usize) -> Result<Self> {
        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|error| Error::Config(format!("invalid auth token: {error}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        debug!(%url, "connecting topic bridge");
        let (socket, _) = connect_async(request).await?;

        let inbox = Arc::new(Mutex::new(Inbox {
            messages: VecDeque::new(),
            capacity,
            closed: None,
        }));
        let cancel = CancellationToken::new();

        tokio::spawn(pump(socket, Arc::clone(&inbox), cancel.clone()).in_current_span());

        Ok(Self { inbox, cancel })
    }

    /// Takes up to `limit` buffered messages. Fails once the connection is
    /// gone and everything it delivered was drained.
    pub(crate) fn drain(&self, limit: usize) -> Result<Vec<RawMessage>> {
        let mut inbox = self.inbox.lock();

        if inbox.messages.is_empty() {
            if let Some(reason) = &inbox.closed {
                return Err(Error::BridgeClosed(reason.clone()));
            }
        }

        let take = limit.min(inbox.messages.len());
        Ok(inbox.messages.drain(..take).collect())
    }

    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TopicBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump(mut socket: Socket, inbox: Arc<Mutex<Inbox>>, cancel: CancellationToken) {
    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if let Err(error) = socket.close(None).await {
                    debug!(%error, "closing topic bridge");
                }
                break "bridge released".to_string();
            }

            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                    Ok(FrameEvent::Message(message)) => inbox.lock().push(message),
                    Ok(FrameEvent::Error(error)) => warn!(%error, "pub/sub error frame"),
                    Ok(FrameEvent::Ignored) => {}
                    Err(error) => warn!(%error, "unparseable pub/sub frame"),
                },
                Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                Some(Ok(_)) => {}
                Some(Err(error)) => break error.to_string(),
            },
        }
    };

    debug!(%reason, "topic bridge stopped");
    inbox.lock().closed = Some(reason);
}
