// channel_signal/src/connector.rs
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message as WsMsg,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::error::RelayError;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens one streaming session against the event source.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &Url,
        auth_token: Option<&str>,
    ) -> Result<Box<dyn FrameStream>, RelayError>;
}

/// A live session. Owned by exactly one relay run loop.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text payload, or `None` once the remote side closed.
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>>;

    /// Close the session from our side.
    async fn close(&mut self);
}

/// Plain WebSocket client for the `/v1/receive/<account>` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        WsConnector {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl WsConnector {
    pub fn with_handshake_timeout(handshake_timeout: Duration) -> Self {
        WsConnector { handshake_timeout }
    }
}

#[async_trait]
impl StreamConnector for WsConnector {
    async fn connect(
        &self,
        url: &Url,
        auth_token: Option<&str>,
    ) -> Result<Box<dyn FrameStream>, RelayError> {
        let mut request = url.as_str().into_client_request()?;
        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RelayError::Config(format!("auth token is not a valid header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) =
            tokio::time::timeout(self.handshake_timeout, connect_async(request))
                .await
                .map_err(|_| {
                    RelayError::Connection(format!(
                        "handshake timed out after {} ms",
                        self.handshake_timeout.as_millis()
                    ))
                })??;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsFrameStream { inner: stream }))
    }
}

struct WsFrameStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            match self.inner.next().await? {
                Ok(WsMsg::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(WsMsg::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!(len = bytes.len(), "skipping non utf-8 binary frame");
                    }
                },
                Ok(WsMsg::Close(frame)) => {
                    debug!(?frame, "remote closed the stream");
                    return None;
                }
                // pongs are queued by tungstenite and flushed on the next read
                Ok(WsMsg::Ping(_)) | Ok(WsMsg::Pong(_)) | Ok(WsMsg::Frame(_)) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.inner.close(None).await {
            debug!(error = %err, "close handshake did not complete");
        }
    }
}
