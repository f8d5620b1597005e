//! WebSocket transport implementation.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tether_core::logging::targets;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as TungsteniteCloseCode;

use crate::connection::TransportOptions;
use crate::error::{ConfigurationError, Result, TransportError};
use crate::message::{CloseCode, CloseEvent};
use crate::transport::{OpenRequest, Transport, TransportEvents, TransportHandle};

/// Commands sent from a handle to its connection task.
#[derive(Debug)]
enum Command {
    Send(String),
    Close {
        code: Option<CloseCode>,
        reason: Option<String>,
    },
}

/// How the read/write loop ended.
enum Ending {
    /// We sent a close frame and still expect the peer's reply.
    Local(CloseEvent),
    /// The peer closed or the connection dropped.
    Remote(CloseEvent),
}

/// Transport speaking WebSocket (`ws://` and `wss://`) via tokio-tungstenite.
///
/// Each open spawns one task on the current tokio runtime that owns the
/// socket; the returned handle talks to it over a channel. Text frames are
/// delivered as messages, binary frames too if they hold valid UTF-8.
///
/// Handshake headers and subprotocols come from [`TransportOptions`].
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }

    /// Build the handshake request for an address.
    fn build_request(address: &str, options: &TransportOptions) -> Result<Request> {
        let url = url::Url::parse(address)
            .map_err(|e| ConfigurationError::invalid_address(address, e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigurationError::invalid_address(
                address,
                format!("unsupported scheme '{}', expected ws or wss", url.scheme()),
            )
            .into());
        }

        let mut request = address
            .into_client_request()
            .map_err(|e| ConfigurationError::invalid_address(address, e.to_string()))?;

        let invalid_header = |e: &dyn std::error::Error| {
            ConfigurationError::invalid_option("transport.headers", e.to_string())
        };

        // Add custom headers
        let headers = request.headers_mut();
        for (name, value) in &options.headers {
            let header_name = http::header::HeaderName::try_from(name.as_str())
                .map_err(|e| invalid_header(&e))?;
            let header_value = http::header::HeaderValue::try_from(value.as_str())
                .map_err(|e| invalid_header(&e))?;
            headers.insert(header_name, header_value);
        }

        if !options.protocols.is_empty() {
            let protocols = http::header::HeaderValue::try_from(options.protocols.join(", "))
                .map_err(|e| {
                    ConfigurationError::invalid_option("transport.protocols", e.to_string())
                })?;
            headers.insert(http::header::SEC_WEBSOCKET_PROTOCOL, protocols);
        }

        Ok(request)
    }
}

impl Transport for WebSocketTransport {
    fn open(
        &self,
        request: OpenRequest<'_>,
        events: TransportEvents,
    ) -> Result<Arc<dyn TransportHandle>> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ConfigurationError::NoRuntime)?;
        let handshake = Self::build_request(request.address, request.options)?;

        let (commands, receiver) = mpsc::unbounded_channel();
        tracing::debug!(
            target: targets::WEBSOCKET,
            address = request.address,
            handle = ?events.handle_id(),
            "spawning connection task"
        );
        runtime.spawn(run_connection(
            handshake,
            request.send_timeout,
            receiver,
            events,
        ));

        Ok(Arc::new(WebSocketHandle { commands }))
    }
}

/// Handle to one WebSocket connection task.
#[derive(Debug)]
pub struct WebSocketHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl TransportHandle for WebSocketHandle {
    fn send(&self, payload: String) -> std::result::Result<(), TransportError> {
        self.commands
            .send(Command::Send(payload))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self, code: Option<CloseCode>, reason: Option<String>) {
        // The task may already be gone; nothing left to close then.
        let _ = self.commands.send(Command::Close { code, reason });
    }
}

async fn run_connection(
    request: Request,
    send_timeout: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: TransportEvents,
) {
    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(target: targets::WEBSOCKET, error = %e, "handshake failed");
            events.error(TransportError::Connect(e.to_string()));
            events.closed(CloseEvent::abnormal());
            return;
        }
    };

    events.opened();
    let (mut write, mut read) = stream.split();

    let ending = loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Send(text)) => {
                        match tokio::time::timeout(send_timeout, write.send(Message::Text(text.into()))).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                events.error(TransportError::Protocol(e.to_string()));
                                break Ending::Remote(CloseEvent::abnormal());
                            }
                            Err(_) => {
                                events.error(TransportError::SendTimeout(send_timeout));
                                break Ending::Remote(CloseEvent::abnormal());
                            }
                        }
                    }
                    Some(Command::Close { code, reason }) => {
                        break send_close(&mut write, code, reason, send_timeout).await;
                    }
                    None => {
                        break send_close(&mut write, None, None, send_timeout).await;
                    }
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        events.message(text.to_string());
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => events.message(text),
                        Err(_) => events.error(TransportError::Decode(
                            "binary frame is not valid UTF-8".into(),
                        )),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break Ending::Remote(peer_close(frame));
                    }
                    Some(Ok(_)) => {
                        // Ping and pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        events.error(TransportError::Protocol(e.to_string()));
                        break Ending::Remote(CloseEvent::abnormal());
                    }
                    None => break Ending::Remote(CloseEvent::abnormal()),
                }
            }
        }
    };

    let close = match ending {
        Ending::Local(close) => {
            // Wait for the peer to acknowledge our close frame.
            let acknowledged = tokio::time::timeout(send_timeout, async {
                while let Some(frame) = read.next().await {
                    match frame {
                        Ok(Message::Close(_)) => return true,
                        Ok(_) => {}
                        Err(_) => return false,
                    }
                }
                false
            })
            .await
            .unwrap_or(false);
            CloseEvent {
                was_clean: acknowledged,
                ..close
            }
        }
        Ending::Remote(close) => close,
    };

    // Flushes the close reply tungstenite queued for the peer.
    let _ = write.close().await;

    tracing::debug!(
        target: targets::WEBSOCKET,
        code = %close.code,
        was_clean = close.was_clean,
        "connection task finished"
    );
    events.closed(close);
}

async fn send_close<S>(
    write: &mut S,
    code: Option<CloseCode>,
    reason: Option<String>,
    send_timeout: Duration,
) -> Ending
where
    S: futures_util::Sink<Message> + Unpin,
{
    let reason = reason.unwrap_or_default();
    let frame = code.map(|code| CloseFrame {
        code: TungsteniteCloseCode::from(code.as_u16()),
        reason: reason.clone().into(),
    });

    match tokio::time::timeout(send_timeout, write.send(Message::Close(frame))).await {
        Ok(Ok(())) => Ending::Local(CloseEvent::new(
            code.unwrap_or(CloseCode::NoStatus),
            reason,
            true,
        )),
        _ => Ending::Remote(CloseEvent::abnormal()),
    }
}

fn peer_close(frame: Option<CloseFrame>) -> CloseEvent {
    match frame {
        Some(frame) => CloseEvent::new(u16::from(frame.code), frame.reason.as_str(), true),
        None => CloseEvent::new(CloseCode::NoStatus, "", true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_applies_headers_and_protocols() {
        let options = TransportOptions {
            headers: [("Authorization".to_owned(), "Bearer token".to_owned())].into(),
            protocols: vec!["chat".into(), "superchat".into()],
            ..TransportOptions::default()
        };

        let request = WebSocketTransport::build_request("ws://localhost:9000/socket", &options)
            .unwrap();

        assert_eq!(request.headers()["authorization"], "Bearer token");
        assert_eq!(
            request.headers()[http::header::SEC_WEBSOCKET_PROTOCOL],
            "chat, superchat"
        );
    }

    #[test]
    fn test_build_request_rejects_other_schemes() {
        let err = WebSocketTransport::build_request("http://localhost", &TransportOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.as_configuration(),
            Some(ConfigurationError::InvalidAddress { .. })
        ));

        let err = WebSocketTransport::build_request("not a url", &TransportOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.as_configuration(),
            Some(ConfigurationError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_build_request_rejects_bad_header() {
        let options = TransportOptions {
            headers: [("bad header".to_owned(), "x".to_owned())].into(),
            ..TransportOptions::default()
        };
        let err = WebSocketTransport::build_request("ws://localhost", &options).unwrap_err();
        assert!(matches!(
            err.as_configuration(),
            Some(ConfigurationError::InvalidOption { option: "transport.headers", .. })
        ));
    }

    #[test]
    fn test_open_without_runtime() {
        struct Discard;
        impl crate::transport::TransportEventSink for Discard {
            fn handle_transport_event(
                &self,
                _handle: crate::transport::HandleId,
                _event: crate::transport::TransportEvent,
            ) {
            }
        }

        let sink: Arc<dyn crate::transport::TransportEventSink> = Arc::new(Discard);
        let events = TransportEvents::new(Arc::downgrade(&sink), Default::default());
        let options = TransportOptions::default();
        let request = OpenRequest {
            address: "ws://localhost",
            options: &options,
            send_timeout: Duration::from_secs(1),
        };

        let err = WebSocketTransport::new().open(request, events).err().unwrap();
        assert!(matches!(
            err.as_configuration(),
            Some(ConfigurationError::NoRuntime)
        ));
    }

    #[test]
    fn test_peer_close_mapping() {
        let close = peer_close(Some(CloseFrame {
            code: TungsteniteCloseCode::Normal,
            reason: "bye".into(),
        }));
        assert_eq!(close, CloseEvent::new(CloseCode::Normal, "bye", true));

        let close = peer_close(None);
        assert_eq!(close.code, CloseCode::NoStatus);
    }
}
