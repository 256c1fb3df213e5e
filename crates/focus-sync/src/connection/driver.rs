//! Background task owning the socket.

use std::sync::Arc;

use focus_core::errors::{Result, SyncError};
use focus_core::protocol::{InboundFrame, PING, PONG, parse_inbound};
use focus_core::retry::Backoff;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, instrument, trace, warn};

use super::heartbeat::{Heartbeat, HeartbeatStatus};
use super::state::ConnectionState;
use super::{ConnectionConfig, Shared};
use crate::bus::{BusEvent, SyncNotice};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Why a connected session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// What the session loop should do after an inbound message.
enum Inbound {
    Continue,
    ReplyPong,
    Closed,
}

/// Connect, run the session, and reconnect with backoff until shut down,
/// rejected, or out of attempts.
#[instrument(skip_all, fields(url = %url))]
pub(super) async fn run(shared: Arc<Shared>, url: String) {
    let mut backoff = Backoff::new(shared.config.backoff.clone());

    loop {
        let attempt = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            result = open_socket(&shared.config, &url) => result,
        };

        match attempt {
            Ok(ws) => {
                backoff.reset();
                shared.transition(ConnectionState::Connected);
                info!("connected");
                match run_session(&shared, ws).await {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost(reason) => info!(reason = %reason, "connection lost"),
                }
            }
            Err(SyncError::FatalAuth { status }) => {
                error!(status, "handshake rejected, not retrying");
                shared.transition(ConnectionState::Disconnected);
                let _ = shared
                    .bus
                    .publish(&BusEvent::Notice(SyncNotice::AuthFailed { status }));
                return;
            }
            Err(e) => warn!(error = %e, attempt = backoff.attempts(), "connect failed"),
        }

        shared.transition(ConnectionState::Reconnecting);
        let Some(delay) = backoff.next_delay(rand::random::<f64>()) else {
            let attempts = backoff.attempts();
            error!(attempts, "reconnect attempts exhausted");
            shared.transition(ConnectionState::Disconnected);
            let _ = shared
                .bus
                .publish(&BusEvent::Notice(SyncNotice::ConnectionLost { attempts }));
            return;
        };
        debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = backoff.attempts(),
            "waiting before reconnect"
        );

        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        shared.transition(ConnectionState::Connecting);
    }

    shared.transition(ConnectionState::Disconnected);
}

/// Perform the upgrade handshake, classifying auth rejections.
async fn open_socket(config: &ConnectionConfig, url: &str) -> Result<WsStream> {
    let mut request = url.into_client_request().map_err(|e| SyncError::Connection {
        message: format!("invalid socket url: {e}"),
    })?;
    if let Some(token) = &config.auth_token {
        let value =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| SyncError::Connection {
                message: format!("invalid auth token: {e}"),
            })?;
        let _ = request.headers_mut().insert(AUTHORIZATION, value);
    }

    match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
        Err(_) => Err(SyncError::Connection {
            message: format!("handshake timed out after {:?}", config.connect_timeout),
        }),
        Ok(Err(WsError::Http(response))) => {
            let status = response.status().as_u16();
            if SyncError::is_auth_status(status) {
                Err(SyncError::FatalAuth { status })
            } else {
                Err(SyncError::Connection {
                    message: format!("handshake rejected with status {status}"),
                })
            }
        }
        Ok(Err(e)) => Err(SyncError::Connection {
            message: e.to_string(),
        }),
        Ok(Ok((stream, _response))) => Ok(stream),
    }
}

/// Pump one open socket until it dies or we are told to stop.
async fn run_session(shared: &Shared, ws: WsStream) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat =
        Heartbeat::new(shared.config.heartbeat_interval, shared.config.pong_timeout);
    let mut ping_timer = tokio::time::interval(heartbeat.interval());
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately.
    let _ = ping_timer.tick().await;

    loop {
        if let Err(reason) = flush_queue(shared, &mut sink).await {
            return SessionEnd::Lost(reason);
        }

        let pong_deadline = heartbeat.deadline();
        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            msg = stream.next() => match msg {
                Some(Ok(message)) => match handle_message(shared, message, &mut heartbeat) {
                    Inbound::Continue => {}
                    Inbound::ReplyPong => {
                        if let Err(e) = send_control(&mut sink, PONG).await {
                            return SessionEnd::Lost(e);
                        }
                    }
                    Inbound::Closed => return SessionEnd::Lost("closed by server".into()),
                },
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("stream ended".into()),
            },
            () = shared.queue.notified() => {}
            _ = ping_timer.tick() => {
                if let Err(e) = send_control(&mut sink, PING).await {
                    return SessionEnd::Lost(e);
                }
                heartbeat.ping_sent(Instant::now());
                trace!("ping sent");
            }
            () = sleep_until(pong_deadline) => {
                if heartbeat.check(Instant::now()) == HeartbeatStatus::TimedOut {
                    let timeout_ms =
                        u64::try_from(shared.config.pong_timeout.as_millis()).unwrap_or(u64::MAX);
                    warn!(timeout_ms, "no pong within timeout");
                    return SessionEnd::Lost("heartbeat timeout".into());
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write every queued frame; a failed frame goes back to the head.
async fn flush_queue(shared: &Shared, sink: &mut WsSink) -> std::result::Result<(), String> {
    while let Some(frame) = shared.queue.pop() {
        if let Err(e) = sink.send(Message::Text(frame.clone().into())).await {
            shared.queue.requeue_front(frame);
            return Err(e.to_string());
        }
        trace!("frame written");
    }
    Ok(())
}

async fn send_control(sink: &mut WsSink, event: &str) -> std::result::Result<(), String> {
    let text = serde_json::json!({ "event": event, "payload": {} }).to_string();
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Classify one inbound message; server events go onto the bus.
fn handle_message(shared: &Shared, message: Message, heartbeat: &mut Heartbeat) -> Inbound {
    let text = match message {
        Message::Text(text) => text.to_string(),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => text.to_owned(),
            Err(_) => {
                let message = format!("non-UTF-8 binary frame ({} bytes)", data.len());
                report_protocol_error(shared, &message);
                return Inbound::Continue;
            }
        },
        Message::Pong(_) => {
            heartbeat.pong_received();
            return Inbound::Continue;
        }
        // tungstenite answers transport pings itself.
        Message::Ping(_) | Message::Frame(_) => return Inbound::Continue,
        Message::Close(frame) => {
            info!(?frame, "server closed the socket");
            return Inbound::Closed;
        }
    };

    match parse_inbound(&text) {
        Ok(InboundFrame::Event(event)) => {
            trace!(seq = event.seq, event = event.event.name(), "event received");
            let _ = shared.bus.publish(&BusEvent::Server(event));
            Inbound::Continue
        }
        Ok(InboundFrame::Ping) => Inbound::ReplyPong,
        Ok(InboundFrame::Pong) => {
            heartbeat.pong_received();
            Inbound::Continue
        }
        Ok(InboundFrame::Control(name)) => {
            debug!(event = %name, "control frame");
            Inbound::Continue
        }
        Err(e) => {
            report_protocol_error(shared, &e.to_string());
            Inbound::Continue
        }
    }
}

fn report_protocol_error(shared: &Shared, message: &str) {
    warn!(error = message, "dropping inbound frame");
    let _ = shared
        .bus
        .publish(&BusEvent::ProtocolError(message.to_owned()));
}
