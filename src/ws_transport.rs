use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::live::{Session, SessionLink, Transport};
use crate::utils::{sleep_until, tick};

const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket transport: one spawned task per session. The session only
/// listens; the frames it writes are keepalive pings, pongs and the closing
/// handshake.
///
/// Every session ends with exactly one `closed` report, whether the
/// handshake stalls, the peer goes quiet, the server hangs up or the owner
/// shuts it down.
#[derive(Debug, Clone, Copy)]
pub struct WsTransport {
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl WsTransport {
    /// `idle_timeout`: close when nothing arrives for this long. Pings go out
    /// at half that period so a healthy but quiet peer still answers.
    pub fn new(handshake_timeout: Duration, idle_timeout: Option<Duration>) -> Self {
        Self {
            handshake_timeout,
            idle_timeout,
        }
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, link: SessionLink) -> Session {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(run_session(url.to_string(), link, rx, *self));
        Session::new(tx)
    }
}

async fn run_session(url: String, link: SessionLink, mut shutdown: oneshot::Receiver<()>, cfg: WsTransport) {
    let generation = link.generation();
    let connected = tokio::select! {
        res = tokio::time::timeout(cfg.handshake_timeout, connect_async(url.as_str())) => res,
        _ = &mut shutdown => {
            log::debug!("live.ws.cancelled generation={}", generation);
            link.closed("cancelled before open");
            return;
        }
    };

    let (ws, response) = match connected {
        Ok(Ok(x)) => x,
        Ok(Err(e)) => {
            link.closed(format!("connect failed: {e}"));
            return;
        }
        Err(_) => {
            log::warn!(
                "live.ws.handshake_timeout generation={} after_ms={}",
                generation,
                cfg.handshake_timeout.as_millis()
            );
            link.closed("handshake timeout");
            return;
        }
    };
    log::debug!("live.ws.handshake status={} generation={}", response.status(), generation);
    link.opened();

    let (mut writer, mut reader) = ws.split();
    let mut idle_at = cfg.idle_timeout.map(|d| Instant::now() + d);
    let mut keepalive = cfg.idle_timeout.map(|d| {
        let every = (d / 2).max(Duration::from_millis(1));
        let mut iv = tokio::time::interval_at(Instant::now() + every, every);
        iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
        iv
    });

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                let sent = tokio::time::timeout(CLOSE_GRACE, async {
                    writer.send(Message::Close(Some(frame))).await?;
                    writer.close().await
                })
                .await;
                if let Ok(Err(e)) = sent {
                    log::debug!("live.ws.close_send_failed {}", e);
                }
                log::debug!("live.ws.shutdown generation={}", generation);
                link.closed("client disconnect");
                return;
            }
            _ = sleep_until(idle_at) => {
                log::warn!("live.ws.idle_timeout generation={}", generation);
                link.closed("idle timeout");
                return;
            }
            _ = tick(&mut keepalive) => {
                if let Err(e) = writer.send(Message::Ping(Vec::new())).await {
                    link.closed(format!("ping failed: {e}"));
                    return;
                }
            }
            msg = reader.next() => {
                if let Some(d) = cfg.idle_timeout {
                    idle_at = Some(Instant::now() + d);
                }
                match msg {
                    Some(Ok(Message::Text(text))) => link.message(text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => link.message(text),
                        Err(e) => log::warn!("live.ws.binary_not_utf8 len={}", e.as_bytes().len()),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = writer.send(Message::Pong(data)).await {
                            link.closed(format!("pong failed: {e}"));
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("server closed ({}): {}", f.code, f.reason))
                            .unwrap_or_else(|| "server closed".to_string());
                        link.closed(reason);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        link.closed(format!("stream error: {e}"));
                        return;
                    }
                    None => {
                        link.closed("stream ended");
                        return;
                    }
                }
            }
        }
    }
}
