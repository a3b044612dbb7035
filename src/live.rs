//! Live opportunity stream: one owned session at a time, generation-tagged
//! events, and a single reconnect deadline slot.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::feed::LivePush;
use crate::filter::SubscriptionQuery;
use crate::model::key_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disabled,
    Connecting,
    Open,
    Closing,
    Disconnected,
}

/// What a transport session reports back. `generation` identifies the
/// session; anything from an older session is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Opened { generation: u64 },
    Message { generation: u64, text: String },
    Closed { generation: u64, reason: String },
}

impl LiveEvent {
    pub fn generation(&self) -> u64 {
        match self {
            LiveEvent::Opened { generation }
            | LiveEvent::Message { generation, .. }
            | LiveEvent::Closed { generation, .. } => *generation,
        }
    }
}

/// Handed to a transport so its session can report events.
#[derive(Debug, Clone)]
pub struct SessionLink {
    generation: u64,
    events: mpsc::UnboundedSender<LiveEvent>,
}

impl SessionLink {
    pub fn new(generation: u64, events: mpsc::UnboundedSender<LiveEvent>) -> Self {
        Self { generation, events }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn opened(&self) {
        let _ = self.events.send(LiveEvent::Opened {
            generation: self.generation,
        });
    }

    pub fn message(&self, text: String) {
        let _ = self.events.send(LiveEvent::Message {
            generation: self.generation,
            text,
        });
    }

    pub fn closed(&self, reason: impl Into<String>) {
        let _ = self.events.send(LiveEvent::Closed {
            generation: self.generation,
            reason: reason.into(),
        });
    }
}

/// Owner's handle on an open session. Closing (or dropping) it tells the
/// session to shut its socket down.
#[derive(Debug)]
pub struct Session {
    shutdown: Option<oneshot::Sender<()>>,
}

impl Session {
    pub fn new(shutdown: oneshot::Sender<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    pub fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Opens sessions against a stream URL.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str, link: SessionLink) -> Session;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based). Never gives up.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let secs = (self.base.as_secs_f64() * factor).min(self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveStatus {
    pub enabled: bool,
    pub state: ConnectionState,
    pub connected: bool,
    pub query: String,
    pub reconnects: u64,
    pub retry_in_ms: Option<u64>,
    pub last_error: Option<String>,
}

pub struct LiveStreamClient<T: Transport> {
    transport: T,
    endpoint: String,
    policy: ReconnectPolicy,
    enabled: bool,
    state: ConnectionState,
    query: SubscriptionQuery,
    session: Option<Session>,
    generation: u64,
    attempts: u32,
    retry_at: Option<Instant>,
    reconnects: u64,
    last_error: Option<String>,
    events: mpsc::UnboundedSender<LiveEvent>,
}

impl<T: Transport> LiveStreamClient<T> {
    pub fn new(
        transport: T,
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        query: SubscriptionQuery,
    ) -> (Self, mpsc::UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self {
            transport,
            endpoint: endpoint.into(),
            policy,
            enabled: false,
            state: ConnectionState::Disabled,
            query,
            session: None,
            generation: 0,
            attempts: 0,
            retry_at: None,
            reconnects: 0,
            last_error: None,
            events: tx,
        };
        (client, rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn query(&self) -> &SubscriptionQuery {
        &self.query
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn status(&self) -> LiveStatus {
        let now = Instant::now();
        LiveStatus {
            enabled: self.is_enabled(),
            state: self.state(),
            connected: self.is_connected(),
            query: self.query.to_string(),
            reconnects: self.reconnects,
            retry_in_ms: self
                .retry_at
                .map(|at| at.saturating_duration_since(now).as_millis() as u64),
            last_error: self.last_error.clone(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.is_enabled()) {
            (true, false) => {
                log::info!("live.enable query={}", self.query);
                self.enabled = true;
                self.attempts = 0;
                self.open();
            }
            (false, true) => self.disable(),
            _ => {}
        }
    }

    /// Tears everything down: session, pending retry, backoff. A live
    /// session leaves the client in `Closing` until it reports its close.
    pub fn disable(&mut self) {
        if !self.is_enabled() {
            return;
        }
        log::info!("live.disable query={}", self.query);
        self.enabled = false;
        self.retry_at = None;
        self.attempts = 0;
        self.state = match self.session.take() {
            Some(session) => {
                session.close();
                ConnectionState::Closing
            }
            None => ConnectionState::Disabled,
        };
    }

    /// Swaps the subscription. Reconnects only when the canonical query
    /// actually changed; returns whether it did.
    pub fn set_query(&mut self, query: SubscriptionQuery) -> bool {
        if query == self.query {
            return false;
        }
        log::info!("live.query.changed from={:?} to={:?}", self.query.as_str(), query.as_str());
        self.query = query;
        if self.is_enabled() {
            self.attempts = 0;
            self.open();
        }
        true
    }

    /// Operator recovery: close whatever is there and open a fresh session.
    pub fn reconnect(&mut self) {
        log::info!("live.reconnect.manual state={:?}", self.state);
        self.enabled = true;
        self.attempts = 0;
        self.reconnects += 1;
        self.open();
    }

    /// Applies a session event and returns any pushes it carried.
    pub fn handle(&mut self, event: LiveEvent) -> Vec<LivePush> {
        if event.generation() != self.generation {
            log::debug!(
                "live.event.stale generation={} current={}",
                event.generation(),
                self.generation
            );
            return Vec::new();
        }
        if !self.is_enabled() {
            if let LiveEvent::Closed { reason, .. } = event {
                if self.state == ConnectionState::Closing {
                    log::info!("live.closed reason={} state=disabled", reason);
                    self.state = ConnectionState::Disabled;
                }
            }
            return Vec::new();
        }
        match event {
            LiveEvent::Opened { .. } => {
                log::info!("live.open query={}", self.query);
                self.state = ConnectionState::Open;
                self.attempts = 0;
                self.retry_at = None;
                self.last_error = None;
                Vec::new()
            }
            LiveEvent::Message { text, .. } => match decode_push(&text) {
                Ok(pushes) => pushes,
                Err(e) => {
                    log::warn!("live.message.decode_failed err={} raw={}", e, truncate(&text, 200));
                    Vec::new()
                }
            },
            LiveEvent::Closed { reason, .. } => {
                self.session = None;
                self.state = ConnectionState::Disconnected;
                self.last_error = Some(reason.clone());
                self.schedule_retry();
                log::warn!(
                    "live.closed reason={} retry_in_ms={}",
                    reason,
                    self.retry_at
                        .map(|at| at.saturating_duration_since(Instant::now()).as_millis())
                        .unwrap_or(0)
                );
                Vec::new()
            }
        }
    }

    /// Fires the scheduled reconnect, if it is still wanted.
    pub fn on_retry_due(&mut self) {
        if self.retry_at.take().is_none() {
            return;
        }
        if self.state != ConnectionState::Disconnected {
            return;
        }
        self.reconnects += 1;
        log::info!("live.reconnect.attempt n={} query={}", self.attempts, self.query);
        self.open();
    }

    fn schedule_retry(&mut self) {
        let delay = self.policy.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        // One slot: a new deadline replaces any pending one.
        self.retry_at = Some(Instant::now() + delay);
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn open(&mut self) {
        self.close_session();
        self.retry_at = None;
        self.generation += 1;
        let url = self.query.url_for(&self.endpoint);
        log::info!("live.connect url={} generation={}", url, self.generation);
        let link = SessionLink::new(self.generation, self.events.clone());
        self.session = Some(self.transport.open(&url, link));
        self.state = ConnectionState::Connecting;
    }
}

/// Decodes one inbound frame: a single object or an array of objects.
/// Non-object array items and objects without a usable key are skipped.
pub fn decode_push(text: &str) -> Result<Vec<LivePush>, serde_json::Error> {
    let value: JsonValue = serde_json::from_str(text)?;
    let items = match value {
        JsonValue::Array(items) => items,
        other => vec![other],
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let JsonValue::Object(fields) = item else {
            log::debug!("live.message.skip_non_object");
            continue;
        };
        match key_of(&fields) {
            Some(key) => out.push(LivePush { key, fields }),
            None => log::warn!("live.message.no_key fields={}", fields.len()),
        }
    }
    Ok(out)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub(crate) struct OpenedSession {
        pub url: String,
        pub link: SessionLink,
        pub shutdown: oneshot::Receiver<()>,
    }

    /// Records every session instead of touching the network.
    #[derive(Clone, Default)]
    pub(crate) struct FakeTransport {
        pub sessions: Arc<Mutex<Vec<OpenedSession>>>,
    }

    impl FakeTransport {
        pub fn opened(&self) -> usize {
            self.sessions.lock().len()
        }

        pub fn link(&self, idx: usize) -> SessionLink {
            self.sessions.lock()[idx].link.clone()
        }

        pub fn url(&self, idx: usize) -> String {
            self.sessions.lock()[idx].url.clone()
        }

        pub fn was_shut_down(&self, idx: usize) -> bool {
            let mut sessions = self.sessions.lock();
            !matches!(sessions[idx].shutdown.try_recv(), Err(oneshot::error::TryRecvError::Empty))
        }
    }

    impl Transport for FakeTransport {
        fn open(&self, url: &str, link: SessionLink) -> Session {
            let (tx, rx) = oneshot::channel();
            self.sessions.lock().push(OpenedSession {
                url: url.to_string(),
                link,
                shutdown: rx,
            });
            Session::new(tx)
        }
    }

    fn client(
        transport: &FakeTransport,
        query: &str,
    ) -> (LiveStreamClient<FakeTransport>, mpsc::UnboundedReceiver<LiveEvent>) {
        LiveStreamClient::new(
            transport.clone(),
            "ws://localhost:8081/api/v1/ws/opportunities",
            ReconnectPolicy::default(),
            SubscriptionQuery(query.to_string()),
        )
    }

    fn pump(c: &mut LiveStreamClient<FakeTransport>, rx: &mut mpsc::UnboundedReceiver<LiveEvent>) -> Vec<LivePush> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.extend(c.handle(ev));
        }
        out
    }

    #[test]
    fn test_policy_delays() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay(0), Duration::from_secs(3));
        assert_eq!(p.delay(1), Duration::from_secs(6));
        assert_eq!(p.delay(4), Duration::from_secs(30));
        assert_eq!(p.delay(100), Duration::from_secs(30));

        let fixed = ReconnectPolicy {
            multiplier: 1.0,
            ..p
        };
        assert_eq!(fixed.delay(7), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_open_and_messages() {
        let t = FakeTransport::default();
        let (mut c, mut rx) = client(&t, "network_id=1");
        assert_eq!(c.state(), ConnectionState::Disabled);

        c.set_enabled(true);
        assert_eq!(c.state(), ConnectionState::Connecting);
        assert_eq!(t.opened(), 1);
        assert_eq!(t.url(0), "ws://localhost:8081/api/v1/ws/opportunities?network_id=1");

        let link = t.link(0);
        link.opened();
        link.message(r#"[{"id":"a","network_id":1},42,{"id":"b","network_id":1}]"#.to_string());
        link.message("not json".to_string());
        link.message(r#"{"id":"c","network_id":1}"#.to_string());
        let pushes = pump(&mut c, &mut rx);

        assert_eq!(c.state(), ConnectionState::Open);
        assert!(c.is_connected());
        let keys: Vec<&str> = pushes.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_on_drop_scheduled_once() {
        let t = FakeTransport::default();
        let (mut c, mut rx) = client(&t, "");
        c.set_enabled(true);
        t.link(0).opened();
        pump(&mut c, &mut rx);

        t.link(0).closed("connection reset");
        pump(&mut c, &mut rx);
        assert_eq!(c.state(), ConnectionState::Disconnected);
        let deadline = c.retry_deadline().expect("retry scheduled");
        assert_eq!(deadline, Instant::now() + Duration::from_secs(3));
        assert_eq!(t.opened(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        c.on_retry_due();
        c.on_retry_due();
        assert_eq!(t.opened(), 2);
        assert_eq!(c.state(), ConnectionState::Connecting);
        assert!(c.retry_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_pending_retry() {
        let t = FakeTransport::default();
        let (mut c, mut rx) = client(&t, "");
        c.set_enabled(true);
        t.link(0).closed("handshake failed");
        pump(&mut c, &mut rx);
        assert!(c.retry_deadline().is_some());

        c.set_enabled(false);
        assert_eq!(c.state(), ConnectionState::Disabled);
        assert!(c.retry_deadline().is_none());

        tokio::time::advance(Duration::from_secs(10)).await;
        c.on_retry_due();
        assert_eq!(t.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_while_open_waits_for_close() {
        let t = FakeTransport::default();
        let (mut c, mut rx) = client(&t, "");
        c.set_enabled(true);
        t.link(0).opened();
        pump(&mut c, &mut rx);

        c.set_enabled(false);
        assert!(!c.is_enabled());
        assert_eq!(c.state(), ConnectionState::Closing);
        assert!(t.was_shut_down(0));

        t.link(0).message(r#"{"id":"late","network_id":1}"#.to_string());
        t.link(0).closed("client disconnect");
        assert!(pump(&mut c, &mut rx).is_empty());
        assert_eq!(c.state(), ConnectionState::Disabled);
        assert!(c.retry_deadline().is_none());

        c.set_enabled(true);
        assert_eq!(t.opened(), 2);
        assert_eq!(c.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_resets_on_open() {
        let t = FakeTransport::default();
        let (mut c, mut rx) = client(&t, "");
        c.set_enabled(true);

        t.link(0).closed("down");
        pump(&mut c, &mut rx);
        assert_eq!(c.retry_deadline(), Some(Instant::now() + Duration::from_secs(3)));
        c.on_retry_due();

        t.link(1).closed("still down");
        pump(&mut c, &mut rx);
        assert_eq!(c.retry_deadline(), Some(Instant::now() + Duration::from_secs(6)));
        c.on_retry_due();

        t.link(2).opened();
        t.link(2).closed("blip");
        pump(&mut c, &mut rx);
        assert_eq!(c.retry_deadline(), Some(Instant::now() + Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_change_replaces_session() {
        let t = FakeTransport::default();
        let (mut c, mut rx) = client(&t, "network_id=1");
        c.set_enabled(true);
        t.link(0).opened();
        pump(&mut c, &mut rx);

        assert!(!c.set_query(SubscriptionQuery("network_id=1".to_string())));
        assert_eq!(t.opened(), 1);

        assert!(c.set_query(SubscriptionQuery("network_id=56".to_string())));
        assert_eq!(t.opened(), 2);
        assert!(t.was_shut_down(0));
        assert!(!t.was_shut_down(1));
        assert_eq!(t.url(1), "ws://localhost:8081/api/v1/ws/opportunities?network_id=56");

        // The old session's close must not trigger a retry.
        t.link(0).closed("closed by client");
        t.link(0).message(r#"{"id":"late","network_id":1}"#.to_string());
        assert!(pump(&mut c, &mut rx).is_empty());
        assert_eq!(c.state(), ConnectionState::Connecting);
        assert!(c.retry_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_change_while_disabled_does_not_connect() {
        let t = FakeTransport::default();
        let (mut c, _rx) = client(&t, "");
        assert!(c.set_query(SubscriptionQuery("status=reverted".to_string())));
        assert_eq!(t.opened(), 0);
        c.set_enabled(true);
        assert_eq!(t.url(0), "ws://localhost:8081/api/v1/ws/opportunities?status=reverted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_forces_new_session() {
        let t = FakeTransport::default();
        let (mut c, mut rx) = client(&t, "");
        c.set_enabled(true);
        t.link(0).closed("down");
        pump(&mut c, &mut rx);
        assert!(c.retry_deadline().is_some());

        c.reconnect();
        assert_eq!(t.opened(), 2);
        assert!(c.retry_deadline().is_none());
        assert_eq!(c.state(), ConnectionState::Connecting);
        assert_eq!(c.status().reconnects, 1);
    }

    #[test]
    fn test_decode_push_rejects_garbage() {
        assert!(decode_push("{oops").is_err());
        assert!(decode_push("17").unwrap().is_empty());
        assert!(decode_push(r#"{"profit_usd": 1}"#).unwrap().is_empty());
    }
}
