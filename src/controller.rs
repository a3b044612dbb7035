//! The feed controller: one task that owns the filter, the pager, the working
//! set and the live client, processes every input in turn and publishes an
//! immutable snapshot after each one.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::api_client::{FetchError, PageSource};
use crate::config::Settings;
use crate::fallback::FetchFallback;
use crate::feed::{FeedSynchronizer, SortKey, SortSpec};
use crate::filter::{FilterError, FilterForm, FilterState, StatusFilter};
use crate::live::{LiveEvent, LiveStatus, LiveStreamClient, ReconnectPolicy, Transport};
use crate::model::{Network, Opportunity, OpportunityPage, PaginationInfo};
use crate::networks::NetworkDirectory;
use crate::pagination::{PageJumpError, Pager, MAX_PAGE_SIZE};
use crate::utils::{now_ts, sleep_until, tick};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetRealtime(bool),
    Reconnect,
    ApplyFilter(FilterForm),
    ClearFilters,
    /// Zero-based, as the table control counts.
    GoToPage(u32),
    JumpToPage(String),
    SetPageSize(u32),
    Sort(SortKey),
    Refresh,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    PageJump(#[from] PageJumpError),
    #[error("feed controller stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub page_size: u32,
    pub working_set_cap: usize,
    pub highlight_window: Duration,
    pub default_status: StatusFilter,
    pub realtime: bool,
    pub refresh_every: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl FeedConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            ws_url: s.live_ws_url.clone(),
            page_size: s.default_page_size,
            working_set_cap: s.working_set_cap,
            highlight_window: s.highlight_window(),
            default_status: s.default_status,
            realtime: s.realtime_enabled,
            refresh_every: s.refresh_interval(),
            reconnect: s.reconnect_policy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBanner {
    pub kind: String,
    pub message: String,
}

impl ErrorBanner {
    fn from_fetch(e: &FetchError, synthetic: bool) -> Self {
        let mut message = e.banner();
        if synthetic {
            message.push_str(" Showing sample data.");
        }
        Self {
            kind: e.kind().to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowView {
    pub key: String,
    pub network_name: String,
    #[serde(rename = "_new")]
    pub is_new: bool,
    pub status_name: &'static str,
    #[serde(flatten)]
    pub opportunity: Opportunity,
}

/// Everything the presentation layer renders. Rows are already in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedSnapshot {
    pub rows: Vec<RowView>,
    pub pagination: Option<PaginationInfo>,
    pub page: u32,
    pub page_index: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub loading: bool,
    pub error: Option<ErrorBanner>,
    pub synthetic: bool,
    pub live: LiveStatus,
    pub last_updated: Option<f64>,
    pub filter: FilterForm,
    pub subscription: String,
    pub sort: SortSpec,
    pub highlighted: usize,
}

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<(), CommandError>>,
}

enum Completion {
    Page {
        generation: u64,
        filter: FilterState,
        result: Result<OpportunityPage, FetchError>,
    },
    Networks(Result<Vec<Network>, FetchError>),
}

/// Cheap, cloneable handle used by the dashboard. When every handle is
/// dropped the controller tears its live session down and exits.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Request>,
    snapshots: watch::Receiver<FeedSnapshot>,
    networks: NetworkDirectory,
}

impl ControllerHandle {
    pub async fn dispatch(&self, command: Command) -> Result<(), CommandError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Request { command, reply: tx })
            .await
            .map_err(|_| CommandError::Stopped)?;
        rx.await.map_err(|_| CommandError::Stopped)?
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn networks(&self) -> &NetworkDirectory {
        &self.networks
    }
}

struct FeedController<S: PageSource, T: Transport> {
    source: S,
    live: LiveStreamClient<T>,
    feed: FeedSynchronizer,
    filter: FilterState,
    pager: Pager,
    sort: SortSpec,
    default_status: StatusFilter,
    fallback: Box<dyn FetchFallback>,
    networks: NetworkDirectory,
    fetch_gen: u64,
    done_tx: mpsc::UnboundedSender<Completion>,
    loading: bool,
    error: Option<ErrorBanner>,
    synthetic: bool,
    last_updated: Option<f64>,
}

/// Starts the controller task: fetches networks and the first page, and
/// opens the live stream if realtime is on.
pub fn spawn<S: PageSource, T: Transport>(
    cfg: FeedConfig,
    source: S,
    transport: T,
    fallback: Box<dyn FetchFallback>,
    networks: NetworkDirectory,
) -> (ControllerHandle, JoinHandle<()>) {
    let filter = FilterState::new(cfg.default_status, cfg.page_size);
    let (live, live_rx) = LiveStreamClient::new(transport, cfg.ws_url.clone(), cfg.reconnect, filter.subscription_query());
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let ctl = FeedController {
        source,
        live,
        feed: FeedSynchronizer::new(cfg.working_set_cap, cfg.highlight_window),
        pager: Pager::new(cfg.page_size),
        filter,
        sort: SortSpec::default(),
        default_status: cfg.default_status,
        fallback,
        networks: networks.clone(),
        fetch_gen: 0,
        done_tx,
        loading: false,
        error: None,
        synthetic: false,
        last_updated: None,
    };
    let (snap_tx, snap_rx) = watch::channel(ctl.snapshot());

    let task = tokio::spawn(ctl.run(cfg, cmd_rx, live_rx, done_rx, snap_tx));
    let handle = ControllerHandle {
        commands: cmd_tx,
        snapshots: snap_rx,
        networks,
    };
    (handle, task)
}

impl<S: PageSource, T: Transport> FeedController<S, T> {
    async fn run(
        mut self,
        cfg: FeedConfig,
        mut commands: mpsc::Receiver<Request>,
        mut live_rx: mpsc::UnboundedReceiver<LiveEvent>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
        snapshots: watch::Sender<FeedSnapshot>,
    ) {
        log::info!(
            "feed.controller.start page_size={} cap={} realtime={} query={}",
            self.pager.page_size(),
            self.feed.cap(),
            cfg.realtime,
            self.live.query()
        );
        self.request_networks();
        self.request_page();
        if cfg.realtime {
            self.live.set_enabled(true);
        }
        snapshots.send_replace(self.snapshot());

        let mut refresh: Option<Interval> = cfg.refresh_every.map(|every| {
            let mut iv = tokio::time::interval_at(Instant::now() + every, every);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });

        loop {
            let retry_at = self.live.retry_deadline();
            let highlight_at = self.feed.next_highlight_deadline();
            let mut reply = None;

            tokio::select! {
                req = commands.recv() => {
                    let Some(Request { command, reply: tx }) = req else {
                        break;
                    };
                    reply = Some((tx, self.apply(command)));
                }
                Some(done) = done_rx.recv() => self.on_completion(done),
                Some(event) = live_rx.recv() => self.on_live_event(event),
                _ = sleep_until(retry_at) => self.live.on_retry_due(),
                _ = sleep_until(highlight_at) => {
                    let cleared = self.feed.expire_highlights(Instant::now());
                    log::debug!("feed.highlight.expired rows={}", cleared);
                }
                _ = tick(&mut refresh) => {
                    log::debug!("feed.refresh.tick");
                    self.request_page();
                }
            }

            snapshots.send_replace(self.snapshot());
            if let Some((tx, res)) = reply {
                let _ = tx.send(res);
            }
        }

        self.live.disable();
        log::info!("feed.controller.stopped");
    }

    fn apply(&mut self, command: Command) -> Result<(), CommandError> {
        log::debug!("feed.command {:?}", command);
        match command {
            Command::SetRealtime(on) => self.live.set_enabled(on),
            Command::Reconnect => self.live.reconnect(),
            Command::ApplyFilter(form) => {
                let f = form.parse(self.pager.page_size())?;
                self.set_filter(f);
            }
            Command::ClearFilters => {
                let f = FilterState::cleared(self.default_status, self.pager.page_size());
                self.set_filter(f);
            }
            Command::GoToPage(index) => {
                self.pager.go_to_index(index);
                self.request_page();
            }
            Command::JumpToPage(raw) => {
                if self.pager.jump(&raw)?.is_some() {
                    self.request_page();
                }
            }
            Command::SetPageSize(n) => {
                if n == 0 || n > MAX_PAGE_SIZE {
                    return Err(FilterError::BadPageSize(n).into());
                }
                let n = self.pager.set_page_size(n);
                self.filter = self.filter.with_page_size(n);
                self.request_page();
            }
            Command::Sort(key) => self.sort = self.sort.toggle(key),
            Command::Refresh => self.request_page(),
        }
        Ok(())
    }

    /// New filter: back to page 1, resubscribe only if the canonical query moved.
    fn set_filter(&mut self, filter: FilterState) {
        self.pager.reset();
        self.filter = filter;
        let changed = self.live.set_query(self.filter.subscription_query());
        log::info!(
            "feed.filter.applied query={} resubscribed={}",
            self.filter.subscription_query(),
            changed
        );
        self.request_page();
    }

    fn request_page(&mut self) {
        self.fetch_gen += 1;
        let generation = self.fetch_gen;
        let filter = self.filter.with_page(self.pager.page());
        self.loading = true;
        log::debug!("feed.load.start generation={} query={}", generation, filter.page_query());

        let source = self.source.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_page(&filter).await;
            let _ = done.send(Completion::Page {
                generation,
                filter,
                result,
            });
        });
    }

    fn request_networks(&self) {
        let source = self.source.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_networks().await;
            let _ = done.send(Completion::Networks(result));
        });
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Page {
                generation,
                filter,
                result,
            } => {
                if generation != self.fetch_gen {
                    log::debug!("feed.load.stale generation={} current={}", generation, self.fetch_gen);
                    return;
                }
                self.loading = false;
                match result {
                    Ok(page) => {
                        log::info!(
                            "feed.load.ok page={} rows={} total={}",
                            filter.page,
                            page.opportunities.len(),
                            page.pagination.map(|p| p.total).unwrap_or(0)
                        );
                        self.install_page(page);
                        self.error = None;
                        self.synthetic = false;
                    }
                    Err(e) => {
                        log::warn!("feed.load.error kind={} err={} kept_rows={}", e.kind(), e, self.feed.len());
                        let replacement = self.fallback.on_page_error(&filter, &e, &self.networks.list());
                        let synthetic = replacement.is_some();
                        if let Some(page) = replacement {
                            self.install_page(page);
                        }
                        self.synthetic = synthetic;
                        self.error = Some(ErrorBanner::from_fetch(&e, synthetic));
                    }
                }
            }
            Completion::Networks(Ok(list)) => {
                let n = self.networks.replace(list);
                log::info!("feed.networks.ok count={}", n);
            }
            Completion::Networks(Err(e)) => {
                log::warn!("feed.networks.error err={} using_builtin=true", e);
            }
        }
    }

    fn install_page(&mut self, page: OpportunityPage) {
        if let Some(info) = page.pagination {
            self.pager.observe(info);
        }
        self.feed.load_page(page);
        self.last_updated = Some(now_ts());
    }

    fn on_live_event(&mut self, event: LiveEvent) {
        let pushes = self.live.handle(event);
        if pushes.is_empty() {
            return;
        }
        let filter = &self.filter;
        let out = self.feed.merge_live(pushes, Instant::now(), |o| filter.admits(o));
        if out.changed() {
            self.last_updated = Some(now_ts());
            log::debug!(
                "feed.live.merged inserted={} replaced={} highlighted={} evicted={} rejected={} size={}",
                out.inserted,
                out.replaced,
                out.highlighted,
                out.evicted,
                out.rejected,
                self.feed.len()
            );
        }
    }

    fn snapshot(&self) -> FeedSnapshot {
        let rows: Vec<RowView> = self
            .feed
            .sorted(self.sort)
            .into_iter()
            .map(|r| RowView {
                key: r.key.clone(),
                network_name: self.networks.name_for(r.opportunity.network_id),
                is_new: r.is_new,
                status_name: r.opportunity.status.display_name(),
                opportunity: r.opportunity.clone(),
            })
            .collect();
        FeedSnapshot {
            highlighted: rows.iter().filter(|r| r.is_new).count(),
            rows,
            pagination: self.feed.pagination().copied(),
            page: self.pager.page(),
            page_index: self.pager.display_index(),
            page_size: self.pager.page_size(),
            total_pages: self.pager.total_pages(),
            loading: self.loading,
            error: self.error.clone(),
            synthetic: self.synthetic,
            live: self.live.status(),
            last_updated: self.last_updated,
            filter: FilterForm::from_state(&self.filter),
            subscription: self.filter.subscription_query().to_string(),
            sort: self.sort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{SurfaceError, SyntheticData};
    use crate::live::tests::FakeTransport;
    use crate::live::ConnectionState;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;

    type Scripted = (Duration, Result<OpportunityPage, FetchError>);

    /// Serves scripted pages in order; an empty script serves empty pages.
    #[derive(Clone, Default)]
    struct FakeSource {
        script: Arc<Mutex<VecDeque<Scripted>>>,
        calls: Arc<Mutex<Vec<FilterState>>>,
    }

    impl FakeSource {
        fn push(&self, delay_ms: u64, result: Result<OpportunityPage, FetchError>) {
            self.script.lock().push_back((Duration::from_millis(delay_ms), result));
        }

        fn calls(&self) -> Vec<FilterState> {
            self.calls.lock().clone()
        }
    }

    impl PageSource for FakeSource {
        async fn fetch_page(&self, filter: &FilterState) -> Result<OpportunityPage, FetchError> {
            self.calls.lock().push(filter.clone());
            let next = self.script.lock().pop_front();
            match next {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => Ok(OpportunityPage {
                    opportunities: Vec::new(),
                    pagination: Some(PaginationInfo::for_total(filter.page, filter.page_size, 0)),
                }),
            }
        }

        async fn fetch_networks(&self) -> Result<Vec<Network>, FetchError> {
            Err(FetchError::Transport("offline".to_string()))
        }
    }

    fn page(prefix: &str, n: usize, total: u64) -> OpportunityPage {
        let opportunities = (0..n)
            .map(|i| {
                serde_json::from_value(json!({
                    "id": format!("{prefix}{i}"),
                    "network_id": 1,
                    "status": "succeeded",
                    "profit_usd": 10.0 + i as f64,
                    "created_at": 1_700_000_000 + i as i64,
                }))
                .unwrap()
            })
            .collect();
        OpportunityPage {
            opportunities,
            pagination: Some(PaginationInfo::for_total(1, 20, total)),
        }
    }

    fn config(realtime: bool) -> FeedConfig {
        FeedConfig {
            ws_url: "ws://upstream/api/v1/ws/opportunities".to_string(),
            page_size: 20,
            working_set_cap: 500,
            highlight_window: Duration::from_secs(3),
            default_status: StatusFilter::All,
            realtime,
            refresh_every: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    fn start(
        cfg: FeedConfig,
        source: &FakeSource,
        transport: &FakeTransport,
        fallback: Box<dyn FetchFallback>,
    ) -> ControllerHandle {
        let (handle, _task) = spawn(cfg, source.clone(), transport.clone(), fallback, NetworkDirectory::with_builtin());
        handle
    }

    async fn until(handle: &ControllerHandle, pred: impl Fn(&FeedSnapshot) -> bool) -> FeedSnapshot {
        let mut rx = handle.snapshots.clone();
        let snap = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| pred(s)))
            .await
            .expect("condition not reached")
            .expect("controller gone")
            .clone();
        snap
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_row_highlighted_then_decays() {
        let source = FakeSource::default();
        source.push(0, Ok(page("r", 20, 20)));
        let t = FakeTransport::default();
        let h = start(config(true), &source, &t, Box::new(SurfaceError));

        until(&h, |s| s.rows.len() == 20 && !s.loading && s.live.state == ConnectionState::Connecting).await;
        assert!(t.url(0).starts_with("ws://upstream/api/v1/ws/opportunities"));
        t.link(0).opened();
        until(&h, |s| s.live.connected).await;

        t.link(0).message(
            json!({"id": "X", "network_id": 137, "profit_usd": 5.0, "created_at": 1_800_000_000})
                .to_string(),
        );
        let s = until(&h, |s| s.rows.len() == 21).await;
        assert_eq!(s.rows[0].key, "X");
        assert!(s.rows[0].is_new);
        assert_eq!(s.rows[0].network_name, "Polygon");
        assert_eq!(s.rows[0].status_name, "None");
        assert_eq!(s.rows[1].status_name, "Success");
        assert_eq!(s.highlighted, 1);
        assert!(s.rows[1..].iter().all(|r| !r.is_new));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(h.snapshot().rows[0].is_new);

        let s = until(&h, |s| s.highlighted == 0).await;
        assert_eq!(s.rows.len(), 21);
        assert_eq!(s.rows[0].key, "X");
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_merge_stamps_last_updated() {
        let source = FakeSource::default();
        source.push(0, Err(FetchError::Status(500)));
        let t = FakeTransport::default();
        let h = start(config(true), &source, &t, Box::new(SurfaceError));

        let s = until(&h, |s| s.error.is_some() && s.live.state == ConnectionState::Connecting).await;
        assert_eq!(s.last_updated, None);
        t.link(0).opened();

        // Rejected pushes change nothing and leave the stamp alone.
        t.link(0).message("{oops".to_string());
        let s = until(&h, |s| s.live.connected).await;
        assert_eq!(s.last_updated, None);

        t.link(0).message(json!({"id": "L", "network_id": 1, "profit_usd": 1.0}).to_string());
        let s = until(&h, |s| s.rows.len() == 1).await;
        assert!(s.last_updated.is_some());
        assert!(s.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_rows_and_raises_banner() {
        let source = FakeSource::default();
        source.push(0, Ok(page("r", 20, 20)));
        source.push(0, Err(FetchError::Status(500)));
        source.push(0, Err(FetchError::Unavailable));
        let t = FakeTransport::default();
        let h = start(config(false), &source, &t, Box::new(SurfaceError));
        until(&h, |s| s.rows.len() == 20 && !s.loading).await;

        h.dispatch(Command::Refresh).await.unwrap();
        let s = until(&h, |s| s.error.is_some() && !s.loading).await;
        assert_eq!(s.rows.len(), 20);
        let banner = s.error.unwrap();
        assert_eq!(banner.kind, "status");
        assert_eq!(banner.message, "API error: 500");
        assert!(!s.synthetic);

        h.dispatch(Command::Refresh).await.unwrap();
        let s = until(&h, |s| s.error.as_ref().map(|e| e.kind.as_str()) == Some("unavailable")).await;
        assert!(s.error.unwrap().message.contains("unavailable"));
        assert_eq!(s.rows.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_is_discarded() {
        let source = FakeSource::default();
        source.push(5_000, Ok(page("old", 3, 3)));
        source.push(1_000, Ok(page("new", 2, 2)));
        let t = FakeTransport::default();
        let h = start(config(false), &source, &t, Box::new(SurfaceError));

        let form = FilterForm {
            network: "137".into(),
            ..Default::default()
        };
        h.dispatch(Command::ApplyFilter(form)).await.unwrap();
        let s = until(&h, |s| !s.loading && s.rows.len() == 2).await;
        assert_eq!(s.rows[0].key, "new1");

        tokio::time::sleep(Duration::from_secs(10)).await;
        let s = h.snapshot();
        assert_eq!(s.rows.len(), 2);
        assert!(s.rows.iter().all(|r| r.key.starts_with("new")));
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_window_change_keeps_subscription() {
        let source = FakeSource::default();
        let t = FakeTransport::default();
        let h = start(config(true), &source, &t, Box::new(SurfaceError));
        until(&h, |s| s.live.state == ConnectionState::Connecting && !s.loading).await;
        t.link(0).opened();
        let s = until(&h, |s| s.live.connected).await;

        let form = FilterForm {
            timestamp_from: "1700000000".into(),
            ..s.filter.clone()
        };
        h.dispatch(Command::ApplyFilter(form.clone())).await.unwrap();
        until(&h, |s| !s.loading).await;
        assert_eq!(t.opened(), 1);
        assert_eq!(source.calls().last().unwrap().created_from, Some(1_700_000_000));

        let form = FilterForm {
            network: "56".into(),
            ..form
        };
        h.dispatch(Command::ApplyFilter(form)).await.unwrap();
        assert_eq!(t.opened(), 2);
        assert!(t.was_shut_down(0));
        assert!(t.url(1).ends_with("?network_id=56"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_pending_reconnect() {
        let source = FakeSource::default();
        let t = FakeTransport::default();
        let h = start(config(true), &source, &t, Box::new(SurfaceError));
        until(&h, |s| s.live.state == ConnectionState::Connecting).await;

        t.link(0).closed("connection refused");
        let s = until(&h, |s| s.live.state == ConnectionState::Disconnected).await;
        assert_eq!(s.live.retry_in_ms, Some(3000));

        h.dispatch(Command::SetRealtime(false)).await.unwrap();
        assert_eq!(h.snapshot().live.state, ConnectionState::Disabled);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(t.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_reconnects_after_delay() {
        let source = FakeSource::default();
        let t = FakeTransport::default();
        let h = start(config(true), &source, &t, Box::new(SurfaceError));
        until(&h, |s| s.live.state == ConnectionState::Connecting).await;
        t.link(0).opened();
        until(&h, |s| s.live.connected).await;

        t.link(0).closed("reset by peer");
        until(&h, |s| s.live.state == ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(2_999)).await;
        assert_eq!(t.opened(), 1);
        let s = until(&h, |s| s.live.state == ConnectionState::Connecting).await;
        assert_eq!(t.opened(), 2);
        assert_eq!(s.live.reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_fallback_is_flagged() {
        let source = FakeSource::default();
        source.push(0, Err(FetchError::Transport("connection refused".into())));
        let t = FakeTransport::default();
        let h = start(config(false), &source, &t, Box::new(SyntheticData::with_seed(1)));

        let s = until(&h, |s| !s.loading && s.error.is_some()).await;
        assert!(s.synthetic);
        assert_eq!(s.rows.len(), 20);
        assert_eq!(s.pagination.unwrap().total, 1000);
        assert!(s.error.unwrap().message.contains("sample data"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paging_commands() {
        let source = FakeSource::default();
        source.push(0, Ok(page("r", 20, 200)));
        let t = FakeTransport::default();
        let h = start(config(false), &source, &t, Box::new(SurfaceError));
        until(&h, |s| !s.loading && s.total_pages == 10).await;

        let form = FilterForm {
            network: "1".into(),
            ..Default::default()
        };
        h.dispatch(Command::ApplyFilter(form)).await.unwrap();
        until(&h, |s| !s.loading).await;

        h.dispatch(Command::GoToPage(3)).await.unwrap();
        until(&h, |s| !s.loading).await;
        // The filtered page came back empty, so there is only one page left.
        assert_eq!(source.calls().last().unwrap().page, 1);

        assert_eq!(
            h.dispatch(Command::JumpToPage("two".into())).await,
            Err(CommandError::PageJump(PageJumpError::NotANumber("two".into())))
        );
        let before = source.calls().len();
        h.dispatch(Command::JumpToPage("1".into())).await.unwrap();
        assert_eq!(source.calls().len(), before);

        h.dispatch(Command::SetPageSize(50)).await.unwrap();
        until(&h, |s| !s.loading).await;
        let last = source.calls().last().cloned().unwrap();
        assert_eq!((last.page, last.page_size), (1, 50));
        assert_eq!(last.network, crate::filter::NetworkFilter::Chain(1));
        assert_eq!(
            h.dispatch(Command::SetPageSize(0)).await,
            Err(CommandError::Filter(FilterError::BadPageSize(0)))
        );

        assert_eq!(
            h.dispatch(Command::ApplyFilter(FilterForm {
                profit_min: "lots".into(),
                ..Default::default()
            }))
            .await,
            Err(CommandError::Filter(FilterError::NotANumber {
                field: "profit_min",
                value: "lots".into()
            }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sort_toggle_reorders_snapshot() {
        let source = FakeSource::default();
        source.push(0, Ok(page("r", 3, 3)));
        let t = FakeTransport::default();
        let h = start(config(false), &source, &t, Box::new(SurfaceError));
        let s = until(&h, |s| s.rows.len() == 3).await;
        assert_eq!(s.rows[0].key, "r2");

        h.dispatch(Command::Sort(SortKey::ProfitUsd)).await.unwrap();
        let s = h.snapshot();
        assert_eq!(s.sort.key, SortKey::ProfitUsd);
        assert_eq!(s.rows[0].key, "r2");

        h.dispatch(Command::Sort(SortKey::ProfitUsd)).await.unwrap();
        assert_eq!(h.snapshot().rows[0].key, "r0");
    }
}
