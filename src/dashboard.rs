use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::controller::{Command, CommandError, ControllerHandle};
use crate::feed::SortKey;
use crate::filter::FilterForm;
use crate::utils::now_ts;

#[derive(Clone)]
pub struct DashboardState {
    pub settings: Settings,
    pub feed: ControllerHandle,
}

pub async fn serve_dashboard(settings: Settings, feed: ControllerHandle) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.dashboard_host, settings.dashboard_port)
        .parse()
        .with_context(|| format!("dashboard addr {}:{}", settings.dashboard_host, settings.dashboard_port))?;

    let state = DashboardState { settings, feed };
    let app = router(state);

    log::info!("dashboard.start url=http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/feed", get(api_feed))
        .route("/api/health", get(api_health))
        .route("/api/networks", get(api_networks))
        .route("/api/live", post(api_live))
        .route("/api/live/reconnect", post(api_reconnect))
        .route("/api/filter", post(api_filter))
        .route("/api/filter/clear", post(api_filter_clear))
        .route("/api/page", post(api_page))
        .route("/api/page/jump", post(api_page_jump))
        .route("/api/page_size", post(api_page_size))
        .route("/api/sort", post(api_sort))
        .route("/api/refresh", post(api_refresh))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index(State(st): State<DashboardState>) -> impl IntoResponse {
    Html(render_index_html(
        &st.settings.api_base_url,
        &st.settings.live_ws_url,
        st.settings.default_page_size,
    ))
}

async fn api_feed(State(st): State<DashboardState>) -> impl IntoResponse {
    Json(st.feed.snapshot())
}

async fn api_health(State(st): State<DashboardState>) -> impl IntoResponse {
    let snap = st.feed.snapshot();
    Json(serde_json::json!({
        "ts": now_ts(),
        "live": snap.live,
        "loading": snap.loading,
        "error": snap.error,
        "synthetic": snap.synthetic,
        "last_updated": snap.last_updated,
        "rows": snap.rows.len(),
    }))
}

async fn api_networks(State(st): State<DashboardState>) -> impl IntoResponse {
    Json(st.feed.networks().list())
}

#[derive(Deserialize)]
struct LiveReq {
    enabled: bool,
}

async fn api_live(State(st): State<DashboardState>, Json(req): Json<LiveReq>) -> Response {
    run(&st, Command::SetRealtime(req.enabled)).await
}

async fn api_reconnect(State(st): State<DashboardState>) -> Response {
    run(&st, Command::Reconnect).await
}

async fn api_filter(State(st): State<DashboardState>, Json(form): Json<FilterForm>) -> Response {
    run(&st, Command::ApplyFilter(form)).await
}

async fn api_filter_clear(State(st): State<DashboardState>) -> Response {
    run(&st, Command::ClearFilters).await
}

#[derive(Deserialize)]
struct PageReq {
    index: u32,
}

async fn api_page(State(st): State<DashboardState>, Json(req): Json<PageReq>) -> Response {
    run(&st, Command::GoToPage(req.index)).await
}

#[derive(Deserialize)]
struct JumpReq {
    page: String,
}

async fn api_page_jump(State(st): State<DashboardState>, Json(req): Json<JumpReq>) -> Response {
    run(&st, Command::JumpToPage(req.page)).await
}

#[derive(Deserialize)]
struct PageSizeReq {
    size: u32,
}

async fn api_page_size(State(st): State<DashboardState>, Json(req): Json<PageSizeReq>) -> Response {
    run(&st, Command::SetPageSize(req.size)).await
}

#[derive(Deserialize)]
struct SortReq {
    key: SortKey,
}

async fn api_sort(State(st): State<DashboardState>, Json(req): Json<SortReq>) -> Response {
    run(&st, Command::Sort(req.key)).await
}

async fn api_refresh(State(st): State<DashboardState>) -> Response {
    run(&st, Command::Refresh).await
}

async fn run(st: &DashboardState, command: Command) -> Response {
    let res = st.feed.dispatch(command).await;
    let (status, body) = command_reply(&res);
    match status {
        StatusCode::OK => Json(serde_json::json!({ "ok": true, "snapshot": st.feed.snapshot() })).into_response(),
        _ => (status, Json(body)).into_response(),
    }
}

/// Input errors are the operator's to fix (400); a stopped controller is ours (503).
fn command_reply(res: &Result<(), CommandError>) -> (StatusCode, serde_json::Value) {
    match res {
        Ok(()) => (StatusCode::OK, serde_json::json!({ "ok": true })),
        Err(CommandError::Stopped) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "ok": false, "error": "feed_stopped" }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "ok": false, "error": e.to_string() }),
        ),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// The stock choices plus the configured default, ascending.
fn page_size_options(default_size: u32) -> String {
    let mut sizes = vec![10, 20, 50, 100, default_size];
    sizes.sort_unstable();
    sizes.dedup();
    sizes.iter().map(|n| format!("<option>{n}</option>")).collect()
}

fn render_index_html(api_base: &str, ws_url: &str, default_page_size: u32) -> String {
    // Single-file UI, no build step. It polls /api/feed and posts commands.
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>arbscope • Opportunity Tracking</title>
    <style>
      :root {{
        --bg: #0b1220;
        --panel: rgba(255,255,255,0.06);
        --stroke: rgba(255,255,255,0.12);
        --text: rgba(255,255,255,0.92);
        --muted: rgba(255,255,255,0.65);
        --good: #33d17a;
        --bad: #ff4d4d;
        --warn: #ffcc00;
        --brand: #7c5cff;
      }}
      * {{ box-sizing: border-box; }}
      body {{
        margin: 0;
        font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial;
        color: var(--text);
        background: radial-gradient(1200px 900px at 15% 10%, rgba(124,92,255,0.18), transparent 60%), var(--bg);
      }}
      .wrap {{ max-width: 1380px; margin: 0 auto; padding: 22px 18px 42px; }}
      .topbar {{
        display: flex; align-items: center; justify-content: space-between; gap: 12px;
        padding: 14px 16px; border: 1px solid var(--stroke); border-radius: 16px; background: var(--panel);
      }}
      .title {{ font-weight: 800; }}
      .subtitle {{ color: var(--muted); font-size: 12px; margin-top: 2px; }}
      .split {{ display: flex; gap: 10px; flex-wrap: wrap; align-items: center; }}
      .card {{ margin-top: 14px; border: 1px solid var(--stroke); border-radius: 16px; background: var(--panel); padding: 12px 14px; }}
      .dot {{ width: 10px; height: 10px; border-radius: 999px; display: inline-block; background: var(--bad); }}
      .dot.on {{ background: var(--good); }}
      .banner {{
        margin-top: 12px; padding: 10px 12px; border-radius: 14px;
        border: 1px solid rgba(255,255,255,0.14); background: rgba(255,77,77,0.10); display: none;
      }}
      .banner.synthetic {{ background: rgba(255,204,0,0.10); }}
      .btn {{
        cursor: pointer; padding: 7px 10px; border-radius: 10px; border: 1px solid var(--stroke);
        background: rgba(255,255,255,0.05); color: var(--text); font-weight: 700; font-size: 12px;
      }}
      .btn:hover {{ background: rgba(255,255,255,0.08); }}
      input, select {{
        padding: 6px 8px; border-radius: 8px; border: 1px solid var(--stroke);
        background: rgba(255,255,255,0.04); color: var(--text); font-size: 12px; width: 120px;
      }}
      label {{ font-size: 11px; color: var(--muted); display: block; margin-bottom: 3px; }}
      table {{ width: 100%; border-collapse: collapse; }}
      th, td {{ padding: 8px 9px; border-bottom: 1px solid rgba(255,255,255,0.07); font-size: 13px; text-align: left; }}
      th {{ color: var(--muted); font-size: 12px; }}
      th.sortable {{ cursor: pointer; }}
      tr.new {{ background: rgba(51,209,122,0.16); transition: background 0.6s; }}
      .good {{ color: var(--good); }}
      .bad {{ color: var(--bad); }}
      .muted {{ color: var(--muted); }}
      .mono {{ font-family: ui-monospace, SFMono-Regular, Menlo, Consolas, monospace; }}
    </style>
  </head>
  <body>
    <div class="wrap">
      <div class="topbar">
        <div>
          <div class="title">arbscope • Opportunity Tracking</div>
          <div class="subtitle">API <span class="mono">{api_base}</span> • stream <span class="mono">{ws_url}</span></div>
        </div>
        <div class="split">
          <label style="display:flex;gap:6px;align-items:center;margin:0;">
            <input type="checkbox" id="rtToggle" style="width:auto;" /> Real-time
          </label>
          <span><span class="dot" id="liveDot"></span> <span id="liveLabel" class="muted">Disconnected</span></span>
          <button class="btn" id="reconnectBtn" style="display:none;">Reconnect</button>
          <button class="btn" id="refreshBtn">Refresh</button>
          <span class="muted" id="updated">--</span>
        </div>
      </div>

      <div class="banner" id="errBanner"><b id="errKind">Error</b> <span id="errMsg"></span></div>
      <div class="banner" id="inputBanner"></div>

      <div class="card">
        <div class="split">
          <div><label>Network</label><select id="fNetwork"><option value="all">All networks</option></select></div>
          <div><label>Status</label>
            <select id="fStatus">
              <option value="all">All</option>
              <option value="Profitable">Profitable</option>
              <option value="succeeded">Success</option>
              <option value="partially_succeeded">Partial</option>
              <option value="reverted">Reverted</option>
              <option value="error">Error</option>
              <option value="skipped">Skipped</option>
              <option value="none">None</option>
            </select>
          </div>
          <div><label>Profit min</label><input id="fProfitMin" /></div>
          <div><label>Profit max</label><input id="fProfitMax" /></div>
          <div><label>Est. profit min</label><input id="fEstMin" /></div>
          <div><label>Est. profit max</label><input id="fEstMax" /></div>
          <div><label>From (epoch / RFC 3339)</label><input id="fFrom" /></div>
          <div><label>To</label><input id="fTo" /></div>
          <button class="btn" id="applyBtn">Apply</button>
          <button class="btn" id="clearBtn">Clear</button>
        </div>
      </div>

      <div class="card">
        <table>
          <thead>
            <tr>
              <th>Network</th><th>Status</th>
              <th class="sortable" data-key="profit_usd">Profit (USD) <span id="sort_profit_usd"></span></th>
              <th>Gas (USD)</th><th>Est. profit</th><th>Token</th><th>Source tx</th>
              <th class="sortable" data-key="created_at">Created <span id="sort_created_at"></span></th>
            </tr>
          </thead>
          <tbody id="rows"></tbody>
        </table>
        <div class="split" style="margin-top:10px;justify-content:space-between;">
          <div class="split">
            <button class="btn" id="prevBtn">Prev</button>
            <span id="pageInfo" class="muted">--</span>
            <button class="btn" id="nextBtn">Next</button>
            <input id="jumpInput" placeholder="page" style="width:70px;" />
            <button class="btn" id="jumpBtn">Go</button>
          </div>
          <div class="split">
            <label style="margin:0;">Rows per page</label>
            <select id="pageSize" style="width:80px;">
              {page_options}
            </select>
          </div>
        </div>
      </div>
    </div>

    <script>
      let formDirty = false;
      let lastSnap = null;

      function escapeHtml(s) {{
        return String(s ?? "").replace(/[&<>"']/g, c => ({{"&":"&amp;","<":"&lt;",">":"&gt;","\"":"&quot;","'":"&#39;"}})[c]);
      }}
      function usd(v) {{
        if (v === null || v === undefined) return '<span class="muted">--</span>';
        const cls = v > 0 ? "good" : (v < 0 ? "bad" : "");
        return `<span class="${{cls}}">${{Number(v).toFixed(2)}}</span>`;
      }}
      function short(s) {{
        if (!s) return '<span class="muted">--</span>';
        return `<span class="mono">${{escapeHtml(s.slice(0, 10))}}…</span>`;
      }}
      async function post(path, body) {{
        const r = await fetch(path, {{
          method: "POST",
          headers: {{ "content-type": "application/json" }},
          body: JSON.stringify(body ?? {{}}),
        }});
        const j = await r.json().catch(() => ({{}}));
        const ib = document.getElementById("inputBanner");
        if (!r.ok) {{
          ib.textContent = j.error || `HTTP ${{r.status}}`;
          ib.style.display = "block";
        }} else {{
          ib.style.display = "none";
          if (j.snapshot) render(j.snapshot);
        }}
        return r.ok;
      }}

      function readForm() {{
        return {{
          network: document.getElementById("fNetwork").value,
          status: document.getElementById("fStatus").value,
          profit_min: document.getElementById("fProfitMin").value,
          profit_max: document.getElementById("fProfitMax").value,
          estimate_profit_min: document.getElementById("fEstMin").value,
          estimate_profit_max: document.getElementById("fEstMax").value,
          timestamp_from: document.getElementById("fFrom").value,
          timestamp_to: document.getElementById("fTo").value,
        }};
      }}

      function writeForm(f) {{
        if (formDirty) return;
        document.getElementById("fNetwork").value = f.network || "all";
        document.getElementById("fStatus").value = f.status || "all";
        document.getElementById("fProfitMin").value = f.profit_min;
        document.getElementById("fProfitMax").value = f.profit_max;
        document.getElementById("fEstMin").value = f.estimate_profit_min;
        document.getElementById("fEstMax").value = f.estimate_profit_max;
        document.getElementById("fFrom").value = f.timestamp_from;
        document.getElementById("fTo").value = f.timestamp_to;
      }}

      function render(s) {{
        lastSnap = s;
        const live = s.live;
        document.getElementById("rtToggle").checked = live.enabled;
        document.getElementById("liveDot").className = live.connected ? "dot on" : "dot";
        document.getElementById("liveLabel").textContent = !live.enabled ? (live.state === "closing" ? "Closing…" : "Real-time off") : (live.connected ? "Live" : (live.state === "connecting" ? "Connecting…" : "Disconnected"));
        document.getElementById("reconnectBtn").style.display = live.enabled && !live.connected ? "" : "none";

        const eb = document.getElementById("errBanner");
        if (s.error) {{
          eb.style.display = "block";
          eb.className = s.synthetic ? "banner synthetic" : "banner";
          document.getElementById("errKind").textContent = s.synthetic ? "Sample data" : "Error";
          document.getElementById("errMsg").textContent = s.error.message;
        }} else {{
          eb.style.display = "none";
        }}

        document.getElementById("updated").textContent = s.loading ? "Loading…" : (s.last_updated ? "Updated " + new Date(s.last_updated * 1000).toLocaleTimeString() : "--");
        writeForm(s.filter);

        for (const k of ["profit_usd", "created_at"]) {{
          document.getElementById("sort_" + k).textContent = s.sort.key === k ? (s.sort.dir === "desc" ? "▼" : "▲") : "";
        }}

        document.getElementById("rows").innerHTML = s.rows.map(r => `
          <tr class="${{r._new ? "new" : ""}}">
            <td>${{escapeHtml(r.network_name)}}</td>
            <td>${{escapeHtml(r.status_name)}}</td>
            <td>${{usd(r.profit_usd)}}</td>
            <td>${{usd(r.gas_usd)}}</td>
            <td>${{usd(r.estimate_profit_usd)}}</td>
            <td>${{escapeHtml(r.profit_token_symbol || "")}}</td>
            <td>${{short(r.source_tx)}}</td>
            <td class="muted">${{escapeHtml(r.created_at)}}</td>
          </tr>`).join("") || '<tr><td colspan="8" class="muted">No opportunities</td></tr>';

        const p = s.pagination;
        document.getElementById("pageInfo").textContent = `Page ${{s.page}} / ${{s.total_pages}}` + (p ? ` • ${{p.total}} total` : "");
        const sizeSel = document.getElementById("pageSize");
        if (![...sizeSel.options].some(o => o.value === String(s.page_size))) {{
          sizeSel.add(new Option(String(s.page_size)));
        }}
        sizeSel.value = String(s.page_size);
      }}

      async function loadNetworks() {{
        const r = await fetch("/api/networks", {{ cache: "no-store" }});
        if (!r.ok) return;
        const nets = await r.json();
        const sel = document.getElementById("fNetwork");
        for (const n of nets) {{
          const o = document.createElement("option");
          o.value = String(n.chain_id);
          o.textContent = n.name;
          sel.appendChild(o);
        }}
      }}

      async function poll() {{
        try {{
          const r = await fetch("/api/feed", {{ cache: "no-store" }});
          if (r.ok) render(await r.json());
        }} catch (e) {{
          document.getElementById("liveLabel").textContent = "dashboard offline";
        }}
      }}

      for (const id of ["fNetwork","fStatus","fProfitMin","fProfitMax","fEstMin","fEstMax","fFrom","fTo"]) {{
        document.getElementById(id).addEventListener("input", () => {{ formDirty = true; }});
      }}
      document.getElementById("applyBtn").onclick = async () => {{ if (await post("/api/filter", readForm())) formDirty = false; }};
      document.getElementById("clearBtn").onclick = async () => {{ formDirty = false; await post("/api/filter/clear"); }};
      document.getElementById("rtToggle").onchange = e => post("/api/live", {{ enabled: e.target.checked }});
      document.getElementById("reconnectBtn").onclick = () => post("/api/live/reconnect");
      document.getElementById("refreshBtn").onclick = () => post("/api/refresh");
      document.getElementById("prevBtn").onclick = () => lastSnap && post("/api/page", {{ index: Math.max(0, lastSnap.page_index - 1) }});
      document.getElementById("nextBtn").onclick = () => lastSnap && post("/api/page", {{ index: lastSnap.page_index + 1 }});
      document.getElementById("jumpBtn").onclick = () => post("/api/page/jump", {{ page: document.getElementById("jumpInput").value }});
      document.getElementById("pageSize").onchange = e => post("/api/page_size", {{ size: Number(e.target.value) }});
      for (const th of document.querySelectorAll("th.sortable")) {{
        th.onclick = () => post("/api/sort", {{ key: th.dataset.key }});
      }}

      loadNetworks();
      poll();
      setInterval(poll, 1000);
    </script>
  </body>
</html>
"#,
        api_base = escape_html(api_base),
        ws_url = escape_html(ws_url),
        page_options = page_size_options(default_page_size),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterError;
    use crate::pagination::PageJumpError;

    #[test]
    fn test_command_reply_status() {
        assert_eq!(command_reply(&Ok(())).0, StatusCode::OK);
        assert_eq!(command_reply(&Err(CommandError::Stopped)).0, StatusCode::SERVICE_UNAVAILABLE);
        let (code, body) = command_reply(&Err(CommandError::PageJump(PageJumpError::NotANumber("x".into()))));
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        let (code, _) = command_reply(&Err(FilterError::BadPageSize(0).into()));
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_index_mentions_endpoints() {
        let html = render_index_html("http://api.local/v1", "ws://api.local/v1/ws/opportunities", 20);
        assert!(html.contains("http://api.local/v1"));
        assert!(html.contains("/api/live/reconnect"));
        assert!(html.contains("tr.new"));
    }

    #[test]
    fn test_index_escapes_urls() {
        let html = render_index_html("http://api.local/v1?a=1&b=<x>", "ws://api.local/\"ws\"", 20);
        assert!(html.contains("http://api.local/v1?a=1&amp;b=&lt;x&gt;"));
        assert!(html.contains("ws://api.local/&quot;ws&quot;"));
        assert!(!html.contains("<x>"));
    }

    #[test]
    fn test_page_size_options_include_default() {
        assert_eq!(
            page_size_options(25),
            "<option>10</option><option>20</option><option>25</option><option>50</option><option>100</option>"
        );
        assert_eq!(page_size_options(20).matches("<option>").count(), 4);
        let html = render_index_html("http://api.local/v1", "ws://api.local/ws", 25);
        assert!(html.contains("<option>25</option>"));
    }
}
