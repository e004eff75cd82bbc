use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use clap::{CommandFactory, Parser};
use log::{error, info, warn};
use movie_admin::modules::navigation::RecordingNavigator;
use movie_admin::modules::types::UnknownField;
use movie_admin::modules::serialize::{
    HttpCoordinator, build_coordinator, load_config, resolve_credential,
};
use movie_admin::{Candidate, CoordinatorError, RecordField, Session};
use serde::Deserialize;
use simplelog::*;
use std::env;
use std::error::Error;
use std::fs::{self, OpenOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
struct AppState {
    coordinator: Arc<HttpCoordinator<Arc<RecordingNavigator>>>,
    log_path: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "movie_admin_app",
    version,
    about = "movie-admin companion UI",
    long_about = None
)]
struct Cli {
    #[arg(short = 'l', long = "log-file", required = true)]
    log_file: String,

    #[arg(short = 'c', long = "config", default_value = "./movie-admin.toml")]
    config: String,

    /// Catalog token, overrides MOVIE_ADMIN_TOKEN and the config file
    #[arg(short = 't', long = "token")]
    token: Option<String>,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
}

#[derive(Deserialize)]
struct FieldUpdate {
    value: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    if std::env::args_os().len() == 1 {
        let mut cmd = Cli::command();
        cmd.print_long_help()?;
        println!();
        return Ok(());
    }

    let cli = Cli::parse();
    WriteLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new().set_time_format_rfc3339().build(),
        OpenOptions::new().create(true).append(true).open(&cli.log_file)?,
    )?;

    let config = load_config(&cli.config)?;
    let credential = resolve_credential(&config, cli.token);
    if !credential.is_present() {
        warn!("No catalog token configured, catalog requests will be anonymous");
    }
    let navigator = Arc::new(RecordingNavigator::default());
    let state = AppState {
        coordinator: Arc::new(build_coordinator(&config, credential, navigator)?),
        log_path: PathBuf::from(cli.log_file),
    };

    let app = router(state);

    let port = env::var("MOVIE_ADMIN_PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(7879);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("movie-admin app listening on http://{addr}");
    println!("movie-admin app running on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/session", get(get_session))
        .route("/api/search", post(search))
        .route("/api/select", post(select))
        .route("/api/record/:field", put(update_field))
        .route("/api/submit", post(submit))
        .route("/api/log", get(get_log))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn get_session(State(state): State<AppState>) -> Json<Session> {
    Json(state.coordinator.snapshot())
}

async fn search(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<Session>, ApiError> {
    state.coordinator.search(&payload.query).await?;
    Ok(Json(state.coordinator.snapshot()))
}

async fn select(
    State(state): State<AppState>,
    Json(candidate): Json<Candidate>,
) -> Result<Json<Session>, ApiError> {
    let session = state.coordinator.open(&candidate).await?;
    Ok(Json(session))
}

async fn update_field(
    State(state): State<AppState>,
    Path(field): Path<String>,
    Json(payload): Json<FieldUpdate>,
) -> Result<Json<Session>, ApiError> {
    let field: RecordField = field
        .parse()
        .map_err(|err: UnknownField| ApiError::bad_request(err.to_string()))?;
    if !field.is_download_link() {
        return Err(ApiError::bad_request(format!("{field} is not editable")));
    }
    state.coordinator.edit_field(field, payload.value)?;
    if state.coordinator.needs_reconcile() {
        state.coordinator.reconcile().await?;
    }
    Ok(Json(state.coordinator.snapshot()))
}

async fn submit(State(state): State<AppState>) -> Result<Json<Session>, ApiError> {
    // Retry a catalog check that failed or was superseded.
    if state.coordinator.needs_reconcile() {
        state.coordinator.reconcile().await?;
    }
    state.coordinator.submit().await?;
    Ok(Json(state.coordinator.snapshot()))
}

async fn get_log(State(state): State<AppState>) -> Result<String, ApiError> {
    let text = match fs::read_to_string(&state.log_path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(ApiError::internal(err.to_string())),
    };
    Ok(limit_tail(&text, 20000))
}

fn limit_tail(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let mut start = text.len() - max_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[derive(Debug)]
struct ApiError {
    code: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST,
            message,
        }
    }

    fn internal(message: String) -> Self {
        Self {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let code = match &err {
            CoordinatorError::Provider(_) | CoordinatorError::Catalog(_) => StatusCode::BAD_GATEWAY,
            CoordinatorError::Cancelled(_)
            | CoordinatorError::RecordLocked(_)
            | CoordinatorError::Unreconciled(_)
            | CoordinatorError::Busy(_)
            | CoordinatorError::AlreadySubmitted => StatusCode::CONFLICT,
            CoordinatorError::NoRecord | CoordinatorError::NoMatch(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Ambiguous(_) | CoordinatorError::PickOutOfRange { .. } => {
                StatusCode::BAD_REQUEST
            }
        };
        if code == StatusCode::BAD_GATEWAY {
            error!("Request failed: {err}");
        }
        Self {
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.code, self.message).into_response()
    }
}

const INDEX_HTML: &str = r##"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Add Movie</title>
  <style>
    :root {
      --bg: #0f172a;
      --card: #0f1c33;
      --accent: #f59e0b;
      --text: #e2e8f0;
      --muted: #94a3b8;
      --border: rgba(148, 163, 184, 0.2);
      --danger: #ef4444;
    }

    * {
      box-sizing: border-box;
    }

    body {
      margin: 0;
      font-family: "Trebuchet MS", "Verdana", "Geneva", sans-serif;
      color: var(--text);
      background: radial-gradient(circle at top, #1e293b, #0b1020 55%, #090c18);
      min-height: 100vh;
    }

    .shell {
      padding: 24px 16px 32px;
      max-width: 1100px;
      margin: 0 auto;
    }

    .form-group {
      display: flex;
      flex-direction: column;
      gap: 6px;
      margin-bottom: 12px;
    }

    input {
      background: var(--bg);
      color: var(--text);
      border: 1px solid var(--border);
      border-radius: 10px;
      padding: 10px 12px;
    }

    ul.results {
      list-style: none;
      padding: 0;
      margin: 0 0 16px;
      border: 1px solid var(--border);
      border-radius: 12px;
    }

    ul.results button {
      display: flex;
      gap: 12px;
      width: 100%;
      background: transparent;
      color: var(--text);
      border: 0;
      padding: 8px 12px;
      text-align: left;
      cursor: pointer;
    }

    ul.results img {
      width: 40px;
    }

    .body {
      display: grid;
      grid-template-columns: 260px 1fr;
      gap: 24px;
      background: var(--card);
      border: 1px solid var(--border);
      border-radius: 18px;
      padding: 20px;
    }

    .body img {
      width: 100%;
      border-radius: 12px;
    }

    .meta span {
      display: block;
      margin-bottom: 4px;
    }

    .btn {
      background: var(--accent);
      color: #1f2937;
      border: 0;
      border-radius: 999px;
      padding: 10px 18px;
      cursor: pointer;
    }

    .btn:disabled {
      background: var(--muted);
      cursor: not-allowed;
    }

    .status {
      color: var(--muted);
      font-size: 13px;
      margin-bottom: 12px;
    }

    .status.error {
      color: var(--danger);
    }
  </style>
</head>
<body>
  <div class="shell">
    <h1>Add Movie</h1>
    <div class="form-group">
      <label for="search">Search movies</label>
      <input id="search" type="text" placeholder="Title or imdbID" />
    </div>
    <div class="status" id="status"></div>
    <ul class="results" id="results"></ul>
    <div id="details"></div>
  </div>

  <script>
    const searchInput = document.getElementById("search");
    const statusLine = document.getElementById("status");
    const results = document.getElementById("results");
    const details = document.getElementById("details");
    const metaFields = ["Country", "Awards", "imdbID", "Type", "BoxOffice", "Year", "Rated",
      "Released", "Runtime", "Director", "Writer", "Actors", "Plot"];
    const linkFields = [
      ["LowUrl", "420p URL"],
      ["HdUrl", "HD URL"],
      ["FullHdUrl", "Full HD URL"],
      ["QhdUrl", "QHD URL"]
    ];
    let session = null;
    let searchTimer = null;

    function escapeHtml(value) {
      const text = String(value ?? "");
      return text
        .replace(/&/g, "&amp;")
        .replace(/</g, "&lt;")
        .replace(/>/g, "&gt;")
        .replace(/\"/g, "&quot;")
        .replace(/'/g, "&#39;");
    }

    async function api(path, method = "GET", payload = undefined) {
      const res = await fetch(path, {
        method,
        headers: { "Content-Type": "application/json" },
        body: payload === undefined ? undefined : JSON.stringify(payload)
      });
      if (!res.ok) {
        throw new Error(await res.text());
      }
      return res.json();
    }

    function showStatus(message, isError = false) {
      statusLine.textContent = message;
      statusLine.classList.toggle("error", isError);
    }

    function describeStatus() {
      const failed = Object.entries(session.status)
        .filter(([, status]) => status.state === "failed")
        .map(([stage, status]) => `${stage} failed: ${status.message}`);
      if (failed.length) {
        showStatus(failed.join("; "), true);
      } else {
        showStatus(session.phase.replace(/_/g, " "));
      }
    }

    function renderResults() {
      if (!session.query) {
        results.innerHTML = "";
        return;
      }
      if (session.not_found) {
        results.innerHTML = "<li>Movie not found</li>";
        return;
      }
      results.innerHTML = session.candidates.map((movie, i) => `
        <li><button data-index="${i}">
          <img src="${escapeHtml(movie.Poster)}" alt="movie" />
          <div><strong>${escapeHtml(movie.Title)}</strong> <span>${escapeHtml(movie.Year)}</span></div>
        </button></li>`).join("");
    }

    function renderDetails() {
      const record = session.record;
      if (!record) {
        details.innerHTML = "";
        return;
      }
      const meta = metaFields
        .map(name => `<span><b>${name}:</b> ${escapeHtml(record[name])}</span>`)
        .join("");
      const links = linkFields.map(([name, label]) => `
        <div class="form-group">
          <label>${label}</label>
          <input data-field="${name}" value="${escapeHtml(record[name] || "")}"
                 placeholder="https://example.com/download/" />
        </div>`).join("");
      const button = session.exists
        ? `<button class="btn" disabled>The movie is existing</button>`
        : `<button class="btn" id="publish" ${session.phase === "reconciling" ? "disabled" : ""}>Publish</button>`;
      details.innerHTML = `
        <div class="body">
          <div><img src="${escapeHtml(record.Poster)}" alt="Poster" /></div>
          <div>
            <h4>${escapeHtml(record.Title)}</h4>
            <p>${escapeHtml(record.Genre)} &middot; ${escapeHtml(record.Language)}</p>
            <div class="meta">${meta}</div>
            <h3>Download Links</h3>
            ${links}
            ${button}
          </div>
        </div>`;
    }

    function render(next) {
      session = next;
      renderResults();
      renderDetails();
      describeStatus();
      if (session.navigated_to) {
        showStatus(`Published. Continue at ${session.navigated_to}`);
      }
    }

    async function run(action) {
      try {
        render(await action());
      } catch (err) {
        showStatus(err.message || "Request failed.", true);
        render(await api("/api/session"));
        showStatus(err.message || "Request failed.", true);
      }
    }

    searchInput.addEventListener("input", () => {
      clearTimeout(searchTimer);
      const query = searchInput.value;
      searchTimer = setTimeout(() => run(() => api("/api/search", "POST", { query })), 250);
    });

    results.addEventListener("click", event => {
      const button = event.target.closest("button[data-index]");
      if (!button) return;
      const candidate = session.candidates[Number.parseInt(button.dataset.index, 10)];
      searchInput.value = "";
      run(() => api("/api/select", "POST", candidate));
    });

    details.addEventListener("change", event => {
      const field = event.target.dataset.field;
      if (!field) return;
      run(() => api(`/api/record/${field}`, "PUT", { value: event.target.value }));
    });

    details.addEventListener("click", event => {
      if (event.target.id !== "publish") return;
      run(() => api("/api/submit", "POST"));
    });

    run(() => api("/api/session"));
  </script>
</body>
</html>"##;
