use crate::api::{parse_method, ApiClient, ApiError, CredentialStore};
use crate::cache::{QueryClient, QueryKey};
use crate::commands::{self, Action};
use crate::config::Config;
use crate::portal::types::{AdminStats, BookingFilter, ComplianceOverview, LabImport};
use crate::portal::{keys, PortalClient};
use crate::query::{Query, QueryState};
use crate::session::SessionStore;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Main application state
pub struct App {
  /// Portal client; its query cache lives as long as the app
  portal: PortalClient,

  /// Where the bearer token is kept between runs
  session: SessionStore,

  /// Whether to quit the shell
  should_quit: bool,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    Self::with_session(config, SessionStore::open()?)
  }

  /// Build the app, restoring the bearer token from `session`.
  pub fn with_session(config: Config, session: SessionStore) -> Result<Self> {
    // Environment token wins over a saved session
    let credentials = CredentialStore::new();
    if let Some(token) = Config::get_env_token() {
      credentials.set(token);
    } else if let Some(saved) = session.load()? {
      debug!(saved_at = %saved.saved_at, "restored session");
      credentials.set(saved.token);
    }

    let api = ApiClient::new(&config.api, credentials)?;
    let queries = QueryClient::new(api, config.queries.defaults());

    Ok(Self::with_portal(PortalClient::new(queries), session))
  }

  pub fn with_portal(portal: PortalClient, session: SessionStore) -> Self {
    Self {
      portal,
      session,
      should_quit: false,
    }
  }

  /// Run one action, or the interactive shell.
  pub async fn run(&mut self, action: Action) -> Result<()> {
    match action {
      Action::Shell => self.run_shell().await,
      action => self.execute(action, &mut std::io::stdout()).await,
    }
  }

  /// Read commands from stdin until `quit` or end of input.
  ///
  /// All commands share one query cache, so repeated reads are served from
  /// memory until a write or `invalidate` drops them.
  pub async fn run_shell(&mut self) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    while !self.should_quit {
      write!(stdout, "carepulse> ")?;
      stdout.flush()?;

      let Some(line) = lines.next_line().await? else {
        break;
      };
      if line.trim().is_empty() {
        continue;
      }

      let action = match commands::parse_shell_line(&line) {
        Ok(action) => action,
        Err(e) => {
          writeln!(stdout, "{}", e.trim_end())?;
          continue;
        }
      };

      if let Err(e) = self.execute(action, &mut stdout).await {
        writeln!(stdout, "Error: {}", e)?;
      }
    }

    Ok(())
  }

  /// Execute one action, writing its output to `out`.
  ///
  /// A 401 on anything but `login` means the stored token was rejected; the
  /// token and the saved session are dropped so later runs stop sending it.
  pub async fn execute<W: Write>(&mut self, action: Action, out: &mut W) -> Result<()> {
    let signing_in = matches!(action, Action::Login { .. });
    let Err(e) = self.dispatch(action, out).await else {
      return Ok(());
    };

    if !signing_in && is_unauthorized(&e) && self.expire_session()? {
      return Err(e.wrap_err("Session expired; run `login` again"));
    }
    Err(e)
  }

  /// Forget a rejected token. Returns false when no token was set.
  fn expire_session(&mut self) -> Result<bool> {
    if !self.portal.credentials().is_set() {
      return Ok(false);
    }
    warn!("server rejected the stored token; clearing session");
    self.portal.credentials().clear();
    self.portal.queries().clear();
    self.session.clear()?;
    Ok(true)
  }

  async fn dispatch<W: Write>(&mut self, action: Action, out: &mut W) -> Result<()> {
    match action {
      Action::Login { email, password } => {
        let password = match password {
          Some(p) => p,
          None => std::env::var("CAREPULSE_PASSWORD").map_err(|_| {
            eyre!("No password given. Pass --password or set CAREPULSE_PASSWORD.")
          })?,
        };
        let user = self.portal.login(&email, &password).await?;
        if let Some(token) = self.portal.credentials().get() {
          self.session.save(&token)?;
        }
        writeln!(out, "Logged in as {}", user.display_name())?;
      }
      Action::Logout => {
        let result = self.portal.logout().await;
        self.session.clear()?;
        result?;
        writeln!(out, "Logged out")?;
      }
      Action::Whoami => match self.portal.current_user().await? {
        Some(user) => writeln!(out, "{} <{}> ({:?})", user.display_name(), user.email, user.role)?,
        None => {
          if self.expire_session()? {
            writeln!(out, "Session expired")?;
          }
          writeln!(out, "Not logged in")?
        }
      },
      Action::Stats => print_json(out, &self.portal.admin_stats().await?)?,
      Action::Dashboard => self.dashboard(out).await?,
      Action::Bookings { status, page } => {
        let filter = BookingFilter { status, page };
        print_json(out, &self.portal.bookings(&filter).await?)?
      }
      Action::SetStatus { id, status } => {
        print_json(out, &self.portal.update_booking_status(id, status).await?)?
      }
      Action::Trends { from, to } => {
        if to < from {
          return Err(eyre!("--to ({}) is before --from ({})", to, from));
        }
        print_json(out, &self.portal.page_view_trends(from, to).await?)?
      }
      Action::Crm => print_json(out, &self.portal.crm_history().await?)?,
      Action::Sync => print_json(out, &self.portal.crm_sync().await?)?,
      Action::Audit { page } => print_json(out, &self.portal.audit_logs(page).await?)?,
      Action::Gdpr => print_json(out, &self.portal.gdpr_requests().await?)?,
      Action::GdprRequest { kind } => {
        print_json(out, &self.portal.create_gdpr_request(kind).await?)?
      }
      Action::Labs => print_json(out, &self.portal.lab_imports().await?)?,
      Action::Review {
        id,
        decision,
        notes,
      } => {
        let import = self
          .portal
          .review_lab_import(id, decision, notes.as_deref())
          .await?;
        print_json(out, &import)?
      }
      Action::Biomarkers { patient_id } => {
        print_json(out, &self.portal.biomarkers(patient_id).await?)?
      }
      Action::Compliance => print_json(out, &self.portal.compliance_overview().await?)?,
      Action::Get { endpoint, parts } => {
        let key = build_key(endpoint, parts);
        print_json(out, &self.portal.raw(&key).await?)?
      }
      Action::Send {
        method,
        endpoint,
        json,
        invalidates,
      } => {
        let method = parse_method(&method)?;
        let payload = json
          .map(|j| serde_json::from_str(&j))
          .transpose()
          .map_err(|e| eyre!("Invalid --json body: {}", e))?;
        let invalidates = invalidates.into_iter().map(QueryKey::from).collect();
        let body = self
          .portal
          .raw_mutation(method, &endpoint, payload, invalidates)
          .await?;
        print_json(out, &body)?
      }
      Action::Invalidate { endpoint, parts } => {
        let key = build_key(endpoint, parts);
        let removed = self.portal.queries().invalidate_queries(&key);
        let noun = if removed == 1 { "query" } else { "queries" };
        writeln!(out, "Invalidated {} cached {}", removed, noun)?;
      }
      Action::Cache => {
        for key in self.portal.queries().cached_keys() {
          writeln!(out, "{}", key)?;
        }
      }
      Action::Shell => writeln!(out, "Already in the shell")?,
      Action::Quit => {
        info!("leaving shell");
        self.should_quit = true;
      }
    }
    Ok(())
  }

  /// Load the dashboard panels concurrently and print one line per panel.
  ///
  /// A failing panel is reported in place; the others still render.
  async fn dashboard<W: Write>(&self, out: &mut W) -> Result<()> {
    let queries = self.portal.queries();
    let mut stats: Query<AdminStats> = Query::new(queries.clone(), keys::admin_stats());
    let mut labs: Query<Vec<LabImport>> = Query::new(queries.clone(), keys::lab_imports());
    let mut compliance: Query<ComplianceOverview> =
      Query::new(queries.clone(), keys::compliance_overview());

    stats.fetch();
    labs.fetch();
    compliance.fetch();
    stats.settle().await;
    labs.settle().await;
    compliance.settle().await;

    match stats.state() {
      QueryState::Success(s) => writeln!(
        out,
        "Bookings: {} total, {} pending | Patients: {} | Clinicians: {}",
        s.total_bookings, s.pending_bookings, s.total_patients, s.active_clinicians
      )?,
      other => writeln!(out, "Bookings: {}", unavailable(other))?,
    }
    match labs.state() {
      QueryState::Success(imports) => {
        let pending = imports.iter().filter(|i| i.status == "pending").count();
        writeln!(out, "Lab imports: {} ({} awaiting review)", imports.len(), pending)?
      }
      other => writeln!(out, "Lab imports: {}", unavailable(other))?,
    }
    match compliance.state() {
      QueryState::Success(c) => writeln!(
        out,
        "Compliance: {:.0}% ({} open findings)",
        c.score * 100.0,
        c.open_findings
      )?,
      other => writeln!(out, "Compliance: {}", unavailable(other))?,
    }
    Ok(())
  }

  pub fn should_quit(&self) -> bool {
    self.should_quit
  }

  pub fn queries(&self) -> &QueryClient {
    self.portal.queries()
  }
}

fn is_unauthorized(report: &color_eyre::Report) -> bool {
  report
    .downcast_ref::<ApiError>()
    .is_some_and(ApiError::is_unauthorized)
}

fn unavailable<T>(state: &QueryState<T>) -> String {
  match state.error() {
    Some(e) => format!("unavailable ({})", e),
    None => "unavailable".to_string(),
  }
}

fn build_key(endpoint: String, parts: Vec<String>) -> QueryKey {
  parts
    .into_iter()
    .fold(QueryKey::from(endpoint), |key, part| key.with(part))
}

fn print_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  writeln!(out, "{}", json)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{HttpResponse, MockTransport};
  use crate::cache::QueryDefaults;
  use reqwest::Method;
  use std::sync::Arc;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn setup(name: &str) -> (App, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let api = ApiClient::with_transport(transport.clone(), "", CredentialStore::new());
    let portal = PortalClient::new(QueryClient::new(api, QueryDefaults::default()));
    let dir = std::env::temp_dir().join(format!("carepulse-app-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_dir_all(&dir);
    (App::with_portal(portal, SessionStore::at(dir.join("session.json"))), transport)
  }

  async fn run(app: &mut App, line: &str) -> Result<String> {
    let action = commands::parse_shell_line(line).map_err(|e| eyre!(e))?;
    let mut out = Vec::new();
    app.execute(action, &mut out).await?;
    Ok(String::from_utf8(out)?)
  }

  #[tokio::test]
  async fn test_login_persists_and_logout_clears_session() {
    let (mut app, transport) = setup("session");
    transport.respond(
      Method::POST,
      "/api/auth/login",
      HttpResponse::new(
        200,
        r#"{"token":"abc123","user":{"id":1,"email":"a@b.c","role":"admin","firstName":"Ada"}}"#,
      ),
    );
    transport.respond(Method::POST, "/api/auth/logout", HttpResponse::new(204, ""));

    let output = run(&mut app, "login a@b.c --password pw").await.unwrap();
    assert_eq!(output, "Logged in as Ada\n");
    assert_eq!(app.session.load().unwrap().unwrap().token, "abc123");

    let output = run(&mut app, "logout").await.unwrap();
    assert_eq!(output, "Logged out\n");
    assert!(app.session.load().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_shell_reads_share_cache_until_invalidated() {
    let (mut app, transport) = setup("cache");
    transport.respond(
      Method::GET,
      "/api/admin/stats",
      HttpResponse::new(200, r#"{"totalBookings":4}"#),
    );

    let first = run(&mut app, "stats").await.unwrap();
    assert!(first.contains("\"totalBookings\": 4"));
    run(&mut app, "s").await.unwrap();
    assert_eq!(transport.calls(Method::GET, "/api/admin/stats"), 1);

    assert_eq!(run(&mut app, "cache").await.unwrap(), "[\"/api/admin/stats\"]\n");
    assert_eq!(
      run(&mut app, "invalidate /api/admin/stats").await.unwrap(),
      "Invalidated 1 cached query\n"
    );
    run(&mut app, "stats").await.unwrap();
    assert_eq!(transport.calls(Method::GET, "/api/admin/stats"), 2);
  }

  #[tokio::test]
  async fn test_get_appends_key_parts() {
    let (mut app, transport) = setup("get");
    transport.respond(
      Method::GET,
      "/api/admin/bookings/pending/2",
      HttpResponse::new(200, "[]"),
    );
    assert_eq!(
      run(&mut app, "get /api/admin/bookings pending 2").await.unwrap(),
      "[]\n"
    );
  }

  #[tokio::test]
  async fn test_api_errors_surface_with_status() {
    let (mut app, transport) = setup("errors");
    transport.respond(Method::GET, "/api/missing", HttpResponse::new(404, "Not Found"));
    let err = run(&mut app, "get /api/missing").await.unwrap_err();
    assert_eq!(err.to_string(), "404: Not Found");
  }

  #[tokio::test]
  async fn test_trends_rejects_reversed_range() {
    let (mut app, transport) = setup("trends");
    let err = run(&mut app, "trends --from 2024-02-01 --to 2024-01-01")
      .await
      .unwrap_err();
    assert!(err.to_string().contains("before"));
    assert!(transport.requests().is_empty());
  }

  #[tokio::test]
  async fn test_dashboard_renders_failed_panels_in_place() {
    let (mut app, transport) = setup("dashboard");
    transport.respond(
      Method::GET,
      "/api/admin/stats",
      HttpResponse::new(
        200,
        r#"{"totalBookings":10,"pendingBookings":2,"totalPatients":7,"activeClinicians":3}"#,
      ),
    );
    transport.respond(
      Method::GET,
      "/api/admin/lab-imports",
      HttpResponse::new(
        200,
        r#"[{"id":1,"fileName":"a.csv","status":"pending","uploadedAt":"2024-05-01T10:00:00Z"}]"#,
      ),
    );
    transport.respond(Method::GET, "/api/compliance/overview", HttpResponse::new(403, "Forbidden"));

    let output = run(&mut app, "dashboard").await.unwrap();
    assert_eq!(
      output,
      "Bookings: 10 total, 2 pending | Patients: 7 | Clinicians: 3\n\
       Lab imports: 1 (1 awaiting review)\n\
       Compliance: unavailable (403: Forbidden)\n"
    );
  }

  #[tokio::test]
  async fn test_send_invalidates_requested_prefixes() {
    let (mut app, transport) = setup("send");
    transport.respond(Method::GET, "/api/x", HttpResponse::new(200, "1"));
    transport.respond(Method::PATCH, "/api/x/1", HttpResponse::new(200, r#"{"ok":true}"#));
    run(&mut app, "get /api/x").await.unwrap();

    let output = run(&mut app, "send PATCH /api/x/1 --json {\"a\":1} --invalidates /api/x")
      .await
      .unwrap();
    assert!(output.contains("\"ok\": true"));
    assert_eq!(transport.last_request().body.as_deref(), Some(r#"{"a":1}"#));
    assert!(app.queries().cached_keys().is_empty());
  }

  #[tokio::test]
  async fn test_restored_session_authenticates_whoami() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/users/me"))
      .and(header("authorization", "Bearer abc123"))
      .respond_with(ResponseTemplate::new(200).set_body_string(
        r#"{"id":1,"email":"a@b.c","role":"admin","firstName":"Ada"}"#,
      ))
      .with_priority(1)
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/users/me"))
      .respond_with(ResponseTemplate::new(401))
      .mount(&server)
      .await;

    let dir = std::env::temp_dir().join(format!("carepulse-app-{}-restore", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let session = SessionStore::at(dir.join("session.json"));
    session.save("abc123").unwrap();

    let mut config = Config::default();
    config.api.origin = server.uri();
    let mut app = App::with_session(config, session).unwrap();

    assert_eq!(run(&mut app, "whoami").await.unwrap(), "Ada <a@b.c> (Admin)\n");
    assert!(app.session.load().unwrap().is_some());
  }

  #[tokio::test]
  async fn test_rejected_token_clears_session() {
    let (mut app, transport) = setup("expired");
    app.portal.credentials().set("stale");
    app.session.save("stale").unwrap();
    transport.respond(Method::GET, "/api/admin/stats", HttpResponse::new(401, "jwt expired"));

    let err = run(&mut app, "stats").await.unwrap_err();
    assert!(err.to_string().contains("Session expired"));
    assert!(!app.portal.credentials().is_set());
    assert!(app.session.load().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_whoami_with_rejected_token_clears_session() {
    let (mut app, transport) = setup("whoami-expired");
    app.portal.credentials().set("stale");
    app.session.save("stale").unwrap();
    transport.respond(Method::GET, "/api/users/me", HttpResponse::new(401, ""));

    assert_eq!(
      run(&mut app, "whoami").await.unwrap(),
      "Session expired\nNot logged in\n"
    );
    assert!(app.session.load().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_failed_login_keeps_existing_session() {
    let (mut app, transport) = setup("bad-login");
    app.portal.credentials().set("abc123");
    app.session.save("abc123").unwrap();
    transport.respond(Method::POST, "/api/auth/login", HttpResponse::new(401, "Invalid credentials"));

    let err = run(&mut app, "login a@b.c --password wrong").await.unwrap_err();
    assert_eq!(err.to_string(), "401: Invalid credentials");
    assert_eq!(app.session.load().unwrap().unwrap().token, "abc123");
  }

  #[tokio::test]
  async fn test_quit_stops_shell() {
    let (mut app, _) = setup("quit");
    assert!(!app.should_quit());
    run(&mut app, "q").await.unwrap();
    assert!(app.should_quit());
  }
}
