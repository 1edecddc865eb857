//! Typed operations over the portal API.
//!
//! Reads go through the shared query cache under the keys in [`keys`];
//! writes are [`Mutation`]s that invalidate every key whose data they change.

pub mod keys;
pub mod types;

use chrono::NaiveDate;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::{ApiError, CredentialStore};
use crate::cache::{Mutation, QueryClient, QueryKey};
use types::{
  AdminStats, AuditLogPage, Biomarker, Booking, BookingFilter, BookingStatus, ComplianceOverview,
  CrmSyncRecord, GdprRequest, GdprRequestKind, LabImport, LabReview, LoginRequest, LoginResponse,
  PageViewTrend, ReviewDecision, User,
};

const LOGIN: &str = "/api/auth/login";
const LOGOUT: &str = "/api/auth/logout";
const CRM_SYNC: &str = "/api/crm/sync";

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
  serde_json::from_value(value).map_err(|e| ApiError::Decode(e.into()))
}

/// Portal API client
#[derive(Clone)]
pub struct PortalClient {
  queries: QueryClient,
}

impl PortalClient {
  pub fn new(queries: QueryClient) -> Self {
    Self { queries }
  }

  pub fn queries(&self) -> &QueryClient {
    &self.queries
  }

  pub fn credentials(&self) -> &CredentialStore {
    self.queries.api().credentials()
  }

  // --------------------------------------------------------------------------
  // Session
  // --------------------------------------------------------------------------

  /// Sign in and keep the returned bearer token for later requests.
  ///
  /// Cached reads belong to the previous identity, so the cache is cleared.
  pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
    let payload = serde_json::to_value(LoginRequest { email, password })
      .map_err(|e| ApiError::Encode(e.into()))?;
    let response = self
      .queries
      .api()
      .api_request(Method::POST, LOGIN, Some(&payload))
      .await?;
    let login: LoginResponse = response.json()?;

    self.credentials().set(login.token);
    self.queries.clear();
    info!(user_id = login.user.id, "logged in");
    Ok(login.user)
  }

  /// Sign out. The local token and cache are dropped even if the server call fails.
  pub async fn logout(&self) -> Result<(), ApiError> {
    let result = self
      .queries
      .api()
      .api_request(Method::POST, LOGOUT, None)
      .await;

    self.credentials().clear();
    self.queries.clear();
    match &result {
      Ok(_) => info!("logged out"),
      Err(e) => warn!(error = %e, "logout request failed; local session cleared anyway"),
    }
    result.map(|_| ())
  }

  /// The signed-in user, or `None` when the server answers 401.
  pub async fn current_user(&self) -> Result<Option<User>, ApiError> {
    let options = self.queries.options().return_null_on_unauthorized();
    self
      .queries
      .fetch_query_with(&keys::current_user(), &options)
      .await
  }

  // --------------------------------------------------------------------------
  // Dashboard and bookings
  // --------------------------------------------------------------------------

  pub async fn admin_stats(&self) -> Result<AdminStats, ApiError> {
    self.queries.fetch_query(&keys::admin_stats()).await
  }

  pub async fn bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, ApiError> {
    self.queries.fetch_query(&keys::bookings(filter)).await
  }

  /// Change a booking's status. Affects every booking list page and the stats counters.
  pub async fn update_booking_status(
    &self,
    booking_id: i64,
    status: BookingStatus,
  ) -> Result<Booking, ApiError> {
    let mutation = Mutation::patch(format!("{}/{}", keys::BOOKINGS, booking_id))
      .json(&json!({ "status": status }))?
      .invalidates(keys::BOOKINGS)
      .invalidates(keys::ADMIN_STATS);
    decode(self.queries.mutate(mutation).await?)
  }

  // --------------------------------------------------------------------------
  // Analytics and CRM
  // --------------------------------------------------------------------------

  pub async fn page_view_trends(
    &self,
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<Vec<PageViewTrend>, ApiError> {
    self
      .queries
      .fetch_query(&keys::page_view_trends(start, end))
      .await
  }

  pub async fn crm_history(&self) -> Result<Vec<CrmSyncRecord>, ApiError> {
    self.queries.fetch_query(&keys::crm_history()).await
  }

  /// Trigger a CRM synchronization run.
  pub async fn crm_sync(&self) -> Result<CrmSyncRecord, ApiError> {
    let mutation = Mutation::post(CRM_SYNC)
      .invalidates(keys::CRM_HISTORY)
      .invalidates(keys::ADMIN_STATS);
    decode(self.queries.mutate(mutation).await?)
  }

  // --------------------------------------------------------------------------
  // Audit and GDPR
  // --------------------------------------------------------------------------

  pub async fn audit_logs(&self, page: u32) -> Result<AuditLogPage, ApiError> {
    self.queries.fetch_query(&keys::audit_logs(page)).await
  }

  pub async fn gdpr_requests(&self) -> Result<Vec<GdprRequest>, ApiError> {
    self.queries.fetch_query(&keys::gdpr_requests()).await
  }

  /// File a GDPR request. The server records it in the audit log as well.
  pub async fn create_gdpr_request(&self, kind: GdprRequestKind) -> Result<GdprRequest, ApiError> {
    let mutation = Mutation::post(keys::GDPR_REQUESTS)
      .json(&json!({ "kind": kind }))?
      .invalidates(keys::GDPR_REQUESTS)
      .invalidates(keys::AUDIT_LOGS)
      .invalidates(keys::ADMIN_STATS);
    decode(self.queries.mutate(mutation).await?)
  }

  // --------------------------------------------------------------------------
  // Lab data and compliance
  // --------------------------------------------------------------------------

  pub async fn lab_imports(&self) -> Result<Vec<LabImport>, ApiError> {
    self.queries.fetch_query(&keys::lab_imports()).await
  }

  /// Approve or reject an uploaded lab file. Approval publishes biomarkers.
  pub async fn review_lab_import(
    &self,
    import_id: i64,
    decision: ReviewDecision,
    notes: Option<&str>,
  ) -> Result<LabImport, ApiError> {
    let mutation = Mutation::post(format!("{}/{}/review", keys::LAB_IMPORTS, import_id))
      .json(&LabReview { decision, notes })?
      .invalidates(keys::LAB_IMPORTS)
      .invalidates(keys::BIOMARKERS)
      .invalidates(keys::ADMIN_STATS);
    decode(self.queries.mutate(mutation).await?)
  }

  pub async fn biomarkers(&self, patient_id: i64) -> Result<Vec<Biomarker>, ApiError> {
    self.queries.fetch_query(&keys::biomarkers(patient_id)).await
  }

  pub async fn compliance_overview(&self) -> Result<ComplianceOverview, ApiError> {
    self.queries.fetch_query(&keys::compliance_overview()).await
  }

  /// Fetch an arbitrary key, for endpoints without a typed wrapper.
  pub async fn raw(&self, key: &QueryKey) -> Result<Value, ApiError> {
    self.queries.fetch_query(key).await
  }

  /// Send an arbitrary write that invalidates `invalidates`.
  pub async fn raw_mutation(
    &self,
    method: Method,
    endpoint: &str,
    payload: Option<Value>,
    invalidates: Vec<QueryKey>,
  ) -> Result<Value, ApiError> {
    let mut mutation = Mutation::new(method, endpoint);
    if let Some(payload) = payload {
      mutation = mutation.json(&payload)?;
    }
    for key in invalidates {
      mutation = mutation.invalidates(key);
    }
    self.queries.mutate(mutation).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{ApiClient, HttpResponse, MockTransport};
  use crate::cache::QueryDefaults;
  use reqwest::header::AUTHORIZATION;
  use std::sync::Arc;

  fn setup() -> (PortalClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let api = ApiClient::with_transport(transport.clone(), "", CredentialStore::new());
    let queries = QueryClient::new(api, QueryDefaults::default());
    (PortalClient::new(queries), transport)
  }

  const STATS: &str = r#"{"totalBookings":10,"pendingBookings":2}"#;
  const BOOKING: &str =
    r#"{"id":42,"patientName":"Ada","service":"Blood panel","status":"confirmed"}"#;

  #[tokio::test]
  async fn test_login_stores_token_and_later_requests_use_it() {
    let (portal, transport) = setup();
    transport.respond(
      Method::POST,
      LOGIN,
      HttpResponse::new(
        200,
        r#"{"token":"abc123","user":{"id":1,"email":"a@b.c","role":"admin"}}"#,
      ),
    );
    transport.respond(Method::GET, keys::ADMIN_STATS, HttpResponse::new(200, STATS));

    let user = portal.login("a@b.c", "pw").await.unwrap();
    assert_eq!(user.display_name(), "a@b.c");
    assert_eq!(portal.credentials().get().as_deref(), Some("abc123"));

    let login = &transport.requests()[0];
    assert!(!login.headers.contains_key(AUTHORIZATION));

    let stats = portal.admin_stats().await.unwrap();
    assert_eq!(stats.total_bookings, 10);
    let request = transport.last_request();
    assert_eq!(
      request.headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
      "Bearer abc123"
    );
  }

  #[tokio::test]
  async fn test_failed_login_keeps_no_token() {
    let (portal, transport) = setup();
    transport.respond(Method::POST, LOGIN, HttpResponse::new(401, "Invalid credentials"));

    let err = portal.login("a@b.c", "wrong").await.unwrap_err();
    assert_eq!(err.to_string(), "401: Invalid credentials");
    assert!(!portal.credentials().is_set());
  }

  #[tokio::test]
  async fn test_logout_clears_session_even_on_failure() {
    let (portal, transport) = setup();
    portal.credentials().set("abc123");
    transport.respond(Method::GET, keys::ADMIN_STATS, HttpResponse::new(200, STATS));
    transport.respond(Method::POST, LOGOUT, HttpResponse::new(500, ""));
    portal.admin_stats().await.unwrap();

    assert!(portal.logout().await.is_err());
    assert!(!portal.credentials().is_set());
    assert!(portal.queries().cached_keys().is_empty());
  }

  #[tokio::test]
  async fn test_current_user_is_none_when_unauthorized() {
    let (portal, transport) = setup();
    transport.respond(Method::GET, keys::CURRENT_USER, HttpResponse::new(401, ""));
    assert!(portal.current_user().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_booking_update_invalidates_lists_and_stats() {
    let (portal, transport) = setup();
    portal.credentials().set("abc123");
    transport.respond(Method::GET, keys::ADMIN_STATS, HttpResponse::new(200, STATS));
    transport.respond(Method::GET, "/api/admin/bookings/all/1", HttpResponse::new(200, "[]"));
    transport.respond(
      Method::GET,
      "/api/admin/bookings/pending/1",
      HttpResponse::new(200, "[]"),
    );
    transport.respond(Method::GET, keys::CRM_HISTORY, HttpResponse::new(200, "[]"));
    transport.respond(Method::PATCH, "/api/admin/bookings/42", HttpResponse::new(200, BOOKING));

    let pending = BookingFilter {
      status: Some(BookingStatus::Pending),
      page: 1,
    };
    portal.admin_stats().await.unwrap();
    portal.bookings(&BookingFilter::default()).await.unwrap();
    portal.bookings(&pending).await.unwrap();
    portal.crm_history().await.unwrap();

    let booking = portal
      .update_booking_status(42, BookingStatus::Confirmed)
      .await
      .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);

    let patch = transport.last_request();
    assert_eq!(patch.body.as_deref(), Some(r#"{"status":"confirmed"}"#));
    assert_eq!(portal.queries().cached_keys(), vec![keys::crm_history()]);

    portal.bookings(&pending).await.unwrap();
    portal.admin_stats().await.unwrap();
    assert_eq!(transport.calls(Method::GET, "/api/admin/bookings/pending/1"), 2);
    assert_eq!(transport.calls(Method::GET, keys::ADMIN_STATS), 2);
    assert_eq!(transport.calls(Method::GET, keys::CRM_HISTORY), 1);
  }

  #[tokio::test]
  async fn test_crm_sync_invalidates_history() {
    let (portal, transport) = setup();
    transport.respond(Method::GET, keys::CRM_HISTORY, HttpResponse::new(200, "[]"));
    transport.respond(
      Method::POST,
      CRM_SYNC,
      HttpResponse::new(
        200,
        r#"{"id":7,"startedAt":"2024-05-01T10:00:00Z","status":"running"}"#,
      ),
    );

    portal.crm_history().await.unwrap();
    let run = portal.crm_sync().await.unwrap();
    assert_eq!(run.id, 7);
    assert!(portal
      .queries()
      .get_query_data::<Value>(&keys::crm_history())
      .is_none());
  }

  #[tokio::test]
  async fn test_lab_review_invalidates_imports_and_every_patient_biomarkers() {
    let (portal, transport) = setup();
    transport.respond(Method::GET, keys::LAB_IMPORTS, HttpResponse::new(200, "[]"));
    transport.respond(Method::GET, "/api/biomarkers/1", HttpResponse::new(200, "[]"));
    transport.respond(Method::GET, "/api/biomarkers/2", HttpResponse::new(200, "[]"));
    transport.respond(Method::GET, keys::COMPLIANCE_OVERVIEW, HttpResponse::new(200, r#"{"score":0.9}"#));
    transport.respond(
      Method::POST,
      "/api/admin/lab-imports/5/review",
      HttpResponse::new(
        200,
        r#"{"id":5,"fileName":"labs.csv","status":"approved","uploadedAt":"2024-05-01T10:00:00Z"}"#,
      ),
    );

    portal.lab_imports().await.unwrap();
    portal.biomarkers(1).await.unwrap();
    portal.biomarkers(2).await.unwrap();
    portal.compliance_overview().await.unwrap();

    let import = portal
      .review_lab_import(5, ReviewDecision::Approve, None)
      .await
      .unwrap();
    assert_eq!(import.status, "approved");
    assert_eq!(
      transport.last_request().body.as_deref(),
      Some(r#"{"decision":"approve"}"#)
    );
    assert_eq!(portal.queries().cached_keys(), vec![keys::compliance_overview()]);
  }

  #[tokio::test]
  async fn test_gdpr_request_invalidates_audit_pages() {
    let (portal, transport) = setup();
    transport.respond(
      Method::GET,
      "/api/admin/audit-logs/1",
      HttpResponse::new(200, r#"{"entries":[],"page":1,"totalPages":1}"#),
    );
    transport.respond(Method::GET, keys::GDPR_REQUESTS, HttpResponse::new(200, "[]"));
    transport.respond(
      Method::POST,
      keys::GDPR_REQUESTS,
      HttpResponse::new(
        201,
        r#"{"id":3,"kind":"export","status":"pending","createdAt":"2024-05-01T10:00:00Z"}"#,
      ),
    );

    portal.audit_logs(1).await.unwrap();
    portal.gdpr_requests().await.unwrap();
    let request = portal
      .create_gdpr_request(GdprRequestKind::Export)
      .await
      .unwrap();

    assert_eq!(request.kind, GdprRequestKind::Export);
    assert!(portal.queries().cached_keys().is_empty());
  }

  #[tokio::test]
  async fn test_trends_cache_per_date_range() {
    let (portal, transport) = setup();
    let jan = "/api/analytics/page-view-trends/2024-01-01/2024-01-31";
    transport.respond(
      Method::GET,
      jan,
      HttpResponse::new(200, r#"[{"date":"2024-01-01","views":12}]"#),
    );
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();

    let trends = portal.page_view_trends(start, end).await.unwrap();
    assert_eq!(trends[0].views, 12);
    portal.page_view_trends(start, end).await.unwrap();
    assert_eq!(transport.calls(Method::GET, jan), 1);
  }

  #[tokio::test]
  async fn test_raw_mutation_invalidates_given_keys() {
    let (portal, transport) = setup();
    transport.respond(Method::GET, "/api/x", HttpResponse::new(200, "1"));
    transport.respond(Method::DELETE, "/api/x/1", HttpResponse::new(204, ""));
    portal.raw(&QueryKey::from("/api/x")).await.unwrap();

    portal
      .raw_mutation(Method::DELETE, "/api/x/1", None, vec![QueryKey::from("/api/x")])
      .await
      .unwrap();
    assert!(portal.queries().cached_keys().is_empty());
  }
}
