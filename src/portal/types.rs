use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Patient,
  Clinician,
  Admin,
}

/// Signed-in portal user
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: i64,
  pub email: String,
  pub role: Role,
  #[serde(default)]
  pub first_name: Option<String>,
  #[serde(default)]
  pub last_name: Option<String>,
}

impl User {
  pub fn display_name(&self) -> String {
    match (&self.first_name, &self.last_name) {
      (Some(first), Some(last)) => format!("{} {}", first, last),
      (Some(name), None) | (None, Some(name)) => name.clone(),
      (None, None) => self.email.clone(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
  pub email: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
  pub token: String,
  pub user: User,
}

/// Aggregate counters for the admin dashboard
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminStats {
  pub total_bookings: u64,
  pub pending_bookings: u64,
  pub total_patients: u64,
  pub active_clinicians: u64,
  pub pending_lab_imports: u64,
  pub open_gdpr_requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
  Pending,
  Confirmed,
  Completed,
  Cancelled,
  NoShow,
}

impl BookingStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Confirmed => "confirmed",
      Self::Completed => "completed",
      Self::Cancelled => "cancelled",
      Self::NoShow => "no_show",
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
  pub id: i64,
  pub patient_name: String,
  pub service: String,
  #[serde(default)]
  pub clinician_name: Option<String>,
  #[serde(default)]
  pub scheduled_at: Option<DateTime<Utc>>,
  pub status: BookingStatus,
}

/// Filter and page for the booking list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingFilter {
  pub status: Option<BookingStatus>,
  /// 1-based
  pub page: u32,
}

impl Default for BookingFilter {
  fn default() -> Self {
    Self {
      status: None,
      page: 1,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewTrend {
  pub date: NaiveDate,
  pub views: u64,
  #[serde(default)]
  pub unique_visitors: u64,
}

/// One CRM synchronization run
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmSyncRecord {
  pub id: i64,
  pub started_at: DateTime<Utc>,
  pub status: String,
  #[serde(default)]
  pub records_synced: u64,
  #[serde(default)]
  pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
  pub id: i64,
  pub actor: String,
  pub action: String,
  pub resource: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogPage {
  pub entries: Vec<AuditLogEntry>,
  pub page: u32,
  pub total_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GdprRequestKind {
  Export,
  Deletion,
  Rectification,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GdprRequest {
  pub id: i64,
  pub kind: GdprRequestKind,
  pub status: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabImport {
  pub id: i64,
  pub file_name: String,
  pub status: String,
  #[serde(default)]
  pub row_count: u64,
  #[serde(default)]
  pub error_count: u64,
  pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
  Approve,
  Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabReview<'a> {
  pub decision: ReviewDecision,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Biomarker {
  pub name: String,
  pub value: f64,
  pub unit: String,
  #[serde(default)]
  pub reference_range: Option<String>,
  pub measured_at: DateTime<Utc>,
  /// "low", "high" or absent when in range
  #[serde(default)]
  pub flag: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceItem {
  pub name: String,
  pub status: String,
  #[serde(default)]
  pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceOverview {
  pub score: f64,
  #[serde(default)]
  pub open_findings: u64,
  #[serde(default)]
  pub items: Vec<ComplianceItem>,
}
