//! Cache keys for portal reads.
//!
//! The first part of every key is the endpoint; filters and pagination are
//! appended so each parameterization gets its own slot. Writes invalidate by
//! the bare endpoint, which covers every parameterization below it.

use chrono::NaiveDate;

use super::types::BookingFilter;
use crate::cache::QueryKey;

/// Must stay outside `/auth`: exempt paths never carry the bearer token, and a
/// restored session has nothing else to authenticate with.
pub const CURRENT_USER: &str = "/api/users/me";
pub const ADMIN_STATS: &str = "/api/admin/stats";
pub const BOOKINGS: &str = "/api/admin/bookings";
pub const PAGE_VIEW_TRENDS: &str = "/api/analytics/page-view-trends";
pub const CRM_HISTORY: &str = "/api/crm/history";
pub const AUDIT_LOGS: &str = "/api/admin/audit-logs";
pub const GDPR_REQUESTS: &str = "/api/gdpr/requests";
pub const LAB_IMPORTS: &str = "/api/admin/lab-imports";
pub const BIOMARKERS: &str = "/api/biomarkers";
pub const COMPLIANCE_OVERVIEW: &str = "/api/compliance/overview";

pub fn current_user() -> QueryKey {
  QueryKey::from(CURRENT_USER)
}

pub fn admin_stats() -> QueryKey {
  QueryKey::from(ADMIN_STATS)
}

pub fn bookings(filter: &BookingFilter) -> QueryKey {
  QueryKey::from(BOOKINGS)
    .with(filter.status.map_or("all", |s| s.as_str()))
    .with(filter.page)
}

pub fn page_view_trends(start: NaiveDate, end: NaiveDate) -> QueryKey {
  QueryKey::from(PAGE_VIEW_TRENDS).with(start).with(end)
}

pub fn crm_history() -> QueryKey {
  QueryKey::from(CRM_HISTORY)
}

pub fn audit_logs(page: u32) -> QueryKey {
  QueryKey::from(AUDIT_LOGS).with(page)
}

pub fn gdpr_requests() -> QueryKey {
  QueryKey::from(GDPR_REQUESTS)
}

pub fn lab_imports() -> QueryKey {
  QueryKey::from(LAB_IMPORTS)
}

pub fn biomarkers(patient_id: i64) -> QueryKey {
  QueryKey::from(BIOMARKERS).with(patient_id)
}

pub fn compliance_overview() -> QueryKey {
  QueryKey::from(COMPLIANCE_OVERVIEW)
}
