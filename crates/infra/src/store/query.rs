//! Movement query interface for reporting and audit.
//!
//! Read-only, tenant-scoped, paginated views over the movement log. These
//! queries tolerate eventual consistency: the log is append-only and never
//! rewritten, so a reader that misses the newest movement simply sees a
//! slightly older prefix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockforge_core::TenantId;
use stockforge_ledger::{Movement, MovementKind, StockKey};

use super::r#trait::StoreError;

/// Half-open time window over movement `created_at`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeRange {
    /// Include movements at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Include movements strictly before this instant.
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: None,
        }
    }

    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if at >= until {
                return false;
            }
        }
        true
    }
}

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of movements to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000), // Cap at 1000 for safety
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria for movement queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    /// Restrict to one bucket (optional).
    pub key: Option<StockKey>,
    /// Restrict to one movement kind (optional).
    pub kind: Option<MovementKind>,
    /// Restrict to one causing document (optional).
    pub reference_id: Option<Uuid>,
    /// Movements created at or after this time (optional).
    pub created_after: Option<DateTime<Utc>>,
    /// Movements created before this time (optional).
    pub created_before: Option<DateTime<Utc>>,
}

/// Paginated movement query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementQueryResult {
    pub movements: Vec<Movement>,
    /// Total matches disregarding pagination.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Async reporting queries over the movement log.
///
/// Kept separate from [`super::StockLedger`]: reporting backends are async
/// and never need the per-bucket critical section.
#[async_trait]
pub trait MovementQuery: Send + Sync {
    async fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_bounds_are_inclusive_exclusive() {
        let from = Utc::now();
        let until = from + chrono::Duration::minutes(10);
        let range = TimeRange::between(from, until);

        assert!(range.contains(from));
        assert!(range.contains(from + chrono::Duration::minutes(5)));
        assert!(!range.contains(until));
        assert!(!range.contains(from - chrono::Duration::seconds(1)));
    }

    #[test]
    fn unbounded_range_contains_everything() {
        assert!(TimeRange::all().contains(Utc::now()));
    }

    #[test]
    fn pagination_caps_the_limit() {
        let p = Pagination::new(Some(10_000), None);
        assert_eq!(p.limit, 1000);
        assert_eq!(p.offset, 0);
    }
}
