//! Advisory per-file locks with a time-to-live.
//!
//! Paths are repository-relative and normalised before they are stored, so
//! `src/./lib.rs` and `src//lib.rs` name the same reservation. Expiry is
//! lazy: an expired row stays until someone reads past it or reclaims it.

use std::sync::Arc;

use agentdesk_common::Reservation;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{DeskError, Result};
use crate::store::Store;

/// Longest lease a reservation may ask for: one year.
pub const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// A lease length in seconds, checked against `1..=MAX_TTL_SECS`.
pub fn ttl_from_secs(secs: i64) -> Result<Duration> {
    Duration::try_seconds(secs)
        .filter(|_| (1..=MAX_TTL_SECS).contains(&secs))
        .ok_or_else(|| {
            DeskError::InvalidInput(format!(
                "reservation ttl must be between 1 and {}s, got {}s",
                MAX_TTL_SECS, secs
            ))
        })
}

/// A path another owner still holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPath {
    pub path: String,
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of acquiring several paths at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquireReport {
    pub granted: Vec<String>,
    pub conflicts: Vec<HeldPath>,
}

pub struct ReservationManager {
    store: Arc<dyn Store>,
    default_ttl: Duration,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn Store>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn acquire(&self, path: &str, owner: &str, reason: &str, ttl: Option<Duration>) -> Result<Reservation> {
        self.acquire_at(path, owner, reason, ttl, Utc::now())
    }

    /// Acquire as of `now`. Fails with `ReservationConflict` if a different
    /// owner holds an unexpired reservation on the same path; the same owner
    /// re-acquiring renews the expiry.
    pub fn acquire_at(
        &self,
        path: &str,
        owner: &str,
        reason: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        let path = normalize_path(path)?;
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(DeskError::InvalidInput("reservation owner is empty".into()));
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl <= Duration::zero() || ttl > Duration::seconds(MAX_TTL_SECS) {
            return Err(DeskError::InvalidInput(format!(
                "reservation ttl must be between 1 and {}s, got {}s",
                MAX_TTL_SECS,
                ttl.num_seconds()
            )));
        }
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            DeskError::InvalidInput(format!("reservation expiry overflows from {}", now))
        })?;

        let wanted = Reservation {
            path,
            owner: owner.to_string(),
            reason: reason.to_string(),
            expires_at,
            created_at: now,
        };
        let granted = self.store.acquire_reservation(&wanted, now)?;
        debug!(path = %granted.path, owner, expires_at = %granted.expires_at, "reservation granted");
        Ok(granted)
    }

    /// Acquire each path in turn, collecting conflicts instead of stopping at
    /// the first one.
    pub fn acquire_many(&self, paths: &[String], owner: &str, reason: &str, ttl: Option<Duration>) -> Result<AcquireReport> {
        let mut report = AcquireReport::default();
        for path in paths {
            match self.acquire(path, owner, reason, ttl) {
                Ok(r) => report.granted.push(r.path),
                Err(DeskError::ReservationConflict {
                    path,
                    holder,
                    expires_at,
                }) => {
                    warn!(path = %path, holder = %holder, owner, "path held by another owner");
                    report.conflicts.push(HeldPath {
                        path,
                        holder,
                        expires_at,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Release `path` if `owner` holds it. Not holding it is not an error.
    pub fn release(&self, path: &str, owner: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        let released = self.store.release_reservation(&path, owner)?;
        if released {
            debug!(path = %path, owner, "reservation released");
        }
        Ok(released)
    }

    pub fn release_owner(&self, owner: &str) -> Result<usize> {
        let n = self.store.release_owner(owner)?;
        if n > 0 {
            info!(owner, count = n, "released reservations");
        }
        Ok(n)
    }

    /// Unexpired reservations, newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<Reservation>> {
        self.store.active_reservations(Utc::now(), limit)
    }

    /// Current unexpired holder of `path`, if any.
    pub fn check(&self, path: &str) -> Result<Option<Reservation>> {
        self.check_at(path, Utc::now())
    }

    pub fn check_at(&self, path: &str, now: DateTime<Utc>) -> Result<Option<Reservation>> {
        let path = normalize_path(path)?;
        self.store.reservation_for(&path, now)
    }
}

/// Canonical form of a repository-relative path: `.` segments and repeated
/// separators removed. Absolute paths and `..` are refused rather than
/// resolved.
pub fn normalize_path(path: &str) -> Result<String> {
    let invalid = |message: &str| DeskError::InvalidReservationPath {
        path: path.to_string(),
        message: message.to_string(),
    };
    let trimmed = path.trim();
    if trimmed.starts_with('/') || trimmed.starts_with('\\') {
        return Err(invalid("absolute paths are not allowed"));
    }
    let mut components: Vec<&str> = Vec::new();
    for component in trimmed.split('/') {
        match component {
            "" | "." => {}
            ".." => return Err(invalid("'..' is not allowed")),
            c => components.push(c),
        }
    }
    if components.is_empty() {
        return Err(invalid("path is empty"));
    }
    Ok(components.join("/"))
}
