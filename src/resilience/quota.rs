//! Billing-cycle quota checks (e.g. monthly exports per plan).
//!
//! This limiter only reads usage. The resource owner increments the counter
//! at [`QuotaLimiter::usage_key`] when a unit is actually consumed.

use super::rate_limiter::{log_fail_open, RateLimitDecision, RateLimiter};
use crate::clock::Clock;
use crate::store::CounterStore;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Quota value meaning "no limit".
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    /// Resets at 00:00 UTC on the first of each month.
    #[default]
    CalendarMonth,
    /// Resets on the account-creation day of month (clamped to short months).
    Anniversary,
}

fn default_quota_prefix() -> String {
    "quota".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    pub monthly_quota: i64,
    #[serde(default)]
    pub cycle: BillingCycle,
    #[serde(default = "default_quota_prefix")]
    pub prefix: String,
}

impl QuotaConfig {
    pub fn new(monthly_quota: i64) -> Self {
        Self {
            monthly_quota,
            cycle: BillingCycle::default(),
            prefix: default_quota_prefix(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(UNLIMITED)
    }

    pub fn with_cycle(mut self, cycle: BillingCycle) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn is_unlimited(&self) -> bool {
        self.monthly_quota == UNLIMITED
    }

    pub fn validate_at(&self, path: &str) -> Result<()> {
        if self.monthly_quota < UNLIMITED {
            return Err(Error::config_field(
                format!("{path}.monthly_quota"),
                "must be >= 0, or -1 for unlimited",
            ));
        }
        Ok(())
    }
}

/// Start and end (epoch millis) of the billing cycle containing `now_ms`.
///
/// Anniversary cycles without a creation date fall back to calendar months.
pub fn cycle_bounds(
    cycle: BillingCycle,
    now_ms: u64,
    account_created_at: Option<DateTime<Utc>>,
) -> Result<(u64, u64)> {
    let now = DateTime::<Utc>::from_timestamp_millis(now_ms as i64)
        .ok_or_else(|| out_of_range("now"))?;
    let anchor_day = match (cycle, account_created_at) {
        (BillingCycle::Anniversary, Some(created)) => created.day(),
        _ => 1,
    };

    let this_month = month_anchor(now.year(), now.month(), anchor_day)?;
    let (start, end) = if now < this_month {
        let (py, pm) = prev_month(now.year(), now.month());
        (month_anchor(py, pm, anchor_day)?, this_month)
    } else {
        let (ny, nm) = next_month(now.year(), now.month());
        (this_month, month_anchor(ny, nm, anchor_day)?)
    };
    Ok((
        start.timestamp_millis() as u64,
        end.timestamp_millis() as u64,
    ))
}

fn out_of_range(what: &str) -> Error {
    Error::runtime_with_context(
        "timestamp out of range",
        ErrorContext::new().with_details(what).with_source("quota"),
    )
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = next_month(year, month);
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn month_anchor(year: i32, month: u32, day: u32) -> Result<DateTime<Utc>> {
    let day = day.min(days_in_month(year, month));
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| out_of_range("cycle anchor"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub struct QuotaLimiter {
    cfg: QuotaConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaLimiter {
    pub fn new(cfg: QuotaConfig, store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        cfg.validate_at("quota")?;
        Ok(Self { cfg, store, clock })
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.cfg
    }

    /// Counter the resource owner increments for `owner` in the current cycle.
    pub fn usage_key(&self, owner: &str, account_created_at: Option<DateTime<Utc>>) -> Result<String> {
        let (start, _) = cycle_bounds(self.cfg.cycle, self.clock.now_ms(), account_created_at)?;
        Ok(format!("{}:{}:{}", self.cfg.prefix, owner, start))
    }

    /// Report the owner's standing against the plan quota.
    pub async fn check_account(
        &self,
        owner: &str,
        account_created_at: Option<DateTime<Utc>>,
    ) -> RateLimitDecision {
        let now = self.clock.now_ms();
        match self.read(owner, now, account_created_at).await {
            Ok(decision) => {
                debug!(
                    limiter = "quota",
                    key = %owner,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "quota checked"
                );
                decision
            }
            Err(e) => {
                log_fail_open(self.name(), owner, &e);
                let limit = if self.cfg.is_unlimited() {
                    u64::MAX
                } else {
                    self.cfg.monthly_quota as u64
                };
                RateLimitDecision::fail_open(limit, now)
            }
        }
    }

    async fn read(
        &self,
        owner: &str,
        now: u64,
        account_created_at: Option<DateTime<Utc>>,
    ) -> Result<RateLimitDecision> {
        let (start, end) = cycle_bounds(self.cfg.cycle, now, account_created_at)?;
        if self.cfg.is_unlimited() {
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: u64::MAX,
                reset_at: end,
                limit: u64::MAX,
                fail_open: false,
            });
        }

        let key = format!("{}:{}:{}", self.cfg.prefix, owner, start);
        let used = match self.store.get(&key).await? {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                warn!(key = %key, value = %raw, "ignoring non-numeric usage counter");
                0
            }),
            None => 0,
        };
        let quota = self.cfg.monthly_quota as u64;
        Ok(RateLimitDecision {
            allowed: used < quota,
            remaining: quota.saturating_sub(used),
            reset_at: end,
            limit: quota,
            fail_open: false,
        })
    }
}

#[async_trait]
impl RateLimiter for QuotaLimiter {
    async fn check_limit(&self, key: &str) -> RateLimitDecision {
        self.check_account(key, None).await
    }

    fn name(&self) -> &'static str {
        "quota"
    }
}
