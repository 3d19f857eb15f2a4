use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AccountId, Decision, RandomSource, RiskLevel};
use quarantine::QuarantineManager;
use risk::RiskEngine;
use tracing::debug;

use activity::ActivitySimulator;

/// Per-account rate-limiter state. Owned exclusively by that account's
/// dispatcher — no synchronization needed, per the resource table.
#[derive(Debug, Clone)]
pub struct AccountRateLimiter {
    hour_window_start: DateTime<Utc>,
    sent_this_hour: u32,
    sent_total: u32,
}

impl AccountRateLimiter {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            hour_window_start: now,
            sent_this_hour: 0,
            sent_total: 0,
        }
    }

    fn roll_window(&mut self, now: DateTime<Utc>) {
        if now - self.hour_window_start >= chrono::Duration::hours(1) {
            self.hour_window_start = now;
            self.sent_this_hour = 0;
        }
    }

    pub fn record_send(&mut self, now: DateTime<Utc>) {
        self.roll_window(now);
        self.sent_this_hour += 1;
        self.sent_total += 1;
    }

    fn elapsed_in_hour(&self, now: DateTime<Utc>) -> i64 {
        (now - self.hour_window_start).num_seconds().max(0)
    }
}

/// Single decision point: may account A send right now? Consults
/// quarantine state, the activity envelope, and the risk level, in that
/// order, short-circuiting on the first blocking condition.
pub struct SendGate {
    risk: Arc<RiskEngine>,
    quarantine: Arc<QuarantineManager>,
    activity: Arc<ActivitySimulator>,
    rng: Arc<dyn RandomSource>,
}

impl SendGate {
    pub fn new(
        risk: Arc<RiskEngine>,
        quarantine: Arc<QuarantineManager>,
        activity: Arc<ActivitySimulator>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            risk,
            quarantine,
            activity,
            rng,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn can_send(
        &self,
        account_id: &AccountId,
        timezone_offset: i32,
        limiter: &AccountRateLimiter,
        max_per_hour: u32,
        max_per_account: u32,
        now: DateTime<Utc>,
    ) -> common::Result<Decision> {
        if let Some((_, release_at)) = self.quarantine.is_quarantined(account_id).await? {
            return Ok(Decision::Deny {
                reason: "quarantined".into(),
                release_at: Some(release_at),
            });
        }

        let (response_pattern_score, timing_pattern_score) =
            self.activity.behavioral_scores(account_id, timezone_offset).await;
        self.risk
            .seed_behavioral_scores(account_id, response_pattern_score, timing_pattern_score)
            .await;

        if self.activity.is_sleeping(account_id, timezone_offset, now).await {
            return Ok(Decision::Deny {
                reason: "sleeping".into(),
                release_at: None,
            });
        }

        let (allow, suggested_delay) = self.activity.should_send_now(account_id, timezone_offset, now).await;
        if !allow {
            return Ok(Decision::Delay {
                seconds: suggested_delay,
                reason: "activity envelope".into(),
            });
        }

        if limiter.sent_this_hour >= max_per_hour {
            return Ok(Decision::Delay {
                seconds: (3600 - limiter.elapsed_in_hour(now)).max(0) as f64,
                reason: "hourly limit".into(),
            });
        }

        if limiter.sent_total >= max_per_account {
            return Ok(Decision::Deny {
                reason: "account capped".into(),
                release_at: None,
            });
        }

        let status = self.risk.get_status(account_id).await;
        debug!(account_id = %account_id, risk_level = %status.risk_level, "send gate risk check");

        let decision = match status.risk_level {
            RiskLevel::Critical => Decision::Delay {
                seconds: 600.0,
                reason: "critical risk".into(),
            },
            RiskLevel::High => Decision::Allow {
                mandatory_delay_s: self.rng.uniform(30.0, 120.0),
            },
            RiskLevel::Moderate => Decision::Allow {
                mandatory_delay_s: self.rng.uniform(10.0, 30.0),
            },
            _ => Decision::Allow { mandatory_delay_s: 0.0 },
        };

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{QuarantineReason, SystemClock, SystemRandom};
    use sqlx::SqlitePool;
    use tokio::sync::mpsc;

    /// Always samples the low end of any range and wins every Bernoulli
    /// draw with positive probability — keeps activity-envelope gating out
    /// of the way of tests that target a different evaluation step.
    struct FixedRandom(f64);
    impl RandomSource for FixedRandom {
        fn uniform(&self, lo: f64, hi: f64) -> f64 {
            lo + (hi - lo) * self.0
        }
        fn bernoulli(&self, p: f64) -> bool {
            self.0 < p
        }
        fn index(&self, len: usize) -> usize {
            ((self.0 * len as f64) as usize).min(len.saturating_sub(1))
        }
    }

    async fn test_gate() -> (SendGate, Arc<QuarantineManager>) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let risk = Arc::new(RiskEngine::new(risk::RiskConfig::default(), tx));
        let quarantine = Arc::new(QuarantineManager::new(pool, Arc::new(SystemClock)));
        let activity = Arc::new(ActivitySimulator::new(Arc::new(FixedRandom(0.0))));
        let gate = SendGate::new(risk, quarantine.clone(), activity, Arc::new(SystemRandom));
        (gate, quarantine)
    }

    #[tokio::test]
    async fn quarantined_account_is_denied() {
        let (gate, quarantine) = test_gate().await;
        let account: AccountId = "+5000".into();
        quarantine
            .quarantine(&account, QuarantineReason::Manual, 30, None)
            .await
            .unwrap();

        let limiter = AccountRateLimiter::new(Utc::now());
        let decision = gate
            .can_send(&account, 0, &limiter, 100, 1000, Utc::now())
            .await
            .unwrap();

        assert!(matches!(decision, Decision::Deny { reason, .. } if reason == "quarantined"));
    }

    #[tokio::test]
    async fn hourly_cap_delays_rather_than_denies() {
        use chrono::TimeZone;
        let (gate, _quarantine) = test_gate().await;
        let account: AccountId = "+5001".into();
        // Mid-afternoon UTC, well outside the sampled [1,6) sleep window.
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap();
        let mut limiter = AccountRateLimiter::new(now);
        for _ in 0..5 {
            limiter.record_send(now);
        }

        let decision = gate.can_send(&account, 0, &limiter, 5, 1000, now).await.unwrap();
        assert!(matches!(decision, Decision::Delay { reason, .. } if reason == "hourly limit"));
    }
}
