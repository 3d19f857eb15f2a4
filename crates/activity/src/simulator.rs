use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use common::{AccountId, ActivitySummary, RandomSource};
use tokio::sync::RwLock;

use crate::envelope::ActivityEnvelope;

/// Per-account timezone-aware activity envelopes. An envelope is generated
/// once on first reference and stable thereafter (regenerated only on
/// fingerprint rotation, which owns account identity changes).
pub struct ActivitySimulator {
    rng: Arc<dyn RandomSource>,
    envelopes: RwLock<HashMap<AccountId, (ActivityEnvelope, Tz)>>,
}

impl ActivitySimulator {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self {
            rng,
            envelopes: RwLock::new(HashMap::new()),
        }
    }

    async fn envelope_for(&self, account_id: &AccountId, timezone_offset: i32) -> (ActivityEnvelope, Tz) {
        if let Some(existing) = self.envelopes.read().await.get(account_id) {
            return existing.clone();
        }
        let mut map = self.envelopes.write().await;
        map.entry(account_id.clone())
            .or_insert_with(|| {
                (
                    ActivityEnvelope::generate(self.rng.as_ref()),
                    offset_to_tz(timezone_offset),
                )
            })
            .clone()
    }

    pub async fn is_sleeping(&self, account_id: &AccountId, timezone_offset: i32, now: DateTime<Utc>) -> bool {
        let (envelope, tz) = self.envelope_for(account_id, timezone_offset).await;
        let local = now.with_timezone(&tz);
        envelope.is_sleeping(local.hour())
    }

    pub async fn activity_multiplier(
        &self,
        account_id: &AccountId,
        timezone_offset: i32,
        now: DateTime<Utc>,
    ) -> f64 {
        let (envelope, tz) = self.envelope_for(account_id, timezone_offset).await;
        let local = now.with_timezone(&tz);
        let is_weekend = matches!(local.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);
        envelope.multiplier(local.hour(), is_weekend)
    }

    /// Draws a Bernoulli on the current multiplier; on failure suggests a
    /// delay inversely proportional to it.
    pub async fn should_send_now(
        &self,
        account_id: &AccountId,
        timezone_offset: i32,
        now: DateTime<Utc>,
    ) -> (bool, f64) {
        let multiplier = self.activity_multiplier(account_id, timezone_offset, now).await;
        if self.rng.bernoulli(multiplier) {
            (true, 0.0)
        } else {
            let epsilon = 0.01;
            let delay = self.rng.uniform(10.0, 300.0) / multiplier.max(epsilon);
            (false, delay)
        }
    }

    pub async fn summary(
        &self,
        account_id: &AccountId,
        timezone_offset: i32,
        now: DateTime<Utc>,
    ) -> ActivitySummary {
        let (envelope, tz) = self.envelope_for(account_id, timezone_offset).await;
        let local = now.with_timezone(&tz);
        ActivitySummary {
            sleep_start_hour: envelope.sleep_start_hour,
            sleep_end_hour: envelope.sleep_end_hour,
            is_sleeping_now: envelope.is_sleeping(local.hour()),
            current_multiplier: envelope.multiplier(
                local.hour(),
                matches!(local.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun),
            ),
        }
    }

    /// Response/timing pattern scores seeded for this account. The Send
    /// Gate reads these and forwards them into `RiskEngine::seed_behavioral_scores`
    /// on every `can_send`, since the risk engine has no direct dependency
    /// on this crate.
    pub async fn behavioral_scores(&self, account_id: &AccountId, timezone_offset: i32) -> (f64, f64) {
        let (envelope, _tz) = self.envelope_for(account_id, timezone_offset).await;
        (envelope.response_pattern_score, envelope.timing_pattern_score)
    }
}

/// Maps a whole-hour UTC offset onto a fixed-offset IANA-style zone. Real
/// fingerprints only ever carry a whole-hour offset, so `chrono_tz`'s
/// `Etc/GMT` family (note: POSIX sign convention is inverted) covers it.
fn offset_to_tz(timezone_offset: i32) -> Tz {
    // Etc/GMT-n is UTC+n (POSIX sign convention is inverted from common usage).
    match timezone_offset.clamp(-12, 12) {
        0 => chrono_tz::Etc::GMT,
        1 => chrono_tz::Etc::GMTMinus1,
        2 => chrono_tz::Etc::GMTMinus2,
        3 => chrono_tz::Etc::GMTMinus3,
        4 => chrono_tz::Etc::GMTMinus4,
        5 => chrono_tz::Etc::GMTMinus5,
        6 => chrono_tz::Etc::GMTMinus6,
        7 => chrono_tz::Etc::GMTMinus7,
        8 => chrono_tz::Etc::GMTMinus8,
        9 => chrono_tz::Etc::GMTMinus9,
        10 => chrono_tz::Etc::GMTMinus10,
        11 => chrono_tz::Etc::GMTMinus11,
        12 => chrono_tz::Etc::GMTMinus12,
        -1 => chrono_tz::Etc::GMTPlus1,
        -2 => chrono_tz::Etc::GMTPlus2,
        -3 => chrono_tz::Etc::GMTPlus3,
        -4 => chrono_tz::Etc::GMTPlus4,
        -5 => chrono_tz::Etc::GMTPlus5,
        -6 => chrono_tz::Etc::GMTPlus6,
        -7 => chrono_tz::Etc::GMTPlus7,
        -8 => chrono_tz::Etc::GMTPlus8,
        -9 => chrono_tz::Etc::GMTPlus9,
        -10 => chrono_tz::Etc::GMTPlus10,
        -11 => chrono_tz::Etc::GMTPlus11,
        -12 => chrono_tz::Etc::GMTPlus12,
        _ => chrono_tz::Etc::GMT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SystemRandom;

    #[tokio::test]
    async fn envelope_is_generated_once_and_cached() {
        let simulator = ActivitySimulator::new(Arc::new(SystemRandom));
        let account: AccountId = "+3000".into();
        let now = Utc::now();

        let first = simulator.summary(&account, 9, now).await;
        let second = simulator.summary(&account, 9, now).await;

        assert_eq!(first.sleep_start_hour, second.sleep_start_hour);
        assert_eq!(first.sleep_end_hour, second.sleep_end_hour);
    }

    #[tokio::test]
    async fn multiplier_is_bounded() {
        let simulator = ActivitySimulator::new(Arc::new(SystemRandom));
        let account: AccountId = "+3001".into();
        let now = Utc::now();

        let m = simulator.activity_multiplier(&account, -5, now).await;
        assert!((0.0..=1.0).contains(&m));
    }
}
