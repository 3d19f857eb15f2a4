use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AccountId, ErrorKind, RiskEvent, RiskLevel, RiskSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::diversity::{DiversityWindow, SpamPattern};

/// Risk-formula thresholds, exposed as configuration rather than hardcoded
/// (per the spec's own guidance that the ban-probability constants are a
/// v1 baseline, not a calibrated model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub quarantine_threshold: f64,
    pub critical_threshold: f64,
    pub high_threshold: f64,
    pub moderate_threshold: f64,
    pub low_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            quarantine_threshold: 0.6,
            critical_threshold: 0.7,
            high_threshold: 0.5,
            moderate_threshold: 0.3,
            low_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WindowKind {
    Send,
    Error(ErrorKind),
}

#[derive(Debug, Clone)]
struct WindowEvent {
    at: DateTime<Utc>,
    kind: WindowKind,
    recipient_id: Option<i64>,
}

/// The per-account owner of `RiskMetrics` and the `DiversityWindow`.
/// Mutated only through `RiskEngine`'s methods, which hold this behind a
/// per-account mutex so updates are serialized.
struct AccountRiskCell {
    events: VecDeque<WindowEvent>,
    diversity: DiversityWindow,
    response_pattern_score: f64,
    timing_pattern_score: f64,
    consecutive_floodwaits_24h: u32,
    quarantined: bool,
}

impl AccountRiskCell {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            diversity: DiversityWindow::new(),
            response_pattern_score: 1.0,
            timing_pattern_score: 1.0,
            consecutive_floodwaits_24h: 0,
            quarantined: false,
        }
    }

    fn age_out(&mut self, now: DateTime<Utc>) {
        let cutoff_24h = now - chrono::Duration::hours(24);
        while matches!(self.events.front(), Some(e) if e.at < cutoff_24h) {
            self.events.pop_front();
        }
    }

    fn messages_sent_1h(&self, now: DateTime<Utc>) -> u32 {
        let cutoff = now - chrono::Duration::hours(1);
        self.events
            .iter()
            .filter(|e| e.at >= cutoff && matches!(e.kind, WindowKind::Send))
            .count() as u32
    }

    fn messages_sent_24h(&self) -> u32 {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, WindowKind::Send))
            .count() as u32
    }

    fn unique_recipients_24h(&self) -> u32 {
        self.events
            .iter()
            .filter_map(|e| match e.kind {
                WindowKind::Send => e.recipient_id,
                _ => None,
            })
            .collect::<std::collections::HashSet<_>>()
            .len() as u32
    }

    fn errors_24h(&self) -> u32 {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, WindowKind::Error(_)))
            .count() as u32
    }

    fn floodwait_24h(&self) -> u32 {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, WindowKind::Error(ErrorKind::Floodwait)))
            .count() as u32
    }

    fn snapshot(&self, account_id: &AccountId, now: DateTime<Utc>, config: &RiskConfig) -> RiskSnapshot {
        let messages_sent_1h = self.messages_sent_1h(now);
        let messages_sent_24h = self.messages_sent_24h();
        let unique_recipients_24h = self.unique_recipients_24h();
        let errors_24h = self.errors_24h();
        let floodwait_24h = self.floodwait_24h();
        let diversity_score = self.diversity.score();

        let ban_probability = ban_probability(
            messages_sent_1h,
            messages_sent_24h,
            unique_recipients_24h,
            errors_24h,
            floodwait_24h,
            diversity_score,
            self.response_pattern_score,
            self.timing_pattern_score,
        );

        let risk_level = if self.quarantined {
            RiskLevel::Quarantined
        } else {
            classify(ban_probability, config)
        };

        RiskSnapshot {
            account_id: account_id.clone(),
            messages_sent_1h,
            messages_sent_24h,
            unique_recipients_24h,
            errors_24h,
            floodwait_24h,
            diversity_score,
            response_pattern_score: self.response_pattern_score,
            timing_pattern_score: self.timing_pattern_score,
            ban_probability,
            risk_level,
        }
    }
}

/// Ban-probability formula: start at 0, add contributions per signal, clamp
/// to [0,1]. Deterministic heuristic, not a calibrated estimator.
#[allow(clippy::too_many_arguments)]
fn ban_probability(
    sent_1h: u32,
    sent_24h: u32,
    unique_recipients_24h: u32,
    errors_24h: u32,
    floodwait_24h: u32,
    diversity_score: f64,
    response_pattern_score: f64,
    timing_pattern_score: f64,
) -> f64 {
    let mut p = 0.0;

    p += if sent_1h > 50 {
        0.30
    } else if sent_1h > 30 {
        0.15
    } else if sent_1h > 20 {
        0.05
    } else {
        0.0
    };

    p += if sent_24h > 500 {
        0.30
    } else if sent_24h > 200 {
        0.15
    } else if sent_24h > 100 {
        0.05
    } else {
        0.0
    };

    p += (1.0 - diversity_score) * 0.2;

    let error_rate = errors_24h as f64 / (sent_24h.max(1)) as f64;
    p += if error_rate > 0.1 {
        0.20
    } else if error_rate > 0.05 {
        0.10
    } else {
        0.0
    };

    p += if floodwait_24h > 5 {
        0.30
    } else if floodwait_24h > 2 {
        0.15
    } else if floodwait_24h > 0 {
        0.05
    } else {
        0.0
    };

    if unique_recipients_24h > 0 {
        let reuse = sent_24h as f64 / unique_recipients_24h as f64;
        if reuse > 10.0 {
            p += 0.10;
        }
    }

    p += (1.0 - response_pattern_score) * 0.1;
    p += (1.0 - timing_pattern_score) * 0.1;

    p.clamp(0.0, 1.0)
}

fn classify(p: f64, config: &RiskConfig) -> RiskLevel {
    if p >= config.critical_threshold {
        RiskLevel::Critical
    } else if p >= config.high_threshold {
        RiskLevel::High
    } else if p >= config.moderate_threshold {
        RiskLevel::Moderate
    } else if p >= config.low_threshold {
        RiskLevel::Low
    } else {
        RiskLevel::Safe
    }
}

/// Quarantine duration in minutes implied by a given ban probability, per
/// the auto-quarantine rule. `None` if below the quarantine threshold.
fn auto_quarantine_minutes(p: f64, config: &RiskConfig) -> Option<i64> {
    if p < config.quarantine_threshold {
        return None;
    }
    Some(if p >= 0.8 {
        240
    } else if p >= 0.7 {
        120
    } else {
        60
    })
}

/// Maintains per-account `RiskMetrics` and `DiversityWindow`, each behind
/// its own mutex, registered in a shared map. Cross-account reads (status
/// queries, supervisor snapshots) never block an in-flight update — the
/// per-account mutex is acquired, a snapshot is cloned out, and the mutex
/// is released before any further work.
pub struct RiskEngine {
    config: RiskConfig,
    cells: RwLock<HashMap<AccountId, Arc<Mutex<AccountRiskCell>>>>,
    event_tx: mpsc::Sender<RiskEvent>,
}

impl RiskEngine {
    pub fn new(config: RiskConfig, event_tx: mpsc::Sender<RiskEvent>) -> Self {
        Self {
            config,
            cells: RwLock::new(HashMap::new()),
            event_tx,
        }
    }

    async fn cell_for(&self, account_id: &AccountId) -> Arc<Mutex<AccountRiskCell>> {
        if let Some(cell) = self.cells.read().await.get(account_id) {
            return cell.clone();
        }
        let mut cells = self.cells.write().await;
        cells
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AccountRiskCell::new())))
            .clone()
    }

    /// Record a successful send, fold it into the diversity window, and
    /// evaluate auto-quarantine.
    pub async fn record_send(&self, account_id: &AccountId, text: &str, recipient_id: i64) {
        let cell = self.cell_for(account_id).await;
        let now = Utc::now();

        let (snapshot, spam) = {
            let mut guard = cell.lock().await;
            guard.age_out(now);
            guard.events.push_back(WindowEvent {
                at: now,
                kind: WindowKind::Send,
                recipient_id: Some(recipient_id),
            });
            let spam = guard.diversity.push(text);
            (guard.snapshot(account_id, now, &self.config), spam)
        };

        if let Some(pattern) = spam {
            self.apply_spam_penalty(account_id, pattern).await;
        }

        self.maybe_quarantine(account_id, snapshot.ban_probability, now)
            .await;

        info!(
            account_id = %account_id,
            ban_probability = snapshot.ban_probability,
            risk_level = %snapshot.risk_level,
            "risk engine recorded send"
        );
    }

    async fn apply_spam_penalty(&self, account_id: &AccountId, pattern: SpamPattern) {
        warn!(account_id = %account_id, pattern = ?pattern, "spam pattern detected");
        let _ = self
            .event_tx
            .send(RiskEvent::SpamPatternDetected {
                account_id: account_id.clone(),
            })
            .await;
        let _ = self
            .event_tx
            .send(RiskEvent::QuarantineRequested {
                account_id: account_id.clone(),
                reason: common::QuarantineReason::PatternDetected,
                duration_minutes: 30,
                ban_probability: 0.0,
            })
            .await;
    }

    /// Record an error outcome for an account.
    pub async fn record_error(&self, account_id: &AccountId, kind: ErrorKind) {
        let cell = self.cell_for(account_id).await;
        let now = Utc::now();

        let (snapshot, force_quarantine_minutes) = {
            let mut guard = cell.lock().await;
            guard.age_out(now);
            guard.events.push_back(WindowEvent {
                at: now,
                kind: WindowKind::Error(kind),
                recipient_id: None,
            });

            if matches!(kind, ErrorKind::Floodwait) {
                guard.consecutive_floodwaits_24h += 1;
            } else {
                guard.consecutive_floodwaits_24h = 0;
            }

            let floodwait_count = guard.floodwait_24h();
            let force = if guard.consecutive_floodwaits_24h >= 3 {
                Some(60 * floodwait_count as i64)
            } else {
                None
            };

            (guard.snapshot(account_id, now, &self.config), force)
        };

        if let Some(minutes) = force_quarantine_minutes {
            self.request_quarantine(
                account_id,
                common::QuarantineReason::Floodwait,
                minutes,
                snapshot.ban_probability,
            )
            .await;
        } else {
            self.maybe_quarantine(account_id, snapshot.ban_probability, now)
                .await;
        }
    }

    async fn maybe_quarantine(&self, account_id: &AccountId, ban_probability: f64, _now: DateTime<Utc>) {
        if let Some(minutes) = auto_quarantine_minutes(ban_probability, &self.config) {
            self.request_quarantine(
                account_id,
                common::QuarantineReason::HighBanRisk,
                minutes,
                ban_probability,
            )
            .await;
        }
    }

    async fn request_quarantine(
        &self,
        account_id: &AccountId,
        reason: common::QuarantineReason,
        duration_minutes: i64,
        ban_probability: f64,
    ) {
        warn!(
            account_id = %account_id,
            reason = %reason,
            duration_minutes,
            "risk engine requesting quarantine"
        );
        let _ = self
            .event_tx
            .send(RiskEvent::QuarantineRequested {
                account_id: account_id.clone(),
                reason,
                duration_minutes,
                ban_probability,
            })
            .await;
    }

    /// Mark an account as currently quarantined (or not), so `GetStatus`
    /// reports `risk_level = quarantined` consistently with the quarantine
    /// manager's source of truth.
    pub async fn set_quarantined(&self, account_id: &AccountId, quarantined: bool) {
        let cell = self.cell_for(account_id).await;
        let mut guard = cell.lock().await;
        guard.quarantined = quarantined;
    }

    /// Seeds this account's behavioral pattern scores from its activity
    /// envelope. Idempotent and cheap — called by the Send Gate on every
    /// `can_send` so a cell created by any path ends up seeded before its
    /// first `ban_probability` computation, without the risk engine itself
    /// depending on `activity`.
    pub async fn seed_behavioral_scores(
        &self,
        account_id: &AccountId,
        response_pattern_score: f64,
        timing_pattern_score: f64,
    ) {
        let cell = self.cell_for(account_id).await;
        let mut guard = cell.lock().await;
        guard.response_pattern_score = response_pattern_score;
        guard.timing_pattern_score = timing_pattern_score;
    }

    pub async fn get_status(&self, account_id: &AccountId) -> RiskSnapshot {
        let cell = self.cell_for(account_id).await;
        let now = Utc::now();
        let mut guard = cell.lock().await;
        guard.age_out(now);
        guard.snapshot(account_id, now, &self.config)
    }

    /// Age out all registered accounts' sliding windows. Called by the
    /// Supervisor at >=1 Hz.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let cells: Vec<_> = self.cells.read().await.values().cloned().collect();
        for cell in cells {
            let mut guard = cell.lock().await;
            guard.age_out(now);
        }
    }

    /// Explicit operator-facing daily counter reset, distinct from the
    /// sliding window which is always authoritative for the ban formula.
    pub async fn daily_reset(&self) {
        info!("risk engine daily reset event");
        let _ = self.event_tx.send(RiskEvent::DailyReset).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::QuarantineReason;

    fn make_engine(config: RiskConfig) -> (RiskEngine, mpsc::Receiver<RiskEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (RiskEngine::new(config, tx), rx)
    }

    #[tokio::test]
    async fn high_ban_probability_triggers_quarantine_request() {
        let (engine, mut rx) = make_engine(RiskConfig::default());
        let account: AccountId = "+1000".into();

        // High volume plus a rising generic error rate should cross the
        // quarantine threshold without tripping the spam-pattern detector
        // (every message text is distinct).
        for i in 0..60 {
            engine
                .record_send(&account, &format!("Message number {i} for you"), 100 + i)
                .await;
        }
        for _ in 0..10 {
            engine.record_error(&account, ErrorKind::Generic).await;
        }

        let mut saw_high_ban_risk = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await
        {
            if matches!(
                event,
                RiskEvent::QuarantineRequested {
                    reason: QuarantineReason::HighBanRisk,
                    ..
                }
            ) {
                saw_high_ban_risk = true;
                break;
            }
        }
        assert!(saw_high_ban_risk, "expected a HighBanRisk quarantine request");
    }

    #[tokio::test]
    async fn three_consecutive_floodwaits_force_quarantine() {
        let (engine, mut rx) = make_engine(RiskConfig::default());
        let account: AccountId = "+1001".into();

        engine.record_error(&account, ErrorKind::Floodwait).await;
        engine.record_error(&account, ErrorKind::Floodwait).await;
        engine.record_error(&account, ErrorKind::Floodwait).await;

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");

        assert!(matches!(
            event,
            RiskEvent::QuarantineRequested {
                reason: QuarantineReason::Floodwait,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn repetitive_spam_pattern_is_detected() {
        let (engine, mut rx) = make_engine(RiskConfig::default());
        let account: AccountId = "+1002".into();

        for i in 0..5 {
            engine.record_send(&account, "Hi", 200 + i).await;
        }

        let mut saw_spam = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await
        {
            if matches!(event, RiskEvent::SpamPatternDetected { .. }) {
                saw_spam = true;
                break;
            }
        }
        assert!(saw_spam, "expected a SpamPatternDetected event");
    }

    #[tokio::test]
    async fn status_reflects_accumulated_sends() {
        let (engine, _rx) = make_engine(RiskConfig::default());
        let account: AccountId = "+1003".into();

        engine.record_send(&account, "Hello there", 300).await;
        engine.record_send(&account, "Hello again", 301).await;

        let status = engine.get_status(&account).await;
        assert_eq!(status.messages_sent_24h, 2);
        assert_eq!(status.unique_recipients_24h, 2);
    }

    #[tokio::test]
    async fn safe_account_has_zero_probability() {
        let (engine, _rx) = make_engine(RiskConfig::default());
        let account: AccountId = "+1004".into();

        let status = engine.get_status(&account).await;
        assert_eq!(status.ban_probability, 0.0);
        assert_eq!(status.risk_level, RiskLevel::Safe);
    }
}
