use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque account identifier — typically the account's phone number.
pub type AccountId = String;
/// Opaque identifier for a scraped member (Telegram user id).
pub type TargetId = i64;
/// Campaign identifier, assigned at creation time.
pub type CampaignId = String;

/// Telegram client type an account's fingerprint presents as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ClientType {
    Android,
    Ios,
    Desktop,
}

impl ClientType {
    /// The type that follows this one in the android -> ios -> desktop -> android cycle.
    pub fn next_in_cycle(self) -> ClientType {
        match self {
            ClientType::Android => ClientType::Ios,
            ClientType::Ios => ClientType::Desktop,
            ClientType::Desktop => ClientType::Android,
        }
    }
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientType::Android => write!(f, "android"),
            ClientType::Ios => write!(f, "ios"),
            ClientType::Desktop => write!(f, "desktop"),
        }
    }
}

/// Lifecycle status of an account. Accounts are created externally; the
/// core only reads this to decide whether a dispatcher may use one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum AccountStatus {
    Ready,
    Warming,
    Suspended,
    Banned,
}

/// Ban-risk classification derived from `ban_probability` and quarantine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Moderate,
    High,
    Critical,
    Quarantined,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
            RiskLevel::Quarantined => "quarantined",
        };
        write!(f, "{s}")
    }
}

/// Reason an account was placed into quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum QuarantineReason {
    HighBanRisk,
    Floodwait,
    RepeatedErrors,
    PatternDetected,
    Manual,
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuarantineReason::HighBanRisk => "high_ban_risk",
            QuarantineReason::Floodwait => "floodwait",
            QuarantineReason::RepeatedErrors => "repeated_errors",
            QuarantineReason::PatternDetected => "pattern_detected",
            QuarantineReason::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Kind of error reported by `RecordError`, distinct from the wire-level
/// `SendOutcome` so the risk engine can reason about it independent of the
/// Telegram client's exact error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Floodwait,
    UserBlocked,
    PrivacyRestricted,
    InvalidUser,
    Generic,
}

/// Outcome of a `TelegramClient::send_message` call. Closed sum — the
/// dispatcher must handle every variant explicitly.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent,
    FloodWait(u64),
    UserBlocked,
    UserPrivacyRestricted,
    PeerIdInvalid,
    UserDeactivated,
    UserBannedInChannel,
    Generic(String),
}

/// Decision returned by the Send Gate. Closed sum — never a free-form string.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow { mandatory_delay_s: f64 },
    Delay { seconds: f64, reason: String },
    Deny { reason: String, release_at: Option<DateTime<Utc>> },
}

/// Member profile as returned by the external member store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub user_id: TargetId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

/// Point-in-time snapshot of an account's risk state, returned by `GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub account_id: AccountId,
    pub messages_sent_1h: u32,
    pub messages_sent_24h: u32,
    pub unique_recipients_24h: u32,
    pub errors_24h: u32,
    pub floodwait_24h: u32,
    pub diversity_score: f64,
    pub response_pattern_score: f64,
    pub timing_pattern_score: f64,
    pub ban_probability: f64,
    pub risk_level: RiskLevel,
}

/// Durable per-account client fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub account_id: AccountId,
    pub client_type: ClientType,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub lang_code: String,
    pub system_lang_code: String,
    pub layer: u32,
    pub timezone_offset: i32,
    pub created_at: DateTime<Utc>,
    pub last_rotated_at: DateTime<Utc>,
    pub rotation_count: u32,
}

impl Fingerprint {
    /// Whether this fingerprint has gone stale and should be rotated.
    pub fn is_due_for_rotation(&self, now: DateTime<Utc>, max_age_days: i64) -> bool {
        (now - self.last_rotated_at) >= chrono::Duration::days(max_age_days)
    }
}

/// A durable, time-bounded prohibition on sending from an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub account_id: AccountId,
    pub reason: QuarantineReason,
    pub quarantined_at: DateTime<Utc>,
    pub release_at: DateTime<Utc>,
    pub metrics_snapshot: Option<String>,
}

/// Aggregate quarantine history for one account.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuarantineStats {
    pub total_quarantines: i64,
    pub total_minutes: i64,
    pub last_quarantine_at: Option<DateTime<Utc>>,
}

/// Per-account hourly activity envelope plus derived sleep window,
/// reported for operator dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub sleep_start_hour: u32,
    pub sleep_end_hour: u32,
    pub is_sleeping_now: bool,
    pub current_multiplier: f64,
}

/// Status of a campaign's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Queued,
    Running,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Queued => "queued",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Status of one `(campaign_id, target_id)` message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
    Blocked,
    PrivacyRestricted,
    InvalidUser,
    RateLimited,
}

impl MessageStatus {
    /// A terminal status is never overwritten — it is the final word on
    /// this `(campaign_id, target_id)` pair.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }
}

/// A bulk DM campaign: target list, account pool, schedule, counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub template: String,
    pub status: CampaignStatus,
    pub target_ids: Vec<TargetId>,
    pub account_ids: Vec<AccountId>,
    pub rate_limit_delay_s: f64,
    pub max_messages_per_hour: u32,
    pub max_messages_per_account: u32,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub active_hours_start: Option<u32>,
    pub active_hours_end: Option<u32>,
    pub active_days: Option<Vec<u32>>,
    pub timezone: String,
    pub recurring: bool,
    pub recurrence_interval_days: Option<i64>,
    pub auto_paused: bool,
    pub sent_count: u32,
    pub failed_count: u32,
    pub blocked_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Record of one rendered, dispatched (or pending) campaign message.
/// Unique on `(campaign_id, target_id)` — the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMessage {
    pub campaign_id: CampaignId,
    pub target_id: TargetId,
    pub account_id: AccountId,
    pub text: String,
    pub status: MessageStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// Commands accepted by a running `CampaignScheduler`, sent from the
/// Telegram control bot or the dashboard API.
#[derive(Debug, Clone)]
pub enum CampaignCommand {
    Start(CampaignId),
    Pause(CampaignId),
    Resume(CampaignId),
    Cancel(CampaignId),
}

/// Events emitted by the Risk Engine and Quarantine Manager for operator
/// alerting (bridged to Telegram in the binary, same as the teacher's
/// `RiskEvent` forwarder).
#[derive(Debug, Clone)]
pub enum RiskEvent {
    QuarantineRequested {
        account_id: AccountId,
        reason: QuarantineReason,
        duration_minutes: i64,
        ban_probability: f64,
    },
    SpamPatternDetected {
        account_id: AccountId,
    },
    AccountReleased {
        account_id: AccountId,
    },
    DailyReset,
}
