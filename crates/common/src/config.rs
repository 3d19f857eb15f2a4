/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram control bot
    pub telegram_token: String,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Dashboard / API
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Database
    pub database_url: String,

    // Risk formula tunables (spec §9 Open Question: avoid hardcoding)
    pub risk_quarantine_threshold: f64,
    pub risk_critical_threshold: f64,
    pub risk_high_threshold: f64,

    // Fingerprint rotation
    pub fingerprint_max_age_days: i64,

    // Supervisor tick cadence
    pub supervisor_tick_ms: u64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_allowed_user_ids = required_env("TELEGRAM_ALLOWED_USER_IDS")
            .split(',')
            .map(|s| {
                s.trim().parse::<i64>().unwrap_or_else(|_| {
                    panic!(
                        "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{}'",
                        s.trim()
                    )
                })
            })
            .collect();

        Config {
            telegram_token: required_env("TELEGRAM_TOKEN"),
            telegram_allowed_user_ids,
            dashboard_token: required_env("DASHBOARD_TOKEN"),
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            database_url: required_env("DATABASE_URL"),
            risk_quarantine_threshold: optional_env("RISK_QUARANTINE_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.75),
            risk_critical_threshold: optional_env("RISK_CRITICAL_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
            risk_high_threshold: optional_env("RISK_HIGH_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.3),
            fingerprint_max_age_days: optional_env("FINGERPRINT_MAX_AGE_DAYS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            supervisor_tick_ms: optional_env("SUPERVISOR_TICK_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
