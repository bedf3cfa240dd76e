//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::{Money, TransactionId};
use saga::{RetryPolicy, UserProfile, WorkerConfig};

/// How payment captures are confirmed before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentVerification {
    /// Only captures registered with the verifier are admitted.
    Strict,
    /// Captures are trusted as reported. Development only.
    Permissive,
}

impl PaymentVerification {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "permissive" => Some(Self::Permissive),
            _ => None,
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` bind address (default: `"0.0.0.0"`)
/// - `PORT` listen port (default: `3000`)
/// - `RUST_LOG` tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` PostgreSQL connection string; unset selects the in-memory store
/// - `SAGA_MAX_ATTEMPTS`, `SAGA_INITIAL_BACKOFF_MS`, `SAGA_MAX_BACKOFF_MS`,
///   `SAGA_STEP_TIMEOUT_MS` retry policy
/// - `WORKER_CONCURRENCY`, `RECOVERY_INTERVAL_SECS` background worker
/// - `AUTH_REQUIRED` reject requests without gateway identity headers (default: `false`)
/// - `PAYMENT_VERIFICATION` `strict` or `permissive` (default: `strict`)
/// - `PAYMENT_CAPTURE_SEED` captures known to the strict verifier, as `txId|amount;...`
/// - `DIRECTORY_SEED` users for the in-memory directory, as `id|name|email|phone;...`
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub retry: RetryPolicy,
    pub worker: WorkerConfig,
    pub auth_required: bool,
    pub payment_verification: PaymentVerification,
    pub capture_seed: Vec<(TransactionId, Money)>,
    pub directory_seed: Vec<UserProfile>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let retry = RetryPolicy {
            max_attempts: parsed("SAGA_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.retry.max_attempts),
            initial_backoff: parsed("SAGA_INITIAL_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_backoff),
            max_backoff: parsed("SAGA_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_backoff),
            step_timeout: parsed("SAGA_STEP_TIMEOUT_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.step_timeout),
            ..defaults.retry
        };

        let worker = WorkerConfig {
            concurrency: parsed("WORKER_CONCURRENCY")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker.concurrency),
            recovery_interval: parsed("RECOVERY_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.worker.recovery_interval),
            ..defaults.worker
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            retry,
            worker,
            auth_required: lookup("AUTH_REQUIRED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.auth_required),
            payment_verification: lookup("PAYMENT_VERIFICATION")
                .and_then(|v| PaymentVerification::parse(&v))
                .unwrap_or(defaults.payment_verification),
            capture_seed: lookup("PAYMENT_CAPTURE_SEED")
                .map(|seed| parse_capture_seed(&seed))
                .unwrap_or_default(),
            directory_seed: lookup("DIRECTORY_SEED")
                .map(|seed| parse_directory_seed(&seed))
                .unwrap_or_default(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            retry: RetryPolicy::default(),
            worker: WorkerConfig::default(),
            auth_required: false,
            payment_verification: PaymentVerification::Strict,
            capture_seed: Vec::new(),
            directory_seed: Vec::new(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses `txId|amount` entries separated by `;`. Entries with a blank id or
/// an amount that is not a positive decimal are skipped.
fn parse_capture_seed(seed: &str) -> Vec<(TransactionId, Money)> {
    seed.split(';')
        .filter_map(|entry| {
            let (id, amount) = entry.split_once('|')?;
            let id = id.trim();
            if id.is_empty() {
                return None;
            }
            let amount = amount.trim().parse::<f64>().ok()?;
            let amount = Money::from_decimal(amount).ok()?;
            Some((TransactionId::new(id), amount))
        })
        .collect()
}

/// Parses `id|name|email|phone` entries separated by `;`. Email and phone
/// may be empty; entries without an id are skipped.
fn parse_directory_seed(seed: &str) -> Vec<UserProfile> {
    seed.split(';')
        .filter_map(|entry| {
            let mut fields = entry.split('|').map(str::trim);
            let id = fields.next().filter(|id| !id.is_empty())?;
            let name = fields.next().unwrap_or_default();
            let mut profile = UserProfile::new(id, name);
            if let Some(email) = fields.next().filter(|e| !e.is_empty()) {
                profile = profile.with_email(email);
            }
            if let Some(phone) = fields.next().filter(|p| !p.is_empty()) {
                profile = profile.with_phone(phone);
            }
            Some(profile)
        })
        .collect()
}
