use std::time::Duration;

use crate::{errors::Error, Result};

/// Longest salt accepted for password hashing.
pub const MAX_SALT_LEN: usize = 10;

/// Already-parsed runtime settings handed to the core components.
///
/// Environment parsing lives in the binary; everything here is typed.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Fixed salt mixed into every password hash.
    pub auth_salt: String,
    /// Deadline for a single credential or aggregate store call.
    pub store_timeout: Duration,
    /// Spacing of scheduler ticks; ticks land on multiples of this since midnight UTC.
    pub report_interval: Duration,
    /// Daily buckets untouched for this long are purged by the sweeper.
    pub sweep_stale_after: Duration,
    /// Display names of the report bots, used in the subscription instructions.
    pub daily_reporter_name: String,
    pub monthly_reporter_name: String,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.auth_salt.is_empty() {
            return Err(Error::Config("auth salt must not be empty".to_string()));
        }
        if self.auth_salt.chars().count() > MAX_SALT_LEN {
            return Err(Error::Config(format!(
                "auth salt is longer than {MAX_SALT_LEN} characters"
            )));
        }
        let interval = self.report_interval.as_secs();
        if interval < 60 || interval % 60 != 0 || (24 * 3600) % interval != 0 {
            return Err(Error::Config(format!(
                "report interval {interval}s must be whole minutes dividing a day"
            )));
        }
        if self.store_timeout.is_zero() {
            return Err(Error::Config("store timeout must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth_salt: "spend".to_string(),
            store_timeout: Duration::from_secs(10),
            report_interval: Duration::from_secs(30 * 60),
            sweep_stale_after: Duration::from_secs(26 * 3600),
            daily_reporter_name: "@daily_reporter_bot".to_string(),
            monthly_reporter_name: "@monthly_reporter_bot".to_string(),
        }
    }
}

/// Run a store call under the configured deadline.
pub async fn with_timeout<T, F>(op: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout { op, after }),
    }
}
