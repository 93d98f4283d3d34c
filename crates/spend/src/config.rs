use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use spend_core::{errors::Error, settings::Settings, Result};

/// Typed process configuration.
///
/// Read from the environment, with an optional `.env` file filling in
/// anything not already set.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub main_bot_token: String,
    pub daily_bot_token: String,
    pub monthly_bot_token: String,

    // Storage
    pub users_file: Option<PathBuf>,

    pub settings: Settings,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .and_then(non_empty)
                .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
        };
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key).and_then(non_empty) {
                None => Ok(default),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::Config(format!("{key} must be a whole number, got {v:?}"))),
            }
        };

        let main_bot_token = required("TG_MAIN_BOT_TOKEN")?;
        let daily_bot_token = required("TG_DAILY_REPORTER_BOT_TOKEN")?;
        let monthly_bot_token = required("TG_MONTHLY_REPORTER_BOT_TOKEN")?;

        let defaults = Settings::default();
        let settings = Settings {
            auth_salt: required("AUTHORIZATION_SALT")?,
            store_timeout: Duration::from_millis(number("STORE_TIMEOUT_MS", 10_000)?),
            report_interval: Duration::from_secs(number("REPORT_INTERVAL_MINUTES", 30)? * 60),
            sweep_stale_after: Duration::from_secs(number("SWEEP_STALE_HOURS", 26)? * 3600),
            daily_reporter_name: lookup("TG_DAILY_REPORTER_BOT_NAME")
                .and_then(non_empty)
                .unwrap_or(defaults.daily_reporter_name),
            monthly_reporter_name: lookup("TG_MONTHLY_REPORTER_BOT_NAME")
                .and_then(non_empty)
                .unwrap_or(defaults.monthly_reporter_name),
        };
        settings.validate()?;

        Ok(Self {
            main_bot_token,
            daily_bot_token,
            monthly_bot_token,
            users_file: lookup("USERS_FILE").and_then(non_empty).map(PathBuf::from),
            settings,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let Some((key, val)) = parse_dotenv_line(raw) else {
            continue;
        };
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (k, v) = line.split_once('=')?;
    let key = k.trim();
    if key.is_empty() {
        return None;
    }

    let mut val = v.trim();
    // Strip optional surrounding quotes.
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        val = &val[1..val.len() - 1];
    }
    Some((key.to_string(), val.to_string()))
}
