//! Fns to read variables from the environment more conveniently, and the configuration the
//! indexer reads from it.

use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::debug;

use crate::beacon_chain::ValidatorIndex;

const SECRET_LOG_BLACKLIST: [&str; 1] = ["DATABASE_URL"];

fn obfuscate_if_secret(blacklist: &[&str], key: &str, value: &str) -> String {
    if blacklist.contains(&key) {
        let mut last_four = value.to_string();
        last_four.drain(0..value.len().saturating_sub(4));
        format!("****{last_four}")
    } else {
        value.to_string()
    }
}

/// Get an environment variable, encoding found or missing as Option, and error otherwise.
pub fn get_env_var(key: &str) -> Result<Option<String>> {
    let var = match env::var(key) {
        Err(env::VarError::NotPresent) => None,
        Err(e) => return Err(anyhow!("failed to read env var {key}: {e}")),
        Ok(var) => Some(var),
    };

    if let Some(ref existing_var) = var {
        let output = obfuscate_if_secret(&SECRET_LOG_BLACKLIST, key, existing_var);
        debug!("env var {key}: {output}");
    } else {
        debug!("env var {key} requested but not found")
    };

    Ok(var)
}

fn get_required_env_var(key: &str) -> Result<String> {
    get_env_var(key)?.ok_or_else(|| anyhow!("{key} is required"))
}

pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    get_env_var(key)?
        .map(|var| match var.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            str => Err(anyhow!("invalid bool value {str} for {key}")),
        })
        .transpose()
}

fn get_env_parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_var(key)?
        .map(|var| {
            var.trim()
                .parse::<T>()
                .map_err(|e| anyhow!("invalid value {var} for {key}: {e}"))
        })
        .transpose()
}

/// Parses a comma separated list of IANA timezone names. `ALL` selects every known timezone.
pub fn parse_timezones(text: &str) -> Result<Vec<Tz>> {
    if text.trim().eq_ignore_ascii_case("all") {
        return Ok(chrono_tz::TZ_VARIANTS.to_vec());
    }

    let timezones = text
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<Tz>()
                .map_err(|e| anyhow!("unknown timezone {name}: {e}"))
        })
        .collect::<Result<Vec<_>>>()?;

    if timezones.is_empty() {
        bail!("expected at least one timezone");
    }

    Ok(timezones)
}

pub fn parse_validator_indexes(text: &str) -> Result<Vec<ValidatorIndex>> {
    text.split(',')
        .map(str::trim)
        .filter(|index| !index.is_empty())
        .map(|index| {
            let index = index
                .parse::<ValidatorIndex>()
                .with_context(|| format!("invalid validator index {index}"))?;
            if index < 0 {
                bail!("validator indexes are non-negative, got {index}");
            }
            Ok(index)
        })
        .collect()
}

pub struct EnvConfig {
    pub beacon_request_timeout: Duration,
    pub beacon_retry_max_elapsed: Duration,
    pub beacon_url: String,
    pub commit_batch_size: usize,
    pub cycle_interval: Duration,
    pub db_url: String,
    pub log_json: bool,
    pub log_perf: bool,
    pub metrics_port: u16,
    pub start_date: NaiveDate,
    pub timezones: Vec<Tz>,
    /// `None` indexes every validator.
    pub validator_indexes: Option<Vec<ValidatorIndex>>,
}

const DEFAULT_START_DATE: &str = "2020-01-01";

pub fn get_env_config() -> Result<EnvConfig> {
    let commit_batch_size = get_env_parsed("COMMIT_BATCH_SIZE")?.unwrap_or(3);
    if commit_batch_size == 0 {
        bail!("COMMIT_BATCH_SIZE must be at least 1");
    }

    let start_date = match get_env_var("START_DATE")? {
        Some(text) => text,
        None => DEFAULT_START_DATE.to_string(),
    };
    let start_date = NaiveDate::from_str(start_date.trim())
        .with_context(|| format!("invalid START_DATE {start_date}, expected YYYY-MM-DD"))?;

    let timezones = match get_env_var("TIMEZONES")? {
        Some(text) => parse_timezones(&text)?,
        None => vec![Tz::UTC],
    };

    let validator_indexes = get_env_var("VALIDATOR_INDEXES")?
        .map(|text| parse_validator_indexes(&text))
        .transpose()?;

    Ok(EnvConfig {
        beacon_request_timeout: Duration::from_secs(
            get_env_parsed("BEACON_REQUEST_TIMEOUT_SECONDS")?.unwrap_or(120),
        ),
        beacon_retry_max_elapsed: Duration::from_secs(
            get_env_parsed("BEACON_RETRY_MAX_ELAPSED_SECONDS")?.unwrap_or(60),
        ),
        beacon_url: get_required_env_var("BEACON_URL")?,
        commit_batch_size,
        cycle_interval: Duration::from_secs(
            get_env_parsed("CYCLE_INTERVAL_SECONDS")?.unwrap_or(60),
        ),
        db_url: get_required_env_var("DATABASE_URL")?,
        log_json: get_env_bool("LOG_JSON")?.unwrap_or(false),
        log_perf: get_env_bool("LOG_PERF")?.unwrap_or(false),
        metrics_port: get_env_parsed("METRICS_PORT")?.unwrap_or(8000),
        start_date,
        timezones,
        validator_indexes,
    })
}
