//! Configuration management for Lambda functions.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use std::env;
use std::str::FromStr;

use crate::{Error, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Full Postgres URL; takes precedence over host/name/secret
    pub database_url: Option<String>,
    /// Database host
    pub db_host: Option<String>,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: Option<String>,
    /// Google calendar the branch events are mirrored into
    pub google_calendar_id: String,
    /// Dialogue date/time windows
    pub schedule: ScheduleConfig,
    /// How long an idle conversation is kept
    pub session_ttl: Duration,
    /// Tolerance used when looking for an existing remote event
    pub dedup_window: Duration,
    /// Forward window scanned by the duplicate cleanup
    pub cleanup_window: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            db_host: env::var("DB_HOST").ok(),
            db_name: env::var("DB_NAME").unwrap_or_else(|_| "branch_calendar".to_string()),
            db_secret_arn: env::var("DB_SECRET_ARN").ok(),
            google_calendar_id: env::var("GOOGLE_CALENDAR_ID").unwrap_or_else(|_| "primary".to_string()),
            schedule: ScheduleConfig::from_env()?,
            session_ttl: Duration::minutes(env_or("SESSION_TTL_MINUTES", 30)?),
            dedup_window: Duration::minutes(env_or("DEDUP_WINDOW_MINUTES", 30)?),
            cleanup_window: Duration::days(env_or("CLEANUP_WINDOW_DAYS", 90)?),
        })
    }
}

/// LINE channel credentials.
#[derive(Debug, Clone)]
pub struct LineConfig {
    pub channel_secret: String,
    pub channel_access_token: String,
}

impl LineConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            channel_secret: env::var("LINE_CHANNEL_SECRET")
                .map_err(|_| Error::Config("LINE_CHANNEL_SECRET not set".to_string()))?,
            channel_access_token: env::var("LINE_CHANNEL_ACCESS_TOKEN")
                .map_err(|_| Error::Config("LINE_CHANNEL_ACCESS_TOKEN not set".to_string()))?,
        })
    }
}

/// Local time zone and the daily window offered by the dialogue.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub offset: FixedOffset,
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub slot_minutes: u32,
    pub date_choices: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(9 * 3600).unwrap_or(Utc.fix()),
            day_start: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 30,
            date_choices: 30,
        }
    }
}

impl ScheduleConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let hours: i32 = env_or("TZ_OFFSET_HOURS", 9)?;
        let offset = FixedOffset::east_opt(hours * 3600)
            .ok_or_else(|| Error::Config(format!("TZ_OFFSET_HOURS out of range: {}", hours)))?;

        let day_start = env_time("DAY_START")?.unwrap_or(defaults.day_start);
        let day_end = env_time("DAY_END")?.unwrap_or(defaults.day_end);
        if day_end <= day_start {
            return Err(Error::Config("DAY_END must be after DAY_START".to_string()));
        }

        let slot_minutes: u32 = env_or("SLOT_MINUTES", defaults.slot_minutes)?;
        if slot_minutes == 0 {
            return Err(Error::Config("SLOT_MINUTES must be positive".to_string()));
        }

        Ok(Self {
            offset,
            day_start,
            day_end,
            slot_minutes,
            date_choices: env_or("DATE_CHOICES", defaults.date_choices)?,
        })
    }

    /// Today's date in the branch's time zone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Convert a local wall-clock date and time to UTC.
    pub fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    /// Start of the local day as a UTC instant.
    pub fn day_start_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        self.to_utc(date, NaiveTime::MIN)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_time(key: &str) -> Result<Option<NaiveTime>> {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map(Some)
            .map_err(|_| Error::Config(format!("Invalid time for {} (expected HH:MM): {}", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_utc_applies_offset() {
        let schedule = ScheduleConfig::default();
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let time = NaiveTime::from_hms_opt(10, 0, 0).unwrap();

        let utc = schedule.to_utc(date, time);
        assert_eq!(utc.to_rfc3339(), "2024-06-15T01:00:00+00:00");
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let schedule = ScheduleConfig::default();
        let now = DateTime::parse_from_rfc3339("2024-06-14T16:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(
            schedule.local_date(now),
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
    }
}
