use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKUP_TIME: &str = "02:00";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl Frequency {
    /// Minimum spacing between two automatic backups.
    pub fn interval(self) -> Duration {
        match self {
            Frequency::Daily => Duration::hours(24),
            Frequency::Weekly => Duration::days(7),
            Frequency::Monthly => Duration::days(30),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        })
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("unknown backup frequency: {other}")),
        }
    }
}

/// Automatic backup settings, persisted as JSON in the settings store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePolicy {
    pub enabled: bool,
    pub frequency: Frequency,
    pub time: String,
    pub last_backup: Option<DateTime<Utc>>,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Weekly,
            time: DEFAULT_BACKUP_TIME.to_owned(),
            last_backup: None,
        }
    }
}

impl SchedulePolicy {
    /// Configured time of day; falls back to 02:00 when the stored value is
    /// unreadable.
    pub fn time_of_day(&self) -> NaiveTime {
        parse_time_of_day(&self.time)
            .or_else(|| parse_time_of_day(DEFAULT_BACKUP_TIME))
            .unwrap_or(NaiveTime::MIN)
    }
}

/// Parses a 24-hour `HH:MM` string.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_disabled_weekly_at_two() {
        let policy = SchedulePolicy::default();
        assert!(!policy.enabled);
        assert_eq!(policy.frequency, Frequency::Weekly);
        assert_eq!(policy.time, "02:00");
        assert!(policy.last_backup.is_none());
    }

    #[test]
    fn intervals_per_frequency() {
        assert_eq!(Frequency::Daily.interval(), Duration::hours(24));
        assert_eq!(Frequency::Weekly.interval(), Duration::days(7));
        assert_eq!(Frequency::Monthly.interval(), Duration::days(30));
    }

    #[test]
    fn policy_json_shape() {
        let json = serde_json::to_value(SchedulePolicy::default()).unwrap();
        assert_eq!(json["frequency"], "weekly");
        assert_eq!(json["lastBackup"], serde_json::Value::Null);
        let back: SchedulePolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, SchedulePolicy::default());
    }

    #[test]
    fn time_parsing() {
        assert_eq!(parse_time_of_day("07:30"), NaiveTime::from_hms_opt(7, 30, 0));
        assert!(parse_time_of_day("25:00").is_none());
        assert!(parse_time_of_day("noon").is_none());
        let broken = SchedulePolicy {
            time: "later".into(),
            ..SchedulePolicy::default()
        };
        assert_eq!(broken.time_of_day(), NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!("Monthly".parse::<Frequency>(), Ok(Frequency::Monthly));
        assert!("hourly".parse::<Frequency>().is_err());
    }
}
