use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::NaiveTime;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub token_secret: String,
    /// Cron expression (with seconds field) for the stale-session sweep.
    pub sweep_cron: String,
    /// A closed session may be reopened only before this time of day.
    pub close_cutoff_time: NaiveTime,
    /// The sweep closes open sessions created before this time of day.
    pub close_check_time: NaiveTime,
    pub room_code_length: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

        let token_secret = lookup("TOKEN_SECRET").ok_or(anyhow!("TOKEN_SECRET must be set"))?;
        if token_secret.len() < 16 {
            return Err(anyhow!("TOKEN_SECRET must be at least 16 bytes"));
        }

        let sweep_cron = var("SWEEP_CRON", "0 30 23 * * *");
        cron::Schedule::from_str(&sweep_cron).with_context(|| format!("invalid SWEEP_CRON {sweep_cron:?}"))?;

        let room_code_length = var("ROOM_CODE_LENGTH", "8");
        let room_code_length: usize = room_code_length
            .parse()
            .with_context(|| format!("invalid ROOM_CODE_LENGTH {room_code_length:?}"))?;
        if !(4..=32).contains(&room_code_length) {
            return Err(anyhow!("ROOM_CODE_LENGTH must be between 4 and 32"));
        }

        Ok(Config {
            database_url: var("DATABASE_URL", "sqlite://classroom.db?mode=rwc"),
            bind_addr: var("BIND_ADDR", "0.0.0.0:8080"),
            token_secret,
            sweep_cron,
            close_cutoff_time: parse_time_of_day("CLOSE_CUTOFF_TIME", &var("CLOSE_CUTOFF_TIME", "23:00"))?,
            close_check_time: parse_time_of_day("CLOSE_CHECK_TIME", &var("CLOSE_CHECK_TIME", "23:30"))?,
            room_code_length,
        })
    }
}

fn parse_time_of_day(key: &str, raw: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .with_context(|| format!("invalid {key} {raw:?}, expected HH:MM or HH:MM:SS"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("TOKEN_SECRET", "0123456789abcdef")])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.close_cutoff_time, NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        assert_eq!(config.close_check_time, NaiveTime::from_hms_opt(23, 30, 0).unwrap());
        assert_eq!(config.room_code_length, 8);
    }

    #[test]
    fn times_accept_seconds() {
        let config = Config::from_lookup(lookup(&[
            ("TOKEN_SECRET", "0123456789abcdef"),
            ("CLOSE_CUTOFF_TIME", "18:10:30"),
            ("CLOSE_CHECK_TIME", "18:00"),
        ]))
        .unwrap();
        assert_eq!(config.close_cutoff_time, NaiveTime::from_hms_opt(18, 10, 30).unwrap());
        assert_eq!(config.close_check_time, NaiveTime::from_hms_opt(18, 0, 0).unwrap());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("TOKEN_SECRET", "0123456789abcdef"), ("CLOSE_CHECK_TIME", "25:00")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TOKEN_SECRET", "0123456789abcdef"), ("SWEEP_CRON", "every day")])).is_err());
        assert!(Config::from_lookup(lookup(&[("TOKEN_SECRET", "0123456789abcdef"), ("ROOM_CODE_LENGTH", "2")])).is_err());
    }
}
