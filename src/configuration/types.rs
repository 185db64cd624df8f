use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, Utc};
use chrono_tz::Tz;

use crate::error_handling::types::ConfigError;

/// Zone in which the VPN server writes `Connected Since` and in which
/// disconnect times are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZoneSetting {
    /// Whatever the host reports as local time.
    #[default]
    Local,
    Fixed(FixedOffset),
    /// IANA zone such as `Europe/Bucharest`, following its DST rules.
    Named(Tz),
}

impl TimeZoneSetting {
    /// Wall time of `instant` in this zone.
    pub fn wall_time(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            TimeZoneSetting::Local => instant.with_timezone(&Local).naive_local(),
            TimeZoneSetting::Fixed(offset) => instant.with_timezone(offset).naive_local(),
            TimeZoneSetting::Named(tz) => instant.with_timezone(tz).naive_local(),
        }
    }
}

impl FromStr for TimeZoneSetting {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "" | "local" => return Ok(TimeZoneSetting::Local),
            "utc" | "z" => return Ok(TimeZoneSetting::Fixed(utc_offset())),
            _ => {}
        }

        let invalid = || ConfigError::InvalidTimezone(value.to_string());
        let (sign, rest) = match value.as_bytes()[0] {
            b'+' => (1, &value[1..]),
            b'-' => (-1, &value[1..]),
            _ => {
                return value
                    .parse::<Tz>()
                    .map(TimeZoneSetting::Named)
                    .map_err(|_| invalid())
            }
        };
        let (hours, minutes) = match rest.split_once(':') {
            Some((h, m)) => (h, m),
            None if rest.len() == 4 => rest.split_at(2),
            None => (rest, "0"),
        };
        let hours: i32 = hours.parse().map_err(|_| invalid())?;
        let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
        if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
            return Err(invalid());
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(TimeZoneSetting::Fixed)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for TimeZoneSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZoneSetting::Local => write!(f, "local"),
            TimeZoneSetting::Fixed(offset) => write!(f, "{}", offset),
            TimeZoneSetting::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}
