//! Reveal-time parsing: RFC 3339 timestamps or offsets like `90s`, `2h`, `3d`.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};

pub fn parse_when(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }
    Ok(now + parse_offset(input)?)
}

pub fn parse_offset(input: &str) -> Result<Duration> {
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    if digits.is_empty() {
        bail!("expected a timestamp or an offset like 90s, 15m, 2h, 3d: {input:?}");
    }
    let amount: i64 = digits.parse().map_err(|_| anyhow!("offset too large: {input:?}"))?;

    let seconds_per_unit = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        "w" => 604_800,
        other => bail!("unknown time unit {other:?} (use s, m, h, d or w)"),
    };
    amount
        .checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| anyhow!("offset too large: {input:?}"))
}

/// `1d 2h 3m 4s`, dropping leading zero units
pub fn human(duration: Duration) -> String {
    let mut secs = duration.num_seconds().max(0);
    let mut parts = Vec::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs >= size || !parts.is_empty() {
            parts.push(format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    parts.push(format!("{secs}s"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_offsets() {
        assert_eq!(parse_offset("90").unwrap(), Duration::seconds(90));
        assert_eq!(parse_offset("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_offset("15m").unwrap(), Duration::minutes(15));
        assert_eq!(parse_offset("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_offset("3d").unwrap(), Duration::days(3));
        assert_eq!(parse_offset("1w").unwrap(), Duration::days(7));

        assert!(parse_offset("").is_err());
        assert!(parse_offset("h").is_err());
        assert!(parse_offset("5y").is_err());
        assert!(parse_offset("99999999999999999999d").is_err());
    }

    #[test]
    fn test_absolute_time() {
        let at = parse_when("2030-01-01T00:00:00Z", now()).unwrap();
        assert_eq!(at.timestamp(), 1_893_456_000);

        let at = parse_when("2030-01-01T02:00:00+02:00", now()).unwrap();
        assert_eq!(at.timestamp(), 1_893_456_000);

        assert_eq!(parse_when("90s", now()).unwrap(), now() + Duration::seconds(90));
    }

    #[test]
    fn test_human() {
        assert_eq!(human(Duration::seconds(42)), "42s");
        assert_eq!(human(Duration::seconds(3_600)), "1h 0m 0s");
        assert_eq!(human(Duration::seconds(90_061)), "1d 1h 1m 1s");
        assert_eq!(human(Duration::seconds(-5)), "0s");
    }
}
