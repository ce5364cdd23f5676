//! Timezone-aware 5-field cron evaluator and schedule validation
//! (spec §4.7).

use chrono::{DateTime, Datelike, Timelike, Utc};

/// Resolve cron presets (`@daily`, …) to their canonical 5-field form.
pub fn resolve_preset(schedule: &str) -> String {
    match schedule.trim() {
        "@yearly" | "@annually" => "0 0 1 1 *".to_string(),
        "@monthly" => "0 0 1 * *".to_string(),
        "@weekly" => "0 0 * * 0".to_string(),
        "@daily" | "@midnight" => "0 0 * * *".to_string(),
        "@hourly" => "0 * * * *".to_string(),
        other => other.to_string(),
    }
}

pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

fn matches_naive(cron: &str, dt: &chrono::NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    field_matches(fields[0], dt.minute())
        && field_matches(fields[1], dt.hour())
        && field_matches(fields[2], dt.day())
        && field_matches(fields[3], dt.month())
        && field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

pub fn matches(cron: &str, dt: &DateTime<Utc>) -> bool {
    matches_naive(cron, &dt.naive_utc())
}

/// Compute the next occurrence after `after`, evaluated in `tz`. DST
/// gaps are skipped; fall-back ambiguity resolves to the earliest mapping.
pub fn next_occurrence(cron: &str, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;

    let local_after = after.with_timezone(&tz).naive_local();
    let next_min_secs = 60 - (local_after.second() as i64);
    let mut candidate = local_after + chrono::Duration::seconds(next_min_secs);
    candidate = candidate.with_second(0).unwrap_or(candidate);

    let max_checks = 366 * 24 * 60;
    for _ in 0..max_checks {
        if matches_naive(cron, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
                chrono::LocalResult::None => {}
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

struct FieldRange {
    min: u32,
    max: u32,
}

const FIELD_RANGES: [FieldRange; 5] = [
    FieldRange { min: 0, max: 59 }, // minute
    FieldRange { min: 0, max: 23 }, // hour
    FieldRange { min: 1, max: 31 }, // day of month
    FieldRange { min: 1, max: 12 }, // month
    FieldRange { min: 0, max: 7 },  // day of week (0 and 7 both Sunday)
];

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];

fn validate_field(raw: &str, range: &FieldRange, name: &str) -> Result<(), String> {
    for part in raw.split(',') {
        if part.is_empty() {
            return Err(format!("{name} field has an empty comma segment"));
        }
        if part == "*" {
            continue;
        }
        let (step_base, step) = match part.split_once('/') {
            Some((base, step_s)) => {
                let step: u32 = step_s
                    .parse()
                    .map_err(|_| format!("{name} field step must be a positive integer: {part}"))?;
                if step < 1 {
                    return Err(format!("{name} field step must be >= 1: {part}"));
                }
                (base, Some(step))
            }
            None => (part, None),
        };

        if step_base != "*" {
            if let Some((start_s, end_s)) = step_base.split_once('-') {
                let start: u32 = start_s
                    .parse()
                    .map_err(|_| format!("{name} field has a non-numeric range start: {part}"))?;
                let end: u32 = end_s
                    .parse()
                    .map_err(|_| format!("{name} field has a non-numeric range end: {part}"))?;
                if start > end {
                    return Err(format!("{name} field range start must be <= end: {part}"));
                }
                if start < range.min || end > range.max {
                    return Err(format!(
                        "{name} field range {part} out of bounds [{}, {}]",
                        range.min, range.max
                    ));
                }
            } else {
                let value: u32 = step_base
                    .parse()
                    .map_err(|_| format!("{name} field must match [0-9*,/-]+: {part}"))?;
                if value < range.min || value > range.max {
                    return Err(format!(
                        "{name} field value {value} out of bounds [{}, {}]",
                        range.min, range.max
                    ));
                }
            }
        } else if step.is_none() {
            return Err(format!("{name} field has bare '*' with no step: {part}"));
        }
    }
    Ok(())
}

/// Validate a 5-field cron expression per spec §4.7 "Schedule validation".
/// Presets (`@daily`, …) are resolved first.
pub fn validate(schedule: &str) -> Result<(), String> {
    let resolved = resolve_preset(schedule);
    let fields: Vec<&str> = resolved.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!("cron expression must have 5 fields, got {}: {resolved}", fields.len()));
    }
    for (i, field) in fields.iter().enumerate() {
        if !field.chars().all(|c| "0123456789*,/-".contains(c)) {
            return Err(format!("{} field contains invalid characters: {field}", FIELD_NAMES[i]));
        }
        validate_field(field, &FIELD_RANGES[i], FIELD_NAMES[i])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_five_minutes_matches() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        assert!(matches("*/5 * * * *", &dt));
        let dt2 = Utc.with_ymd_and_hms(2024, 6, 15, 10, 3, 0).unwrap();
        assert!(!matches("*/5 * * * *", &dt2));
    }

    #[test]
    fn next_occurrence_finds_next_half_hour() {
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let next = next_occurrence("30 * * * *", &after, chrono_tz::UTC).unwrap();
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn validate_accepts_presets() {
        assert!(validate("@daily").is_ok());
        assert!(validate("@hourly").is_ok());
    }

    #[test]
    fn validate_rejects_wrong_field_count() {
        assert!(validate("* * * *").is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_minute() {
        assert!(validate("60 * * * *").is_err());
    }

    #[test]
    fn validate_rejects_inverted_range() {
        assert!(validate("0 17-9 * * *").is_err());
    }

    #[test]
    fn validate_rejects_zero_step() {
        assert!(validate("*/0 * * * *").is_err());
    }

    #[test]
    fn validate_accepts_every_minute() {
        assert!(validate("*/1 * * * *").is_ok());
        assert!(validate("* * * * *").is_ok());
    }

    #[test]
    fn validate_accepts_dow_0_and_7_as_sunday() {
        assert!(validate("0 0 * * 0").is_ok());
        assert!(validate("0 0 * * 7").is_ok());
        assert!(validate("0 0 * * 8").is_err());
    }

    #[test]
    fn validate_rejects_non_numeric_field() {
        assert!(validate("a * * * *").is_err());
    }
}
