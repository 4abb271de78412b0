//! Option lists offered by the dialogue and parsing of the user's pick.

use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use std::fmt::Display;

use crate::config::ScheduleConfig;

/// How a reply relates to a numbered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick {
    /// Zero-based index into the list
    Index(usize),
    /// A number outside `1..=len`
    OutOfRange,
    /// Anything that is not a number
    Text(String),
}

/// Resolve a reply against a list of `len` entries numbered from 1.
/// Full-width digits are accepted.
pub fn pick(text: &str, len: usize) -> Pick {
    let trimmed = text.trim();
    let ascii: String = trimmed
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            _ => c,
        })
        .collect();

    if ascii.is_empty() || !ascii.chars().all(|c| c.is_ascii_digit()) {
        return Pick::Text(trimmed.to_string());
    }
    match ascii.parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Pick::Index(n - 1),
        _ => Pick::OutOfRange,
    }
}

/// `1. a` / `2. b` lines.
pub fn numbered<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The next `date_choices` days, starting with `today`.
pub fn date_options(schedule: &ScheduleConfig, today: NaiveDate) -> Vec<NaiveDate> {
    (0..i64::from(schedule.date_choices))
        .map(|offset| today + Duration::days(offset))
        .collect()
}

/// Start slots every `slot_minutes` from the day start, strictly before the day end.
pub fn start_slots(schedule: &ScheduleConfig) -> Vec<NaiveTime> {
    slot_grid(schedule)
        .filter(|m| *m < minutes(schedule.day_end))
        .filter_map(from_minutes)
        .collect()
}

/// End slots strictly after `start`, up to and including the day end, increasing.
pub fn end_slots(schedule: &ScheduleConfig, start: NaiveTime) -> Vec<NaiveTime> {
    let start = minutes(start);
    slot_grid(schedule)
        .filter(|m| *m > start && *m <= minutes(schedule.day_end))
        .filter_map(from_minutes)
        .collect()
}

fn slot_grid(schedule: &ScheduleConfig) -> impl Iterator<Item = u32> {
    let step = schedule.slot_minutes.max(1) as usize;
    (minutes(schedule.day_start)..=minutes(schedule.day_end)).step_by(step)
}

fn minutes(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn from_minutes(total: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(total / 60, total % 60, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_pick() {
        assert_eq!(pick("2", 3), Pick::Index(1));
        assert_eq!(pick(" ３ ", 3), Pick::Index(2));
        assert_eq!(pick("0", 3), Pick::OutOfRange);
        assert_eq!(pick("4", 3), Pick::OutOfRange);
        assert_eq!(pick("99999999999999999999999", 3), Pick::OutOfRange);
        assert_eq!(pick("山田", 3), Pick::Text("山田".to_string()));
        assert_eq!(pick("-1", 3), Pick::Text("-1".to_string()));
    }

    #[test]
    fn test_start_slots_exclude_day_end() {
        let slots = start_slots(&ScheduleConfig::default());
        assert_eq!(slots.len(), 30);
        assert_eq!(slots.first(), Some(&hm(6, 0)));
        assert_eq!(slots.last(), Some(&hm(20, 30)));
    }

    #[test]
    fn test_end_slots_strictly_after_start() {
        let schedule = ScheduleConfig::default();
        let slots = end_slots(&schedule, hm(10, 0));

        assert_eq!(slots.first(), Some(&hm(10, 30)));
        assert_eq!(slots.last(), Some(&hm(21, 0)));
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
        assert!(slots.iter().all(|t| *t > hm(10, 0) && *t <= schedule.day_end));
    }

    #[test]
    fn test_end_slots_for_last_start() {
        let slots = end_slots(&ScheduleConfig::default(), hm(20, 30));
        assert_eq!(slots, vec![hm(21, 0)]);
    }

    #[test]
    fn test_date_options_start_today() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let dates = date_options(&ScheduleConfig::default(), today);
        assert_eq!(dates.len(), 30);
        assert_eq!(dates[0], today);
        assert_eq!(dates[29], NaiveDate::from_ymd_opt(2024, 7, 14).unwrap());
    }

    #[test]
    fn test_numbered() {
        assert_eq!(numbered(["なし", "A"]), "1. なし\n2. A");
    }
}
