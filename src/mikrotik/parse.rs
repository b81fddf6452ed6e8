// SPDX-License-Identifier: MIT
// Copyright (c) 2025 Jesof

//! Lenient field lookups over RouterOS records

use super::types::Record;

pub(crate) fn text(record: &Record, key: &str) -> String {
    record.get(key).cloned().unwrap_or_default()
}

/// Field value, `None` when missing or empty
pub(crate) fn opt_text(record: &Record, key: &str) -> Option<String> {
    record.get(key).filter(|v| !v.is_empty()).cloned()
}

pub(crate) fn number(record: &Record, key: &str) -> u64 {
    record.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

pub(crate) fn flag(record: &Record, key: &str) -> bool {
    record.get(key).is_some_and(|v| v == "true" || v == "yes")
}

/// Duration field in seconds, `None` when missing or empty
pub(crate) fn opt_duration(record: &Record, key: &str) -> Option<u64> {
    opt_text(record, key).map(|v| parse_uptime_to_seconds(&v))
}

/// Parse a RouterOS duration string to seconds
///
/// Accepts formats like: 1d2h3m4s, 2w1d, 05:23:10, 1h5m, 30s
pub fn parse_uptime_to_seconds(s: &str) -> u64 {
    if s.contains(':') {
        // [Nd]HH:MM:SS or MM:SS
        let (days, clock) = match s.split_once('d') {
            Some((d, rest)) => (d.parse::<u64>().unwrap_or(0), rest),
            None => (0, s),
        };
        let parts: Vec<u64> = clock
            .split(':')
            .map(|p| p.parse::<u64>().unwrap_or(0))
            .collect();
        let clock_secs = match parts.as_slice() {
            [h, m, sec] => h * 3600 + m * 60 + sec,
            [m, sec] => m * 60 + sec,
            _ => 0,
        };
        return days * 86400 + clock_secs;
    }
    let mut total = 0u64;
    let mut num = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num.push(ch);
            continue;
        }
        if num.is_empty() {
            continue;
        }
        let value = num.parse::<u64>().unwrap_or(0);
        let unit_seconds = match ch {
            'w' => 7 * 24 * 3600,
            'd' => 24 * 3600,
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => 0,
        };
        total += value * unit_seconds;
        num.clear();
    }
    if !num.is_empty() {
        // trailing number without unit -> seconds
        total += num.parse::<u64>().unwrap_or(0);
    }
    total
}
