//! Parsing of "3 days 2h reason text" style command arguments.
//!
//! Quantity+unit tokens are only honoured in the leading date section: the
//! first non-whitespace character outside every token starts the free-text
//! message, and tokens appearing after it are left as part of that message.

use chrono::{DateTime, Duration, Months, Utc};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

fn duration_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        RegexBuilder::new(r"(\d+)\s?(months?|days?|d|weeks?|wks?|w|hours?|hrs?|h|minutes?|mins?|m)")
            .case_insensitive(true)
            .build()
            .expect("duration regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDuration {
    pub trigger: DateTime<Utc>,
    /// Free text after the date section; empty when none was given.
    pub message: String,
}

impl ParsedDuration {
    /// False when no usable quantity was found, which callers reject as "no valid time".
    pub fn has_time(&self, reference: DateTime<Utc>) -> bool {
        self.trigger != reference
    }

    pub fn message_or_default(&self) -> String {
        if self.message.is_empty() {
            "n/a".to_string()
        } else {
            self.message.clone()
        }
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\r' | '\n' | '\t')
}

/// Split `args` into an absolute trigger time and the remaining message.
pub fn parse_duration(args: &str, reference: DateTime<Utc>) -> ParsedDuration {
    let matches: Vec<_> = duration_regex().captures_iter(args).collect();

    let mut coverage = vec![false; args.len()];
    for caps in &matches {
        if let Some(m) = caps.get(0) {
            coverage[m.start()..m.end()].iter_mut().for_each(|c| *c = true);
        }
    }

    let message_start = args
        .char_indices()
        .find(|(idx, c)| !is_separator(*c) && !coverage[*idx])
        .map(|(idx, _)| idx);

    let mut trigger = reference;
    for caps in &matches {
        let (Some(whole), Some(measure), Some(unit)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let in_date_section = match message_start {
            None => true,
            Some(start) => whole.end() <= start,
        };
        if in_date_section {
            trigger = apply_unit(trigger, measure.as_str(), unit.as_str());
        }
    }

    ParsedDuration {
        trigger,
        message: message_start.map(|idx| args[idx..].to_string()).unwrap_or_default(),
    }
}

fn apply_unit(time: DateTime<Utc>, measure: &str, unit: &str) -> DateTime<Utc> {
    let measure: i64 = match measure.parse() {
        Ok(value) if value > 0 => value,
        _ => return time,
    };

    let shifted = match unit.to_lowercase().as_str() {
        "month" | "months" => u32::try_from(measure)
            .ok()
            .and_then(|m| time.checked_add_months(Months::new(m))),
        "day" | "days" | "d" => Duration::try_days(measure).and_then(|d| time.checked_add_signed(d)),
        "week" | "weeks" | "wk" | "wks" | "w" => Duration::try_weeks(measure).and_then(|d| time.checked_add_signed(d)),
        "hour" | "hours" | "hr" | "hrs" | "h" => Duration::try_hours(measure).and_then(|d| time.checked_add_signed(d)),
        "minute" | "minutes" | "min" | "mins" | "m" => {
            Duration::try_minutes(measure).and_then(|d| time.checked_add_signed(d))
        }
        _ => None,
    };
    shifted.unwrap_or(time)
}
