// Shared embed templates and time formatting for bot replies

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::types::Embed;

pub const POSITIVE_COLOR: u32 = 0x2ECC71;
pub const NEGATIVE_COLOR: u32 = 0xE74C3C;
pub const NEUTRAL_COLOR: u32 = 0x3498DB;
pub const GOLD_COLOR: u32 = 0xF1C40F;

/// Format used for every absolute timestamp the bot prints (UTC).
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

pub const TOO_MANY_LINKS: &str = "... Too many to display...";

/// "✅ mention, body" embed.
pub fn positive(title: &str, mention: &str, body: &str) -> Embed {
    Embed::new(title)
        .color(POSITIVE_COLOR)
        .description(format!("✅ {}, {}", mention, body))
}

/// "❌ mention, body" embed.
pub fn negative(title: &str, mention: &str, body: &str) -> Embed {
    Embed::new(title)
        .color(NEGATIVE_COLOR)
        .description(format!("❌ {}, {}", mention, body))
}

pub fn neutral(title: &str, mention: &str, body: &str) -> Embed {
    Embed::new(title)
        .color(NEUTRAL_COLOR)
        .description(format!("{}, {}", mention, body))
}

pub fn insufficient_permissions(mention: &str, required: &str, command: &str) -> Embed {
    negative(
        "Insufficient permissions",
        mention,
        &format!("you need to be at least {} to use `{}`.", required, command),
    )
}

pub fn minute_to_datetime(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(minute * 60, 0).single().unwrap_or_else(Utc::now)
}

pub fn datetime_to_minute(time: DateTime<Utc>) -> i64 {
    time.timestamp() / 60
}

pub fn format_date(time: DateTime<Utc>) -> String {
    time.format(DATE_FORMAT).to_string()
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("{} {}", count, unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Human readable time left until `target`, e.g. "2 days, 3 hours, 1 minute".
pub fn format_remaining(target: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = target.signed_duration_since(now);
    if remaining <= Duration::zero() {
        return "now".to_string();
    }

    let days = remaining.num_days();
    let hours = remaining.num_hours() % 24;
    let minutes = remaining.num_minutes() % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(plural(days, "day"));
    }
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(plural(minutes, "minute"));
    }
    parts.join(", ")
}

/// Elapsed time since `time`, e.g. "3 days, 2 hours ago".
pub fn format_ago(time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if now.signed_duration_since(time) < Duration::minutes(1) {
        return "In the last minute...".to_string();
    }
    format!("{} ago", format_remaining(now, time))
}

/// Overdue time of a fired action: `{d}day {h}hr {m}min {s}sec`.
pub fn format_late_by(late_by: Duration) -> String {
    let late_by = late_by.max(Duration::zero());
    format!(
        "{}day {}hr {}min {}sec",
        late_by.num_days(),
        late_by.num_hours() % 24,
        late_by.num_minutes() % 60,
        late_by.num_seconds() % 60
    )
}

/// Space-joined links that fit in `max_len`, ending with `end_message` when some are cut.
pub fn limited_link_list(links: &[String], end_message: &str, max_len: usize) -> String {
    let mut out = String::new();
    for (i, link) in links.iter().enumerate() {
        let separator = if out.is_empty() { 0 } else { 1 };
        let remaining = links.len() - i;
        // Keep room for the end message while more links remain after this one
        let reserve = if remaining > 1 { end_message.len() + 1 } else { 0 };
        if out.len() + separator + link.len() + reserve > max_len {
            if out.len() + separator + end_message.len() <= max_len {
                if separator == 1 {
                    out.push(' ');
                }
                out.push_str(end_message);
            }
            return out;
        }
        if separator == 1 {
            out.push(' ');
        }
        out.push_str(link);
    }
    out
}

/// Replace `{0}` in a configured template.
pub fn apply_template(template: &str, value: &str) -> String {
    template.replace("{0}", value)
}

/// One page of `items` (1-based, clamped) plus the total page count.
pub fn paginate<T>(items: &[T], page: usize, per_page: usize) -> (&[T], usize, usize) {
    let total_pages = items.len().div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);
    let start = ((page - 1) * per_page).min(items.len());
    let end = (start + per_page).min(items.len());
    (&items[start..end], page, total_pages)
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
