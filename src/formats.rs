//! Built-in `format` validators
//!
//! Two tables are available: `full` (calendar-aware date/time checks and
//! structural URI parsing) and `fast` (cheaper regular expressions for the
//! date/time and URI families). User formats are regexes, predicates or async
//! predicates, and by default apply to strings only.

use crate::canonical::JsonType;
use crate::config::FormatMode;
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Synchronous format predicate
pub type FormatPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Asynchronous format predicate
pub type AsyncFormatPredicate = Arc<dyn Fn(Value) -> BoxFuture<'static, bool> + Send + Sync>;

/// How a format is checked
#[derive(Clone)]
pub enum FormatCheck {
    Regex(Regex),
    Predicate(FormatPredicate),
    Async(AsyncFormatPredicate),
}

/// A named format and the data types it applies to
#[derive(Clone)]
pub struct FormatDefinition {
    pub check: FormatCheck,
    pub types: Vec<JsonType>,
}

impl fmt::Debug for FormatDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.check {
            FormatCheck::Regex(re) => format!("regex({})", re.as_str()),
            FormatCheck::Predicate(_) => "predicate".to_string(),
            FormatCheck::Async(_) => "async".to_string(),
        };
        f.debug_struct("FormatDefinition")
            .field("check", &kind)
            .field("types", &self.types)
            .finish()
    }
}

impl FormatDefinition {
    /// A string format backed by a regular expression
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            check: FormatCheck::Regex(Regex::new(pattern)?),
            types: vec![JsonType::String],
        })
    }

    /// A predicate over the raw value
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            check: FormatCheck::Predicate(Arc::new(f)),
            types: vec![JsonType::String],
        }
    }

    /// A predicate over string values
    pub fn string_predicate(f: fn(&str) -> bool) -> Self {
        Self::predicate(move |value| value.as_str().map(f).unwrap_or(true))
    }

    /// An async predicate; compiled validators using it become async
    pub fn async_predicate<F>(f: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self {
            check: FormatCheck::Async(Arc::new(f)),
            types: vec![JsonType::String],
        }
    }

    /// Restrict the data types this format applies to
    pub fn for_types(mut self, types: &[JsonType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn is_async(&self) -> bool {
        matches!(self.check, FormatCheck::Async(_))
    }

    /// Whether the format has an opinion about this value at all
    pub fn applies_to(&self, value: &Value) -> bool {
        self.types.iter().any(|t| t.matches(value))
    }

    /// Check a value, driving async predicates to completion
    pub fn test(&self, value: &Value) -> bool {
        if !self.applies_to(value) {
            return true;
        }
        match &self.check {
            FormatCheck::Regex(re) => value.as_str().map(|s| re.is_match(s)).unwrap_or(true),
            FormatCheck::Predicate(f) => f(value),
            FormatCheck::Async(f) => futures::executor::block_on(f(value.clone())),
        }
    }
}

/// The built-in table for a mode; `Off` registers nothing
pub fn builtin_formats(mode: FormatMode) -> HashMap<String, FormatDefinition> {
    let mut table = HashMap::new();
    if mode == FormatMode::Off {
        return table;
    }

    let regexes: &[(&str, &str)] = &[
        (
            "email",
            r"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-zA-Z0-9!#$%&'*+/=?^_`{|}~-]+)*@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        ),
        (
            "ipv4",
            r"^(?:(?:25[0-5]|2[0-4]\d|1\d{2}|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d{2}|[1-9]?\d)$",
        ),
        (
            "ipv6",
            r"^(?:(?:[0-9a-fA-F]{1,4}:){7}[0-9a-fA-F]{1,4}|(?:[0-9a-fA-F]{1,4}:){1,7}:|(?:[0-9a-fA-F]{1,4}:){1,6}:[0-9a-fA-F]{1,4}|(?:[0-9a-fA-F]{1,4}:){1,5}(?::[0-9a-fA-F]{1,4}){1,2}|(?:[0-9a-fA-F]{1,4}:){1,4}(?::[0-9a-fA-F]{1,4}){1,3}|(?:[0-9a-fA-F]{1,4}:){1,3}(?::[0-9a-fA-F]{1,4}){1,4}|(?:[0-9a-fA-F]{1,4}:){1,2}(?::[0-9a-fA-F]{1,4}){1,5}|[0-9a-fA-F]{1,4}:(?::[0-9a-fA-F]{1,4}){1,6}|:(?::[0-9a-fA-F]{1,4}){1,7}|::)$",
        ),
        (
            "uuid",
            r"(?i)^(?:urn:uuid:)?[0-9a-f]{8}-(?:[0-9a-f]{4}-){3}[0-9a-f]{12}$",
        ),
        (
            "url",
            r"(?i)^(?:https?|ftp)://(?:[^\s:@/]+(?::[^\s@/]*)?@)?(?:[a-z0-9\x{00a1}-\x{ffff}](?:[a-z0-9\x{00a1}-\x{ffff}-]*[a-z0-9\x{00a1}-\x{ffff}])?(?:\.[a-z0-9\x{00a1}-\x{ffff}](?:[a-z0-9\x{00a1}-\x{ffff}-]*[a-z0-9\x{00a1}-\x{ffff}])?)*)(?::\d{2,5})?(?:[/?#][^\s]*)?$",
        ),
        (
            "uri-template",
            r#"(?i)^(?:(?:[^\x00-\x20"'<>%\\^`{|}]|%[0-9a-f]{2})|\{[+#./;?&=,!@|]?(?:[a-z0-9_]|%[0-9a-f]{2})+(?::[1-9][0-9]{0,3}|\*)?(?:,(?:[a-z0-9_]|%[0-9a-f]{2})+(?::[1-9][0-9]{0,3}|\*)?)*\})*$"#,
        ),
        ("json-pointer", r"^(?:/(?:[^~/]|~0|~1)*)*$"),
        (
            "json-pointer-uri-fragment",
            r"(?i)^#(?:/(?:[a-z0-9_\-.!$&'()*+,;:=@]|%[0-9a-f]{2}|~0|~1)*)*$",
        ),
        (
            "relative-json-pointer",
            r"^(?:0|[1-9][0-9]*)(?:#|(?:/(?:[^~/]|~0|~1)*)*)$",
        ),
        (
            "byte",
            r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$",
        ),
        (
            "idn-email",
            r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$",
        ),
        (
            "iri",
            r#"(?i)^[a-z][a-z0-9+\-.]*:[^\x00-\x20"<>\\^`{|}]*$"#,
        ),
        (
            "iri-reference",
            r#"(?i)^(?:[a-z][a-z0-9+\-.]*:[^\x00-\x20"<>\\^`{|}]*|[^\x00-\x20"<>\\^`{|}]*(?:#[^\x00-\x20"<>\\^`{|}]*)?)$"#,
        ),
    ];
    for (name, pattern) in regexes {
        insert_regex(&mut table, name, pattern);
    }

    table.insert("hostname".into(), FormatDefinition::string_predicate(is_hostname));
    table.insert("idn-hostname".into(), FormatDefinition::string_predicate(is_hostname));
    table.insert("duration".into(), FormatDefinition::string_predicate(is_duration));
    table.insert("regex".into(), FormatDefinition::string_predicate(is_regex));
    table.insert(
        "int32".into(),
        FormatDefinition::predicate(is_int32).for_types(&[JsonType::Number]),
    );
    table.insert(
        "int64".into(),
        FormatDefinition::predicate(is_int64).for_types(&[JsonType::Number]),
    );

    match mode {
        FormatMode::Fast => {
            let fast: &[(&str, &str)] = &[
                ("date", r"^\d{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])$"),
                (
                    "time",
                    r"(?i)^(?:[01]\d|2[0-3]):[0-5]\d:[0-5]\d(?:\.\d{1,9})?(?:z|[+-](?:0\d|1[0-2]):[0-5]\d)?$",
                ),
                (
                    "date-time",
                    r"(?i)^\d{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])[t\s](?:[01]\d|2[0-3]):[0-5]\d:[0-5]\d(?:\.\d{1,9})?(?:z|[+-](?:0\d|1[0-2]):[0-5]\d)?$",
                ),
                (
                    "iso-time",
                    r"^(?:[01]\d|2[0-3]):[0-5]\d:[0-5]\d(?:\.\d{1,9})?$",
                ),
                (
                    "iso-date-time",
                    r"(?i)^\d{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])[t\s](?:[01]\d|2[0-3]):[0-5]\d:[0-5]\d(?:\.\d{1,9})?$",
                ),
                ("uri", r"(?i)^[a-z][a-z0-9+.-]*:[^\s]*$"),
                (
                    "uri-reference",
                    r"(?i)^(?:[a-z][a-z0-9+.-]*:[^\s]*|/[^\s]*|[^\s:/?#]+(?:/[^\s]*)?(?:\?[^\s#]*)?(?:#[^\s]*)?)?$",
                ),
            ];
            for (name, pattern) in fast {
                insert_regex(&mut table, name, pattern);
            }
        }
        _ => {
            table.insert("date".into(), FormatDefinition::string_predicate(is_date));
            table.insert(
                "time".into(),
                FormatDefinition::string_predicate(|s| is_time(s, true)),
            );
            table.insert(
                "date-time".into(),
                FormatDefinition::string_predicate(|s| is_date_time(s, true)),
            );
            table.insert(
                "iso-time".into(),
                FormatDefinition::string_predicate(|s| is_time(s, false)),
            );
            table.insert(
                "iso-date-time".into(),
                FormatDefinition::string_predicate(|s| is_date_time(s, false)),
            );
            table.insert("uri".into(), FormatDefinition::string_predicate(is_uri));
            table.insert(
                "uri-reference".into(),
                FormatDefinition::string_predicate(is_uri_reference),
            );
        }
    }
    table
}

fn insert_regex(table: &mut HashMap<String, FormatDefinition>, name: &str, pattern: &str) {
    match FormatDefinition::regex(pattern) {
        Ok(def) => {
            table.insert(name.to_string(), def);
        }
        Err(e) => tracing::error!(format = name, error = %e, "built-in format regex failed to compile"),
    }
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn is_date(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return false;
    }
    match (digits(parts[0]), digits(parts[1]), digits(parts[2])) {
        (Some(year), Some(month), Some(day)) => {
            (1..=12).contains(&month) && day >= 1 && day <= days_in_month(year, month)
        }
        _ => false,
    }
}

/// `HH:MM:SS[.frac][Z|±HH[:]MM]`, leap seconds only at 23:59 UTC
fn is_time(s: &str, require_offset: bool) -> bool {
    if s.len() < 8 || !s.is_char_boundary(8) {
        return false;
    }
    let (clock, mut rest) = s.split_at(8);
    let fields: Vec<&str> = clock.split(':').collect();
    if fields.len() != 3 || fields.iter().any(|f| f.len() != 2) {
        return false;
    }
    let (Some(hr), Some(min), Some(sec)) = (digits(fields[0]), digits(fields[1]), digits(fields[2]))
    else {
        return false;
    };
    if let Some(frac) = rest.strip_prefix('.') {
        let len = frac.bytes().take_while(|b| b.is_ascii_digit()).count();
        if len == 0 {
            return false;
        }
        rest = &frac[len..];
    }

    let (offset_sign, tz_h, tz_m) = if rest.is_empty() {
        if require_offset {
            return false;
        }
        (1i32, 0u32, 0u32)
    } else if rest.eq_ignore_ascii_case("z") {
        (1, 0, 0)
    } else {
        let sign = match rest.as_bytes()[0] {
            b'+' => 1,
            b'-' => -1,
            _ => return false,
        };
        let body = &rest[1..];
        let (h, m) = match body.len() {
            2 => (body, "00"),
            4 => (&body[..2], &body[2..]),
            5 if body.as_bytes()[2] == b':' => (&body[..2], &body[3..]),
            _ => return false,
        };
        match (digits(h), digits(m)) {
            (Some(h), Some(m)) => (sign, h, m),
            _ => return false,
        }
    };
    if tz_h > 23 || tz_m > 59 {
        return false;
    }
    if hr <= 23 && min <= 59 && sec <= 59 {
        return true;
    }
    if sec != 60 || hr > 23 || min > 59 {
        return false;
    }
    // leap second: must fall on 23:59 UTC
    let utc_min = min as i32 - tz_m as i32 * offset_sign;
    let utc_hr = hr as i32 - tz_h as i32 * offset_sign - if utc_min < 0 { 1 } else { 0 };
    (utc_hr == 23 || utc_hr == -1) && (utc_min == 59 || utc_min == -1)
}

fn is_date_time(s: &str, require_offset: bool) -> bool {
    let mut parts = s.splitn(2, |c: char| c == 'T' || c == 't' || c == ' ');
    match (parts.next(), parts.next()) {
        (Some(date), Some(time)) => is_date(date) && is_time(time, require_offset),
        _ => false,
    }
}

fn is_hostname(s: &str) -> bool {
    let trimmed = s.strip_suffix('.').unwrap_or(s);
    if trimmed.is_empty() || s.len() > 253 {
        return false;
    }
    trimmed.split('.').all(|label| {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes.len() <= 63
            && bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
    })
}

/// ISO 8601 duration: `P1Y2M`, `PT3H`, `P2W`
fn is_duration(s: &str) -> bool {
    let Some(body) = s.strip_prefix('P') else {
        return false;
    };
    if body.is_empty() {
        return false;
    }
    if let Some(weeks) = body.strip_suffix('W') {
        return digits(weeks).is_some();
    }
    let (date_part, time_part) = match body.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };
    let units_ok = |part: &str, units: &[char]| -> bool {
        let mut last = 0usize;
        let mut pending = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() {
                pending.push(c);
                continue;
            }
            let Some(pos) = units.iter().position(|u| *u == c) else {
                return false;
            };
            if pending.is_empty() || pos + 1 <= last {
                return false;
            }
            last = pos + 1;
            pending.clear();
        }
        pending.is_empty()
    };
    if !units_ok(date_part, &['Y', 'M', 'D']) {
        return false;
    }
    match time_part {
        Some(t) => !t.is_empty() && units_ok(t, &['H', 'M', 'S']),
        None => true,
    }
}

fn is_regex(s: &str) -> bool {
    !s.contains("\\Z") && Regex::new(s).is_ok()
}

fn is_uri(s: &str) -> bool {
    !s.contains(char::is_whitespace) && !s.contains('\\') && url::Url::parse(s).is_ok()
}

fn is_uri_reference(s: &str) -> bool {
    if s.contains(char::is_whitespace) || s.contains('\\') {
        return false;
    }
    if url::Url::parse(s).is_ok() {
        return true;
    }
    url::Url::parse("http://reference.invalid/")
        .and_then(|base| base.join(s))
        .is_ok()
}

fn is_int32(value: &Value) -> bool {
    match value.as_f64() {
        Some(f) => f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64,
        None => true,
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => crate::canonical::is_integer(n),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(table: &HashMap<String, FormatDefinition>, name: &str, value: Value) -> bool {
        table[name].test(&value)
    }

    #[test]
    fn test_full_dates() {
        let t = builtin_formats(FormatMode::Full);
        assert!(check(&t, "date", json!("2024-02-29")));
        assert!(!check(&t, "date", json!("2023-02-29")));
        assert!(!check(&t, "date", json!("2023-13-01")));
        assert!(check(&t, "date-time", json!("2024-01-01T10:00:00Z")));
        assert!(check(&t, "date-time", json!("2024-01-01t10:00:00.123+02:00")));
        assert!(!check(&t, "date-time", json!("2024-01-01T10:00:00")));
        assert!(check(&t, "iso-date-time", json!("2024-01-01T10:00:00")));
        assert!(check(&t, "time", json!("23:59:60Z")));
        assert!(!check(&t, "time", json!("22:59:60Z")));
    }

    #[test]
    fn test_fast_dates_are_looser() {
        let t = builtin_formats(FormatMode::Fast);
        assert!(check(&t, "date", json!("2023-02-31")));
        assert!(!check(&t, "date", json!("2023-2-1")));
    }

    #[test]
    fn test_network_formats() {
        let t = builtin_formats(FormatMode::Full);
        assert!(check(&t, "email", json!("a.b@example.com")));
        assert!(!check(&t, "email", json!("not-an-email")));
        assert!(check(&t, "ipv4", json!("192.168.0.1")));
        assert!(!check(&t, "ipv4", json!("256.1.1.1")));
        assert!(check(&t, "ipv6", json!("::1")));
        assert!(check(&t, "hostname", json!("example.com")));
        assert!(!check(&t, "hostname", json!("-bad.com")));
        assert!(check(&t, "uri", json!("https://example.com/a?b#c")));
        assert!(!check(&t, "uri", json!("relative/path")));
        assert!(check(&t, "uri-reference", json!("relative/path")));
        assert!(check(&t, "uuid", json!("123e4567-e89b-12d3-a456-426614174000")));
    }

    #[test]
    fn test_misc_formats() {
        let t = builtin_formats(FormatMode::Full);
        assert!(check(&t, "duration", json!("P1Y2M3DT4H")));
        assert!(check(&t, "duration", json!("P2W")));
        assert!(!check(&t, "duration", json!("P")));
        assert!(!check(&t, "duration", json!("PT")));
        assert!(!check(&t, "duration", json!("P1M1Y")));
        assert!(check(&t, "regex", json!("^a+$")));
        assert!(!check(&t, "regex", json!("(")));
        assert!(check(&t, "json-pointer", json!("/a/~0b")));
        assert!(check(&t, "int32", json!(42)));
        assert!(!check(&t, "int32", json!(3_000_000_000u64)));
        // formats ignore values of other types
        assert!(check(&t, "email", json!(5)));
        assert!(check(&t, "int32", json!("text")));
    }

    #[test]
    fn test_off_mode_is_empty() {
        assert!(builtin_formats(FormatMode::Off).is_empty());
    }
}
