/// Value types and the detection registry.
///
/// Each column carries one `ValueType`. A type knows how to recognize raw
/// values (`test`), order them (`compare`), project them onto a number line
/// (`numeric`), and rewrite them into canonical storage form (`coerce`).
/// `coerce` is idempotent: re-coercing an already-coerced value is a no-op.
///
/// Nulls sort before every non-null value and compare equal to each other,
/// for every type.

use crate::error::{Result, TableError};
use crate::value::Value;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[-+]?(\d+\.?\d*|\.\d+)([eE][-+]?\d+)?\s*$").unwrap()
    })
}

/// The closed set of column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Accepts anything; numeric is a best-effort parse.
    Mixed,
    Str,
    Boolean,
    Number,
    /// An instant, parsed from strings against a configurable format.
    Time,
}

/// Per-column options interpreted by the type layer.
#[derive(Debug, Clone, Default)]
pub struct TypeOptions {
    /// Time format for parsing and display, e.g. `"YYYY/MM/DD"`.
    /// `None` accepts ISO-8601 dates and datetimes.
    pub format: Option<String>,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Mixed => "mixed",
            ValueType::Str => "string",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::Time => "time",
        }
    }

    /// Whether a raw value is admissible for this type.
    pub fn test(&self, value: &Value, options: &TypeOptions) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            ValueType::Mixed => true,
            // Everything has a string form.
            ValueType::Str => !matches!(value, Value::List(_)),
            ValueType::Boolean => match value {
                Value::Bool(_) => true,
                Value::Str(s) => s == "true" || s == "false",
                _ => false,
            },
            ValueType::Number => match value {
                Value::Number(_) => true,
                Value::Str(s) => number_pattern().is_match(s),
                _ => false,
            },
            ValueType::Time => match value {
                Value::Time(_) => true,
                Value::Number(_) => true,
                Value::Str(s) => parse_time(s, options.format.as_deref()).is_some(),
                _ => false,
            },
        }
    }

    /// Rewrite a raw value into canonical storage form. Idempotent.
    pub fn coerce(&self, value: Value, options: &TypeOptions) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        match self {
            ValueType::Mixed => value,
            ValueType::Str => match value {
                Value::Str(_) => value,
                other => Value::Str(other.to_string()),
            },
            ValueType::Boolean => match value {
                Value::Bool(_) => value,
                Value::Str(s) => Value::Bool(s == "true"),
                _ => Value::Null,
            },
            ValueType::Number => match value {
                Value::Number(_) => value,
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                Value::Bool(b) => Value::Number(if b { 1.0 } else { 0.0 }),
                _ => Value::Null,
            },
            ValueType::Time => match value {
                Value::Time(_) => value,
                Value::Number(n) => Value::Time(n as i64),
                Value::Str(s) => parse_time(&s, options.format.as_deref())
                    .map(Value::Time)
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
        }
    }

    /// Project a stored value onto the number line, if it has one.
    pub fn numeric(&self, value: &Value) -> Option<f64> {
        match self {
            ValueType::Mixed => match value {
                Value::Number(n) => Some(*n),
                Value::Time(ms) => Some(*ms as f64),
                Value::Str(s) => s.trim().parse::<f64>().ok(),
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            },
            ValueType::Str => None,
            ValueType::Boolean => value.as_bool().map(|b| if b { 1.0 } else { 0.0 }),
            ValueType::Number => value.as_f64(),
            // Epoch milliseconds.
            ValueType::Time => value.as_time().map(|ms| ms as f64),
        }
    }

    /// Total order over stored values. Nulls sort first and equal each other.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        match self {
            ValueType::Str => cmp_strings(a, b),
            ValueType::Boolean => match (a.as_bool(), b.as_bool()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => cmp_strings(a, b),
            },
            ValueType::Number | ValueType::Time | ValueType::Mixed => {
                match (self.numeric(a), self.numeric(b)) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                    // Non-numeric mixed values order by string form.
                    _ => cmp_strings(a, b),
                }
            }
        }
    }
}

fn cmp_strings(a: &Value, b: &Value) -> Ordering {
    a.to_string().cmp(&b.to_string())
}

/// Detection order for untyped values. The permissive types (`string`, then
/// `mixed`) go last so `boolean`/`number`/`time` can claim values first.
pub struct TypeRegistry {
    order: Vec<ValueType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        TypeRegistry {
            order: vec![
                ValueType::Boolean,
                ValueType::Number,
                ValueType::Time,
                ValueType::Str,
                ValueType::Mixed,
            ],
        }
    }
}

/// Policy for a detection sample containing more than one distinct type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectPolicy {
    /// Fall back to `mixed`.
    #[default]
    Lenient,
    /// Fail the parse.
    Strict,
}

/// Values sampled per column when auto-detecting its type.
const DETECT_SAMPLE: usize = 5;

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first registered type whose `test` accepts the value. Strings that
    /// look like nothing else land on `string`; non-strings land on `mixed`.
    pub fn type_of(&self, value: &Value, options: &TypeOptions) -> ValueType {
        for ty in &self.order {
            if ty.test(value, options) {
                return *ty;
            }
        }
        ValueType::Str
    }

    /// Detect a column's type from its leading non-null, non-empty values.
    ///
    /// An empty sample detects as `mixed`. A sample spanning several types
    /// resolves per `policy`.
    pub fn detect(
        &self,
        name: &str,
        values: &[Value],
        options: &TypeOptions,
        policy: DetectPolicy,
    ) -> Result<ValueType> {
        let mut seen: Vec<ValueType> = Vec::new();
        for value in values
            .iter()
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
            .take(DETECT_SAMPLE)
        {
            let ty = self.type_of(value, options);
            if !seen.contains(&ty) {
                seen.push(ty);
            }
        }
        match seen.len() {
            0 => Ok(ValueType::Mixed),
            1 => Ok(seen[0]),
            _ => match policy {
                DetectPolicy::Lenient => Ok(ValueType::Mixed),
                DetectPolicy::Strict => Err(TableError::Parse(format!(
                    "column '{}' mixes types {:?} in its sample",
                    name,
                    seen.iter().map(|t| t.name()).collect::<Vec<_>>()
                ))),
            },
        }
    }
}

// ============================================================================
// Time parsing and formatting
// ============================================================================
//
// Civil-date math from https://howardhinnant.github.io/date_algorithms.html.

fn ymd_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z / 146_097 } else { (z - 146_096) / 146_097 };
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn days_from_ymd(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y / 400 } else { (y - 399) / 400 };
    let yoe = (y - era * 400) as u64;
    let m = month as u64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as u64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i64 - 719_468
}

/// Parse an instant into epoch milliseconds.
///
/// With a format, the string is matched token by token (`YYYY`, `MM`, `DD`,
/// `HH`, `mm`, `ss`; any other character must match literally). Without one,
/// ISO-8601 dates (`YYYY-MM-DD`) and datetimes (`T` or space separated,
/// optional fractional seconds, optional trailing `Z`) are accepted.
pub fn parse_time(s: &str, format: Option<&str>) -> Option<i64> {
    match format {
        Some(fmt) => parse_with_format(s.trim(), fmt),
        None => parse_iso(s.trim()),
    }
}

fn parse_with_format(s: &str, fmt: &str) -> Option<i64> {
    let mut chars = s.chars().peekable();
    let (mut year, mut month, mut day) = (1970i64, 1u32, 1u32);
    let (mut hour, mut minute, mut second) = (0u32, 0u32, 0u32);

    let mut f = fmt.chars().peekable();
    while let Some(&fc) = f.peek() {
        let token: String = if fc.is_ascii_alphabetic() {
            let mut tok = String::new();
            while f.peek() == Some(&fc) {
                tok.push(f.next().unwrap());
            }
            tok
        } else {
            f.next();
            // Literal separator must match exactly.
            if chars.next() != Some(fc) {
                return None;
            }
            continue;
        };
        let width = token.len();
        let mut digits = String::new();
        for _ in 0..width {
            match chars.peek() {
                Some(c) if c.is_ascii_digit() => digits.push(chars.next().unwrap()),
                _ => break,
            }
        }
        if digits.is_empty() {
            return None;
        }
        let n: i64 = digits.parse().ok()?;
        match token.as_str() {
            "YYYY" | "YY" => year = if token.len() == 2 { 2000 + n } else { n },
            "MM" | "M" => month = n as u32,
            "DD" | "D" => day = n as u32,
            "HH" | "H" => hour = n as u32,
            "mm" | "m" => minute = n as u32,
            "ss" | "s" => second = n as u32,
            _ => return None,
        }
    }
    if chars.next().is_some() {
        return None;
    }
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    let days = days_from_ymd(year, month, day);
    Some(days * 86_400_000 + (hour as i64) * 3_600_000 + (minute as i64) * 60_000 + (second as i64) * 1000)
}

fn parse_iso(s: &str) -> Option<i64> {
    let (date_part, time_part) = if let Some(idx) = s.find(|c| c == 'T' || c == ' ') {
        (&s[..idx], Some(&s[idx + 1..]))
    } else {
        (s, None)
    };

    let mut date_fields = date_part.split('-');
    let year: i64 = date_fields.next()?.parse().ok()?;
    let month: u32 = date_fields.next()?.parse().ok()?;
    let day: u32 = date_fields.next()?.parse().ok()?;
    if date_fields.next().is_some() || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let days = days_from_ymd(year, month, day);

    let time_ms = match time_part {
        None => 0,
        Some(t) => {
            let t = t.trim_end_matches('Z');
            let (hms, frac) = match t.split_once('.') {
                Some((h, f)) => (h, f),
                None => (t, ""),
            };
            let mut fields = hms.split(':');
            let hour: i64 = fields.next()?.parse().ok()?;
            let minute: i64 = fields.next()?.parse().ok()?;
            let second: i64 = fields.next().map_or(Some(0), |s| s.parse().ok())?;
            if !(0..=23).contains(&hour) || !(0..=59).contains(&minute) || !(0..=59).contains(&second) {
                return None;
            }
            let ms: i64 = if frac.is_empty() {
                0
            } else {
                format!("{:0<3}", frac)[..3].parse().ok()?
            };
            hour * 3_600_000 + minute * 60_000 + second * 1000 + ms
        }
    };

    Some(days * 86_400_000 + time_ms)
}

/// Format epoch milliseconds back into the given format, or ISO-8601 when
/// absent.
pub fn format_time(ms: i64, format: Option<&str>) -> String {
    let days = ms.div_euclid(86_400_000);
    let in_day = ms.rem_euclid(86_400_000);
    let (year, month, day) = ymd_from_days(days);
    let hour = in_day / 3_600_000;
    let minute = (in_day % 3_600_000) / 60_000;
    let second = (in_day % 60_000) / 1000;

    match format {
        None => {
            if in_day == 0 {
                format!("{:04}-{:02}-{:02}", year, month, day)
            } else {
                format!(
                    "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                )
            }
        }
        Some(fmt) => {
            let mut out = String::new();
            let mut f = fmt.chars().peekable();
            while let Some(&fc) = f.peek() {
                if !fc.is_ascii_alphabetic() {
                    out.push(f.next().unwrap());
                    continue;
                }
                let mut tok = String::new();
                while f.peek() == Some(&fc) {
                    tok.push(f.next().unwrap());
                }
                match tok.as_str() {
                    "YYYY" => out.push_str(&format!("{:04}", year)),
                    "YY" => out.push_str(&format!("{:02}", year % 100)),
                    "MM" | "M" => out.push_str(&format!("{:02}", month)),
                    "DD" | "D" => out.push_str(&format!("{:02}", day)),
                    "HH" | "H" => out.push_str(&format!("{:02}", hour)),
                    "mm" | "m" => out.push_str(&format!("{:02}", minute)),
                    "ss" | "s" => out.push_str(&format!("{:02}", second)),
                    other => out.push_str(other),
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_claims_numeric_strings() {
        let reg = TypeRegistry::new();
        let opts = TypeOptions::default();
        assert_eq!(reg.type_of(&Value::Str("42".to_string()), &opts), ValueType::Number);
        assert_eq!(reg.type_of(&Value::Str("-1.5e3".to_string()), &opts), ValueType::Number);
        assert_eq!(reg.type_of(&Value::Str("true".to_string()), &opts), ValueType::Boolean);
        assert_eq!(reg.type_of(&Value::Str("hello".to_string()), &opts), ValueType::Str);
        assert_eq!(reg.type_of(&Value::Number(3.0), &opts), ValueType::Number);
    }

    #[test]
    fn test_time_detection_iso() {
        let reg = TypeRegistry::new();
        let opts = TypeOptions::default();
        assert_eq!(
            reg.type_of(&Value::Str("2013-03-07".to_string()), &opts),
            ValueType::Time
        );
        assert_eq!(
            reg.type_of(&Value::Str("2013-03-07T12:30:00".to_string()), &opts),
            ValueType::Time
        );
    }

    #[test]
    fn test_coerce_idempotent() {
        let opts = TypeOptions::default();
        let cases = vec![
            (ValueType::Number, Value::Str("12.5".to_string())),
            (ValueType::Boolean, Value::Str("true".to_string())),
            (ValueType::Str, Value::Number(7.0)),
            (ValueType::Time, Value::Str("2020-01-01".to_string())),
            (ValueType::Mixed, Value::Str("whatever".to_string())),
        ];
        for (ty, raw) in cases {
            let once = ty.coerce(raw, &opts);
            let twice = ty.coerce(once.clone(), &opts);
            assert_eq!(once, twice, "coerce not idempotent for {:?}", ty);
        }
    }

    #[test]
    fn test_compare_nulls_first() {
        let ty = ValueType::Number;
        assert_eq!(ty.compare(&Value::Null, &Value::Number(0.0)), Ordering::Less);
        assert_eq!(ty.compare(&Value::Number(0.0), &Value::Null), Ordering::Greater);
        assert_eq!(ty.compare(&Value::Null, &Value::Null), Ordering::Equal);
        assert_eq!(ty.compare(&Value::Number(1.0), &Value::Number(2.0)), Ordering::Less);
    }

    #[test]
    fn test_detect_single_type() {
        let reg = TypeRegistry::new();
        let opts = TypeOptions::default();
        let sample = vec![
            Value::Str("1".to_string()),
            Value::Null,
            Value::Str("2.5".to_string()),
        ];
        let ty = reg.detect("n", &sample, &opts, DetectPolicy::Lenient).unwrap();
        assert_eq!(ty, ValueType::Number);
    }

    #[test]
    fn test_detect_mixed_sample_policies() {
        let reg = TypeRegistry::new();
        let opts = TypeOptions::default();
        let sample = vec![Value::Str("1".to_string()), Value::Str("abc".to_string())];

        let ty = reg.detect("c", &sample, &opts, DetectPolicy::Lenient).unwrap();
        assert_eq!(ty, ValueType::Mixed);

        let err = reg.detect("c", &sample, &opts, DetectPolicy::Strict).unwrap_err();
        assert!(matches!(err, TableError::Parse(_)));
    }

    #[test]
    fn test_detect_empty_sample() {
        let reg = TypeRegistry::new();
        let opts = TypeOptions::default();
        let ty = reg
            .detect("c", &[Value::Null, Value::Str(String::new())], &opts, DetectPolicy::Lenient)
            .unwrap();
        assert_eq!(ty, ValueType::Mixed);
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(parse_time("1970-01-01", None), Some(0));
        assert_eq!(parse_time("1970-01-02", None), Some(86_400_000));
        assert_eq!(
            parse_time("1970-01-01T01:00:00", None),
            Some(3_600_000)
        );
        assert_eq!(parse_time("1970/01/02", Some("YYYY/MM/DD")), Some(86_400_000));
        assert_eq!(parse_time("02-01-1970", Some("DD-MM-YYYY")), Some(86_400_000));
        assert_eq!(parse_time("garbage", None), None);
        assert_eq!(parse_time("1970-13-01", None), None);
    }

    #[test]
    fn test_format_time_round_trip() {
        let ms = parse_time("2013-03-07T12:30:00", None).unwrap();
        assert_eq!(format_time(ms, None), "2013-03-07T12:30:00");
        let ms = parse_time("2013/03/07", Some("YYYY/MM/DD")).unwrap();
        assert_eq!(format_time(ms, Some("YYYY/MM/DD")), "2013/03/07");
    }

    #[test]
    fn test_time_coerce_and_numeric() {
        let opts = TypeOptions::default();
        let coerced = ValueType::Time.coerce(Value::Str("1970-01-02".to_string()), &opts);
        assert_eq!(coerced, Value::Time(86_400_000));
        assert_eq!(ValueType::Time.numeric(&coerced), Some(86_400_000.0));
    }
}
