use std::{fmt, str::FromStr, time::Duration};

/// A non-negative duration written the way Go formats `time.Duration`, e.g.
/// `30s`, `5m` or `1h30m`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Interval(Duration);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty duration")]
    Empty,

    #[error("durations must not be negative")]
    Negative,

    #[error("missing unit in {0:?}")]
    NoUnit(String),

    #[error("unknown unit {0:?}, expected one of ns, us, ms, s, m or h")]
    UnknownUnit(String),

    #[error("invalid number {0:?}")]
    NotANumber(String),
}

// === impl Interval ===

impl Interval {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }
}

impl From<Interval> for Duration {
    fn from(Interval(d): Interval) -> Self {
        d
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl FromStr for Interval {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        let mut rest = s.strip_prefix('+').unwrap_or(s);
        if rest == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        while !rest.is_empty() {
            let (value, tail) = split_at(rest, |c| !is_numeric(c));
            if tail.is_empty() {
                return Err(ParseError::NoUnit(s.to_string()));
            }
            let value = value
                .parse::<f64>()
                .map_err(|_| ParseError::NotANumber(value.to_string()))?;
            let (unit, tail) = split_at(tail, is_numeric);
            total += unit_of(unit)?.mul_f64(value);
            rest = tail;
        }
        Ok(Self(total))
    }
}

fn is_numeric(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

fn split_at(s: &str, pred: impl Fn(char) -> bool) -> (&str, &str) {
    s.split_at(s.find(pred).unwrap_or(s.len()))
}

fn unit_of(unit: &str) -> Result<Duration, ParseError> {
    const MINUTE: Duration = Duration::from_secs(60);
    match unit {
        "ns" => Ok(Duration::from_nanos(1)),
        // Both the micro sign and the Greek letter mu.
        "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
        "ms" => Ok(Duration::from_millis(1)),
        "s" => Ok(Duration::from_secs(1)),
        "m" => Ok(MINUTE),
        "h" => Ok(MINUTE * 60),
        unit => Err(ParseError::UnknownUnit(unit.to_string())),
    }
}
