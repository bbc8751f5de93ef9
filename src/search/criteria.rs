use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use clap::Parser;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::models::Flag;
use crate::error::{Error, Result};

/// Structured query evaluated against every message of a directory.
///
/// All constraints are conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Header name → substrings that must all occur in that header.
    pub headers: IndexMap<String, Vec<String>>,
    /// Substrings that must occur in the first non-multipart body part.
    pub body: Vec<String>,
    /// Substrings that must occur anywhere in the raw message.
    pub text: Vec<String>,
    pub with_flags: Vec<Flag>,
    pub without_flags: Vec<Flag>,
    /// Inclusive lower bound on the `Date:` header.
    pub start_date: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the `Date:` header.
    pub end_date: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(canonical_header(name))
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn body(mut self, term: &str) -> Self {
        self.body.push(term.to_string());
        self
    }

    pub fn text(mut self, term: &str) -> Self {
        self.text.push(term.to_string());
        self
    }

    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.with_flags.push(flag);
        self
    }

    pub fn without_flag(mut self, flag: Flag) -> Self {
        self.without_flags.push(flag);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    pub fn before(mut self, end: DateTime<Utc>) -> Self {
        self.end_date = Some(end);
        self
    }

    /// Parts of each message that must be loaded to evaluate this query.
    pub fn required_parts(&self) -> RequiredParts {
        let mut required = RequiredParts::NONE;
        if !self.headers.is_empty() {
            required |= RequiredParts::HEADER;
        }
        if self.start_date.is_some() || self.end_date.is_some() {
            required |= RequiredParts::DATE;
        }
        if !self.body.is_empty() {
            required |= RequiredParts::BODY;
        }
        if !self.text.is_empty() {
            required |= RequiredParts::WHOLE_MESSAGE;
        }
        if !self.with_flags.is_empty() || !self.without_flags.is_empty() {
            required |= RequiredParts::FLAGS;
        }
        required
    }

    /// Parse a getopt-style argument vector, as typed after `:search` or `:filter`.
    ///
    /// `-r`/`-u` seen/unseen, `-x`/`-X FLAG` with/without flag, `-f`/`-t`/`-c ADDR` From/To/Cc,
    /// `-H "Name: value"` any header, `-d RANGE` date range, `-b` terms search the body,
    /// `-a` terms search the whole message. Bare terms otherwise match the Subject.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::parse_at(args, Utc::now())
    }

    fn parse_at<I, S>(args: I, now: DateTime<Utc>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let parsed =
            SearchArgs::try_parse_from(&args).map_err(|e| Error::InvalidSearch(e.to_string()))?;

        let mut criteria = SearchCriteria::new();
        if parsed.read {
            criteria.with_flags.push(Flag::Seen);
        }
        if parsed.unread {
            criteria.without_flags.push(Flag::Seen);
        }
        for name in &parsed.with {
            criteria.with_flags.push(parse_flag(name)?);
        }
        for name in &parsed.without {
            criteria.without_flags.push(parse_flag(name)?);
        }
        for raw in &parsed.header {
            let (name, value) = raw.split_once(':').ok_or_else(|| {
                Error::InvalidSearch(format!("expected \"Name: value\", got {:?}", raw))
            })?;
            criteria = criteria.header(name.trim(), value.trim());
        }
        for v in &parsed.from {
            criteria = criteria.header("From", v);
        }
        for v in &parsed.to {
            criteria = criteria.header("To", v);
        }
        for v in &parsed.cc {
            criteria = criteria.header("Cc", v);
        }
        if let Some(range) = &parsed.date {
            let (start, end) = parse_date_range(range, now)?;
            criteria.start_date = start;
            criteria.end_date = end;
        }

        if parsed.all {
            criteria.text = parsed.terms;
        } else if parsed.body {
            criteria.body = parsed.terms;
        } else {
            for term in &parsed.terms {
                criteria = criteria.header("Subject", term);
            }
        }
        Ok(criteria)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "search",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct SearchArgs {
    #[arg(short = 'r')]
    read: bool,
    #[arg(short = 'u')]
    unread: bool,
    #[arg(short = 'x')]
    with: Vec<String>,
    #[arg(short = 'X')]
    without: Vec<String>,
    #[arg(short = 'H')]
    header: Vec<String>,
    #[arg(short = 'f')]
    from: Vec<String>,
    #[arg(short = 't')]
    to: Vec<String>,
    #[arg(short = 'c')]
    cc: Vec<String>,
    #[arg(short = 'b')]
    body: bool,
    #[arg(short = 'a')]
    all: bool,
    #[arg(short = 'd')]
    date: Option<String>,
    terms: Vec<String>,
}

fn parse_flag(name: &str) -> Result<Flag> {
    Flag::from_name(name).ok_or_else(|| Error::InvalidSearch(format!("unknown flag {:?}", name)))
}

/// `from` → `From`, `message-id` → `Message-Id`.
fn canonical_header(name: &str) -> String {
    name.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Substring test that is case-insensitive unless `substr` contains an upper-case character.
pub fn contains_smart_case(s: &str, substr: &str) -> bool {
    if substr.chars().any(char::is_uppercase) {
        s.contains(substr)
    } else {
        s.to_lowercase().contains(&substr.to_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Required parts
// ---------------------------------------------------------------------------

/// Bitmask of message parts a query needs loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequiredParts(u8);

impl RequiredParts {
    pub const NONE: RequiredParts = RequiredParts(0);
    pub const FLAGS: RequiredParts = RequiredParts(1);
    pub const HEADER: RequiredParts = RequiredParts(1 << 1);
    pub const DATE: RequiredParts = RequiredParts(1 << 2);
    pub const BODY: RequiredParts = RequiredParts(1 << 3);
    pub const WHOLE_MESSAGE: RequiredParts = RequiredParts(1 << 4);

    pub fn contains(self, other: RequiredParts) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: RequiredParts) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for RequiredParts {
    type Output = RequiredParts;

    fn bitor(self, rhs: RequiredParts) -> RequiredParts {
        RequiredParts(self.0 | rhs.0)
    }
}

impl BitOrAssign for RequiredParts {
    fn bitor_assign(&mut self, rhs: RequiredParts) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Date ranges
// ---------------------------------------------------------------------------

/// Parse `START..END`, `START..`, `..END` or a single term into `[start, end)` bounds.
///
/// Terms are `YYYY-MM-DD`, `today`, `yesterday`, `this_week`, `this_month`, `this_year`;
/// each names a whole period, so `2024-01-01..2024-01-31` includes the 31st.
pub fn parse_date_range(
    s: &str,
    now: DateTime<Utc>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let s = s.trim();
    let (start, end) = match s.split_once("..") {
        Some((a, b)) => {
            let start = match a.trim() {
                "" => None,
                term => Some(period(term, now)?.0),
            };
            let end = match b.trim() {
                "" => None,
                term => Some(period(term, now)?.1),
            };
            (start, end)
        }
        None => {
            let (start, end) = period(s, now)?;
            (Some(start), Some(end))
        }
    };
    if start.is_none() && end.is_none() {
        return Err(Error::InvalidSearch(format!("empty date range {:?}", s)));
    }
    Ok((start.map(midnight), end.map(midnight)))
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    d.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// `[first day, day after last day)` of the period named by `term`.
fn period(term: &str, now: DateTime<Utc>) -> Result<(NaiveDate, NaiveDate)> {
    let today = now.date_naive();
    let bad = || Error::InvalidSearch(format!("bad date {:?}", term));
    let day_after = |d: NaiveDate| d.checked_add_days(Days::new(1)).ok_or_else(bad);

    match term.to_ascii_lowercase().as_str() {
        "today" => Ok((today, day_after(today)?)),
        "yesterday" => {
            let y = today.checked_sub_days(Days::new(1)).ok_or_else(bad)?;
            Ok((y, today))
        }
        "this_week" => {
            let back = today.weekday().num_days_from_monday() as u64;
            let monday = today.checked_sub_days(Days::new(back)).ok_or_else(bad)?;
            let next = monday.checked_add_days(Days::new(7)).ok_or_else(bad)?;
            Ok((monday, next))
        }
        "this_month" => {
            let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).ok_or_else(bad)?;
            let next = if today.month() == 12 {
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
            }
            .ok_or_else(bad)?;
            Ok((first, next))
        }
        "this_year" => {
            let first = NaiveDate::from_ymd_opt(today.year(), 1, 1).ok_or_else(bad)?;
            let next = NaiveDate::from_ymd_opt(today.year() + 1, 1, 1).ok_or_else(bad)?;
            Ok((first, next))
        }
        _ => {
            let day = NaiveDate::parse_from_str(term, "%Y-%m-%d").map_err(|_| bad())?;
            Ok((day, day_after(day)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    // -- contains_smart_case --

    #[test]
    fn smart_case_lower_query_ignores_case() {
        assert!(contains_smart_case("Hello World", "hello"));
        assert!(contains_smart_case("HELLO WORLD", "world"));
    }

    #[test]
    fn smart_case_upper_query_is_exact() {
        assert!(contains_smart_case("Hello World", "Hello"));
        assert!(!contains_smart_case("hello world", "Hello"));
        assert!(!contains_smart_case("HELLO", "Hello"));
    }

    #[test]
    fn smart_case_empty_query_matches() {
        assert!(contains_smart_case("anything", ""));
        assert!(contains_smart_case("", ""));
    }

    // -- required parts --

    #[test]
    fn required_parts_per_constraint() {
        assert_eq!(SearchCriteria::new().required_parts(), RequiredParts::NONE);
        assert_eq!(
            SearchCriteria::new().with_flag(Flag::Seen).required_parts(),
            RequiredParts::FLAGS
        );
        assert_eq!(
            SearchCriteria::new().without_flag(Flag::Seen).required_parts(),
            RequiredParts::FLAGS
        );
        assert_eq!(
            SearchCriteria::new().header("From", "bob").required_parts(),
            RequiredParts::HEADER
        );
        assert_eq!(
            SearchCriteria::new().body("x").required_parts(),
            RequiredParts::BODY
        );
        assert_eq!(
            SearchCriteria::new().text("x").required_parts(),
            RequiredParts::WHOLE_MESSAGE
        );
        assert_eq!(
            SearchCriteria::new().since(at(2024, 1, 1)).required_parts(),
            RequiredParts::DATE
        );
    }

    #[test]
    fn required_parts_is_monotonic() {
        let steps: Vec<fn(SearchCriteria) -> SearchCriteria> = vec![
            |c| c.with_flag(Flag::Flagged),
            |c| c.header("Subject", "report"),
            |c| c.before(at(2025, 1, 1)),
            |c| c.body("numbers"),
            |c| c.without_flag(Flag::Seen),
            |c| c.text("pdf"),
            |c| c.header("To", "bob"),
        ];
        let mut criteria = SearchCriteria::new();
        let mut prev = criteria.required_parts();
        for step in steps {
            criteria = step(criteria);
            let next = criteria.required_parts();
            assert!(next.contains(prev), "{:b} dropped bits of {:b}", next.bits(), prev.bits());
            prev = next;
        }
        assert_eq!(prev.bits(), 0b11111);
    }

    // -- argument parsing --

    #[test]
    fn bare_terms_match_subject() {
        let c = SearchCriteria::parse(["quarterly", "report"]).unwrap();
        assert_eq!(c.headers["Subject"], vec!["quarterly", "report"]);
        assert!(c.body.is_empty());
        assert_eq!(c.required_parts(), RequiredParts::HEADER);
    }

    #[test]
    fn flags_and_addresses() {
        let c = SearchCriteria::parse([
            "-r", "-X", "flagged", "-f", "alice", "-t", "bob", "-c", "carol",
        ])
        .unwrap();
        assert_eq!(c.with_flags, vec![Flag::Seen]);
        assert_eq!(c.without_flags, vec![Flag::Flagged]);
        assert_eq!(c.headers["From"], vec!["alice"]);
        assert_eq!(c.headers["To"], vec!["bob"]);
        assert_eq!(c.headers["Cc"], vec!["carol"]);
    }

    #[test]
    fn body_and_text_modes_take_terms() {
        let b = SearchCriteria::parse(["-b", "invoice", "due"]).unwrap();
        assert_eq!(b.body, vec!["invoice", "due"]);
        assert!(b.headers.is_empty());

        let a = SearchCriteria::parse(["-a", "invoice"]).unwrap();
        assert_eq!(a.text, vec!["invoice"]);
        assert!(a.body.is_empty());
    }

    #[test]
    fn arbitrary_header() {
        let c = SearchCriteria::parse(["-H", "x-mailer: mutt"]).unwrap();
        assert_eq!(c.headers["X-Mailer"], vec!["mutt"]);
        assert!(SearchCriteria::parse(["-H", "no colon"]).is_err());
    }

    #[test]
    fn unknown_flag_or_option_is_rejected() {
        assert!(matches!(
            SearchCriteria::parse(["-x", "sparkly"]),
            Err(Error::InvalidSearch(_))
        ));
        assert!(matches!(
            SearchCriteria::parse(["-z"]),
            Err(Error::InvalidSearch(_))
        ));
    }

    // -- date ranges --

    #[test]
    fn date_range_forms() {
        let now = at(2024, 3, 13);
        assert_eq!(
            parse_date_range("2024-01-01..2024-01-31", now).unwrap(),
            (Some(at(2024, 1, 1)), Some(at(2024, 2, 1)))
        );
        assert_eq!(
            parse_date_range("2024-01-01..", now).unwrap(),
            (Some(at(2024, 1, 1)), None)
        );
        assert_eq!(
            parse_date_range("..2024-01-31", now).unwrap(),
            (None, Some(at(2024, 2, 1)))
        );
        assert_eq!(
            parse_date_range("2024-02-29", now).unwrap(),
            (Some(at(2024, 2, 29)), Some(at(2024, 3, 1)))
        );
    }

    #[test]
    fn relative_terms() {
        // Wednesday
        let now = Utc.with_ymd_and_hms(2024, 3, 13, 15, 30, 0).unwrap();
        assert_eq!(
            parse_date_range("today", now).unwrap(),
            (Some(at(2024, 3, 13)), Some(at(2024, 3, 14)))
        );
        assert_eq!(
            parse_date_range("yesterday", now).unwrap(),
            (Some(at(2024, 3, 12)), Some(at(2024, 3, 13)))
        );
        assert_eq!(
            parse_date_range("this_week", now).unwrap(),
            (Some(at(2024, 3, 11)), Some(at(2024, 3, 18)))
        );
        assert_eq!(
            parse_date_range("this_month", now).unwrap(),
            (Some(at(2024, 3, 1)), Some(at(2024, 4, 1)))
        );
        assert_eq!(
            parse_date_range("this_year..", now).unwrap(),
            (Some(at(2024, 1, 1)), None)
        );
    }

    #[test]
    fn bad_ranges() {
        let now = at(2024, 3, 13);
        assert!(parse_date_range("..", now).is_err());
        assert!(parse_date_range("someday", now).is_err());
        assert!(parse_date_range("2024-13-01", now).is_err());
    }

    #[test]
    fn date_option_sets_bounds() {
        let c =
            SearchCriteria::parse_at(["-d", "2024-01-01..2024-01-31"], at(2024, 3, 13)).unwrap();
        assert_eq!(c.start_date, Some(at(2024, 1, 1)));
        assert_eq!(c.end_date, Some(at(2024, 2, 1)));
        assert_eq!(c.required_parts(), RequiredParts::DATE);
    }
}
