//! Validator/Normalizer: per-field cleaning and derived fields.
//!
//! Every function here is idempotent on its own output: cleaning a cleaned value,
//! truncating a truncated description or re-parsing an ISO date is a no-op.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate};
use regex::Regex;

use super::strategy::KeywordSet;
use crate::config::NormalizeConfig;
use crate::error::ConfigError;
use crate::record::{CandidateRecord, Field};

const ELLIPSIS: &str = "...";

static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)\s*\+?\s*(minute|min|hour|hr|day|week|month|year)s?\s+ago").unwrap()
});
static SAME_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|just now|few (?:minutes|hours) ago|an? (?:minute|hour) ago)\b").unwrap()
});
static YESTERDAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\byesterday\b").unwrap());
static TAG_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,\n|;]").unwrap());

/// Absolute date layouts seen on listing pages, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

#[derive(Debug, Clone)]
pub struct NormalizeRules {
    sentinels: Vec<String>,
    min_len: usize,
    description_budget: usize,
    remote: KeywordSet,
    internship: KeywordSet,
    contract: KeywordSet,
    part_time: KeywordSet,
}

impl NormalizeRules {
    pub fn compile(source_name: &str, config: &NormalizeConfig) -> Result<Self, ConfigError> {
        let set = |words: &[String]| {
            KeywordSet::new(words).map_err(|e| ConfigError::Pattern {
                source_name: source_name.to_string(),
                pattern: words.join("|"),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            sentinels: config.sentinels.iter().map(|s| s.trim().to_lowercase()).collect(),
            min_len: config.min_len,
            description_budget: config.description_budget,
            remote: set(&config.remote_keywords)?,
            internship: set(&config.internship_keywords)?,
            contract: set(&config.contract_keywords)?,
            part_time: set(&config.part_time_keywords)?,
        })
    }

    /// Trim and collapse whitespace; sentinels and too-short values become absent.
    pub fn clean(&self, value: &str) -> Option<String> {
        let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() < self.min_len.max(1) {
            return None;
        }
        let lower = collapsed.to_lowercase();
        if self.sentinels.iter().any(|s| *s == lower) {
            return None;
        }
        Some(collapsed)
    }

    /// Clean, then cap to the description budget with a trailing ellipsis.
    pub fn description(&self, value: &str) -> Option<String> {
        self.clean(value).map(|v| truncate(&v, self.description_budget))
    }

    /// Split a raw tag list, clean each tag and drop duplicates keeping first occurrence.
    pub fn tags(&self, raw: &str) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in TAG_SPLIT.split(raw).filter_map(|t| self.clean(t)) {
            if !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
                tags.push(tag);
            }
        }
        tags
    }

    pub fn is_remote(&self, tags: &[String], location: Option<&str>) -> bool {
        tags.iter().any(|t| t.eq_ignore_ascii_case("remote"))
            || location.is_some_and(|l| self.remote.matches(l))
    }

    /// Priority scan: internship, then contract, then part time, else full time.
    pub fn employment_type(&self, text: &str) -> &'static str {
        if self.internship.matches(text) {
            "Internship"
        } else if self.contract.matches(text) {
            "Contract"
        } else if self.part_time.matches(text) {
            "Part Time"
        } else {
            "Full Time"
        }
    }

    /// Clean every text field of a candidate in place, dropping those that clean to absent.
    /// Tags are left raw; they are split when mapped.
    pub fn clean_candidate(&self, candidate: &mut CandidateRecord) {
        for field in Field::ALL {
            if field == Field::Tags {
                continue;
            }
            let Some(raw) = candidate.get(field).map(str::to_string) else {
                continue;
            };
            match self.clean(&raw) {
                Some(cleaned) if cleaned == raw => {}
                Some(cleaned) => {
                    if let Some(provenance) = candidate.provenance(field).cloned() {
                        candidate.set(field, cleaned, provenance);
                    }
                }
                None => {
                    candidate.remove(field);
                }
            }
        }
    }
}

/// Cap `value` to `budget` characters, ellipsis included.
pub fn truncate(value: &str, budget: usize) -> String {
    if value.chars().count() <= budget {
        return value.to_string();
    }
    let keep = budget.saturating_sub(ELLIPSIS.len());
    let head: String = value.chars().take(keep).collect();
    format!("{}{}", head.trim_end(), ELLIPSIS)
}

/// Parse an absolute or relative posted date against `today`.
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.date_naive());
    }
    let stripped = strip_label(text);
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(stripped, format) {
            return Some(date);
        }
    }
    // ISO datetime without offset, e.g. "2026-10-01T08:00:00"
    if let Some(prefix) = stripped.get(..10) {
        if stripped.len() > 10 && stripped.as_bytes()[10] == b'T' {
            if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }
    relative_date(stripped, today)
}

fn strip_label(text: &str) -> &str {
    let lower = text.to_ascii_lowercase();
    for label in ["posted on:", "posted on", "posted:", "posted", "date:"] {
        if lower.starts_with(label) {
            return text[label.len()..].trim();
        }
    }
    text
}

fn relative_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = RELATIVE.captures(text) {
        let n: i64 = caps[1].parse().ok()?;
        let days = match caps[2].to_ascii_lowercase().as_str() {
            "minute" | "min" | "hour" | "hr" => 0,
            "day" => n,
            "week" => n.checked_mul(7)?,
            "month" => n.checked_mul(30)?,
            _ => n.checked_mul(365)?,
        };
        return today.checked_sub_signed(Duration::try_days(days)?);
    }
    if SAME_DAY.is_match(text) {
        return Some(today);
    }
    if YESTERDAY.is_match(text) {
        return today.pred_opt();
    }
    None
}
