//! Line-scanning fallback for fragments whose markup defeated every strategy.
//!
//! Works on the flattened, non-empty lines of a fragment. Each field takes the
//! first qualifying line in document order; finding nothing is a normal outcome.

use std::sync::LazyLock;

use regex::Regex;

use super::strategy::KeywordSet;
use crate::config::FallbackConfig;
use crate::error::ConfigError;
use crate::record::{CandidateRecord, Field};

static DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d").unwrap());
static FRESHER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bfreshers?\b").unwrap());

/// Compiled keyword sets plus the thresholds they are used with.
#[derive(Debug, Clone)]
pub struct FallbackRules {
    pub limits: FallbackConfig,
    title_keywords: KeywordSet,
    title_disqualifiers: KeywordSet,
    company_suffixes: KeywordSet,
    company_disqualifiers: KeywordSet,
    gazetteer: KeywordSet,
    experience: KeywordSet,
    salary: KeywordSet,
    date: KeywordSet,
}

impl FallbackRules {
    pub fn compile(source_name: &str, config: &FallbackConfig) -> Result<Self, ConfigError> {
        let set = |words: &[String]| {
            KeywordSet::new(words).map_err(|e| ConfigError::Pattern {
                source_name: source_name.to_string(),
                pattern: words.join("|"),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            title_keywords: set(&config.title_keywords)?,
            title_disqualifiers: set(&config.title_disqualifiers)?,
            company_suffixes: set(&config.company_suffixes)?,
            company_disqualifiers: set(&config.company_disqualifiers)?,
            gazetteer: set(&config.gazetteer)?,
            experience: set(&config.experience_keywords)?,
            salary: set(&config.salary_keywords)?,
            date: set(&config.date_keywords)?,
            limits: config.clone(),
        })
    }

    /// Whether `title` is just one of the disqualifying terms, e.g. a bare "Location" label.
    pub fn is_disqualified_title(&self, title: &str) -> bool {
        let bare = title.trim().trim_end_matches(':').trim().to_lowercase();
        self.limits
            .title_disqualifiers
            .iter()
            .chain(&self.limits.company_disqualifiers)
            .any(|term| term.eq_ignore_ascii_case(&bare))
    }

    /// Index of the title line. `taken` is a value already assigned to another field.
    fn title(&self, lines: &[String], taken: Option<&str>) -> Option<usize> {
        let window = &lines[..lines.len().min(self.limits.title_window)];
        let in_bounds = |line: &String| {
            let len = line.chars().count();
            len >= self.limits.title_min_len
                && len <= self.limits.title_max_len
                && !taken.is_some_and(|t| t.eq_ignore_ascii_case(line))
        };
        window
            .iter()
            .position(|l| {
                in_bounds(l) && self.title_keywords.matches(l) && !self.title_disqualifiers.matches(l)
            })
            .or_else(|| window.iter().position(in_bounds))
    }

    fn company(&self, lines: &[String], title: Option<&str>) -> Option<String> {
        let start = title
            .and_then(|t| lines.iter().position(|l| l == t))
            .map_or(0, |i| i + 1);
        lines
            .iter()
            .skip(start)
            .take(self.limits.company_window)
            .find(|line| {
                let len = line.chars().count();
                if len < self.limits.company_min_len || len > self.limits.company_max_len {
                    return false;
                }
                if Some(line.as_str()) == title
                    || self.company_disqualifiers.matches(line)
                    || self.gazetteer.matches(line)
                    || line.chars().all(|c| c.is_ascii_digit() || c.is_whitespace())
                {
                    return false;
                }
                self.company_suffixes.matches(line)
                    || line.split_whitespace().count() <= self.limits.company_max_words
            })
            .cloned()
    }

    fn scan(&self, lines: &[String], set: &KeywordSet, max_len: usize, digit: bool) -> Option<String> {
        lines
            .iter()
            .find(|line| {
                line.chars().count() <= max_len
                    && set.matches(line)
                    && (!digit || DIGIT.is_match(line))
            })
            .cloned()
    }

    fn experience(&self, lines: &[String]) -> Option<String> {
        self.scan(lines, &self.experience, self.limits.experience_max_len, true)
            .or_else(|| {
                lines
                    .iter()
                    .any(|l| FRESHER.is_match(l))
                    .then(|| "Fresher".to_string())
            })
    }
}

/// Fill every absent field the fallback knows about from `lines`.
/// Returns the fields that were filled.
pub fn fill(candidate: &mut CandidateRecord, lines: &[String], rules: &FallbackRules) -> Vec<Field> {
    let mut filled = Vec::new();
    let mut put = |candidate: &mut CandidateRecord, field: Field, value: Option<String>| {
        if let Some(value) = value {
            if candidate.fill(field, value) {
                filled.push(field);
            }
        }
    };

    if !candidate.has(Field::Title) {
        let title = rules
            .title(lines, candidate.get(Field::Company))
            .map(|i| lines[i].clone());
        put(candidate, Field::Title, title);
    }
    if !candidate.has(Field::Company) {
        let title = candidate.get(Field::Title).map(str::to_string);
        let company = rules.company(lines, title.as_deref());
        put(candidate, Field::Company, company);
    }
    if !candidate.has(Field::Location) {
        let location = rules.scan(lines, &rules.gazetteer, rules.limits.location_max_len, false);
        put(candidate, Field::Location, location);
    }
    if !candidate.has(Field::Experience) {
        put(candidate, Field::Experience, rules.experience(lines));
    }
    if !candidate.has(Field::Salary) {
        let salary = rules.scan(lines, &rules.salary, rules.limits.salary_max_len, true);
        put(candidate, Field::Salary, salary);
    }
    if !candidate.has(Field::PostedDate) {
        let date = rules.scan(lines, &rules.date, rules.limits.date_max_len, false);
        put(candidate, Field::PostedDate, date);
    }
    filled
}
