//! Compiled StrategyChains: one ordered list of extraction rules per field.

use std::collections::BTreeMap;

use regex::Regex;

use crate::config::{FieldChains, RuleSpec, StrategySpec};
use crate::document::{Fragment, Locator};
use crate::error::ConfigError;
use crate::record::Field;

/// Case-insensitive whole-word matcher over a keyword list.
///
/// Word boundaries are only asserted on alphanumeric edges, so `"₹"`, `"$"` and
/// `"/month"` match anywhere while `"rs"` does not match inside `"years"`.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    re: Option<Regex>,
}

impl KeywordSet {
    pub fn new(keywords: &[String]) -> Result<Self, regex::Error> {
        let mut alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| {
                let mut alt = String::new();
                if k.starts_with(|c: char| c.is_alphanumeric()) {
                    alt.push_str(r"\b");
                }
                alt.push_str(&regex::escape(&k));
                if k.ends_with(|c: char| c.is_alphanumeric()) {
                    alt.push_str(r"\b");
                }
                alt
            })
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { re: None });
        }
        // longest first so `find` reports "work from home" over "home"
        alternatives.sort_by_key(|a| std::cmp::Reverse(a.len()));
        let re = Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))?;
        Ok(Self { re: Some(re) })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.re.as_ref().is_some_and(|re| re.is_match(text))
    }

    pub fn is_empty(&self) -> bool {
        self.re.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum Rule {
    Locate(Locator),
    Regex(Regex),
    Keyword { set: KeywordSet, max_len: usize },
}

/// One named extraction rule in a chain.
#[derive(Debug, Clone)]
pub struct FieldStrategy {
    pub name: String,
    pub rule: Rule,
}

impl FieldStrategy {
    pub fn compile(source_name: &str, spec: &StrategySpec) -> Result<Self, ConfigError> {
        let name = spec.name.clone().unwrap_or_else(|| default_name(&spec.rule));
        let rule = match &spec.rule {
            RuleSpec::Regex { pattern } => {
                Rule::Regex(Regex::new(pattern).map_err(|e| ConfigError::Pattern {
                    source_name: source_name.to_string(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?)
            }
            RuleSpec::Keyword { keywords, max_len } => Rule::Keyword {
                set: KeywordSet::new(keywords).map_err(|e| ConfigError::Pattern {
                    source_name: source_name.to_string(),
                    pattern: keywords.join("|"),
                    reason: e.to_string(),
                })?,
                max_len: *max_len,
            },
            structural => {
                let locator = Locator::compile(structural)
                    .map_err(|reason| ConfigError::Selector {
                        source_name: source_name.to_string(),
                        selector: default_name(structural),
                        reason,
                    })?
                    .ok_or_else(|| ConfigError::Invalid {
                        source_name: source_name.to_string(),
                        reason: format!("strategy '{name}' is not a locator"),
                    })?;
                Rule::Locate(locator)
            }
        };
        Ok(Self { name, rule })
    }

    /// Attempt extraction; `Some` only for a non-empty trimmed value.
    pub fn apply(&self, fragment: &Fragment<'_>) -> Option<String> {
        let value = match &self.rule {
            Rule::Locate(locator) => fragment.extract(locator),
            Rule::Regex(re) => {
                let text = fragment.text();
                re.captures(&text).and_then(|caps| {
                    caps.get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().to_string())
                })
            }
            Rule::Keyword { set, max_len } => fragment
                .lines()
                .into_iter()
                .find(|line| line.chars().count() <= *max_len && set.matches(line)),
        }?;
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

fn default_name(rule: &RuleSpec) -> String {
    match rule {
        RuleSpec::Css {
            selector,
            attr: Some(attr),
            ..
        } => format!("css:{selector}@{attr}"),
        RuleSpec::Css { selector, .. } => format!("css:{selector}"),
        RuleSpec::Attr { attribute } => format!("attr:{attribute}"),
        RuleSpec::Field { path } => format!("field:{path}"),
        RuleSpec::Regex { pattern } => format!("regex:{pattern}"),
        RuleSpec::Keyword { .. } => "keyword".to_string(),
    }
}

/// The StrategyChain table of one source.
#[derive(Debug, Clone, Default)]
pub struct CompiledChains {
    chains: BTreeMap<Field, Vec<FieldStrategy>>,
}

impl CompiledChains {
    pub fn compile(source_name: &str, table: &FieldChains) -> Result<Self, ConfigError> {
        let mut chains = BTreeMap::new();
        for field in Field::ALL {
            let specs = match field {
                Field::Id => &table.id,
                Field::Title => &table.title,
                Field::Company => &table.company,
                Field::Location => &table.location,
                Field::EmploymentType => &table.employment_type,
                Field::Salary => &table.salary,
                Field::Experience => &table.experience,
                Field::Qualification => &table.qualification,
                Field::PostedDate => &table.posted_date,
                Field::Description => &table.description,
                Field::Link => &table.link,
                Field::Tags => &table.tags,
            };
            let compiled = specs
                .iter()
                .map(|spec| FieldStrategy::compile(source_name, spec))
                .collect::<Result<Vec<_>, _>>()?;
            chains.insert(field, compiled);
        }
        Ok(Self { chains })
    }

    pub fn chain(&self, field: Field) -> &[FieldStrategy] {
        self.chains.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }
}
