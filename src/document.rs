//! Parsed page, feed or API response with structural navigation.
//!
//! A [`SourceDocument`] owns the parse tree; [`Fragment`]s borrow sub-trees out of
//! it. HTML trees are not `Send`, so a document lives and dies inside one
//! synchronous extraction call.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::config::{DocumentFormat, RuleSpec};
use crate::error::FetchError;
use crate::feed;

/// Compiled structural locator: where to look inside a fragment.
#[derive(Debug, Clone)]
pub enum Locator {
    Css {
        selector: Selector,
        attr: Option<String>,
        all: bool,
    },
    /// Attribute on the fragment element itself.
    Attr(String),
    /// Dotted key path; numeric segments index arrays.
    Field(Vec<String>),
}

impl Locator {
    /// Compile a structural rule. Pattern rules are not locators and yield `Ok(None)`.
    pub fn compile(rule: &RuleSpec) -> Result<Option<Self>, String> {
        let locator = match rule {
            RuleSpec::Css {
                selector,
                attr,
                all,
            } => Locator::Css {
                selector: Selector::parse(selector).map_err(|e| e.to_string())?,
                attr: attr.clone(),
                all: *all,
            },
            RuleSpec::Attr { attribute } => Locator::Attr(attribute.clone()),
            RuleSpec::Field { path } => Locator::Field(
                path.split('.')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            RuleSpec::Regex { .. } | RuleSpec::Keyword { .. } => return Ok(None),
        };
        Ok(Some(locator))
    }

    /// Compile a list of structural rules, as used for containers and next-page markers.
    pub fn compile_all(rules: &[RuleSpec]) -> Result<Vec<Self>, String> {
        let mut out = Vec::with_capacity(rules.len());
        for rule in rules {
            match Locator::compile(rule)? {
                Some(locator) => out.push(locator),
                None => return Err(format!("{rule:?} is not a structural locator")),
            }
        }
        Ok(out)
    }
}

enum Body {
    Html(Html),
    Json(Value),
}

pub struct SourceDocument {
    url: Url,
    body: Body,
}

impl SourceDocument {
    /// Parse a fetched body according to the source's declared format.
    pub fn parse(format: DocumentFormat, url: Url, body: &str) -> Result<Self, FetchError> {
        let body = match format {
            DocumentFormat::Html => Body::Html(Html::parse_document(body)),
            DocumentFormat::Json => Body::Json(
                serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?,
            ),
            DocumentFormat::Feed => Body::Json(Value::Array(
                feed::parse_items(body).map_err(|e| FetchError::Malformed(e.to_string()))?,
            )),
        };
        Ok(Self { url, body })
    }

    pub fn root(&self) -> Fragment<'_> {
        match &self.body {
            Body::Html(html) => Fragment::Html(html.root_element()),
            Body::Json(value) => Fragment::Json(value),
        }
    }

    /// Locate job fragments with the first locator that finds at least `min` of them.
    ///
    /// Without locators a JSON array yields its elements and a JSON object yields
    /// itself; an HTML document yields nothing.
    pub fn fragments(&self, locators: &[Locator], min: usize) -> Vec<Fragment<'_>> {
        let root = self.root();
        if locators.is_empty() {
            return match root {
                Fragment::Json(Value::Array(items)) => items.iter().map(Fragment::Json).collect(),
                Fragment::Json(value) => vec![Fragment::Json(value)],
                Fragment::Html(_) => Vec::new(),
            };
        }
        for locator in locators {
            let found = root.select(locator);
            if !found.is_empty() && found.len() >= min {
                return found;
            }
        }
        Vec::new()
    }

    /// Whether a structural "next page" marker is present.
    ///
    /// `None` when the source declares no marker and pagination is bounded by
    /// page count alone.
    pub fn has_next(&self, locators: &[Locator]) -> Option<bool> {
        if locators.is_empty() {
            return None;
        }
        let root = self.root();
        Some(locators.iter().any(|l| root.flag(l)))
    }

    /// Resolve a possibly relative link against the document URL.
    /// Non-web schemes (`javascript:`, `mailto:`) resolve to `None`.
    pub fn resolve_link(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        let url = self.url.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }
}

/// A borrowed sub-tree of a [`SourceDocument`].
#[derive(Debug, Clone, Copy)]
pub enum Fragment<'a> {
    Html(ElementRef<'a>),
    Json(&'a Value),
}

impl<'a> Fragment<'a> {
    /// Sub-fragments matched by a locator.
    pub fn select(&self, locator: &Locator) -> Vec<Fragment<'a>> {
        match (*self, locator) {
            (Fragment::Html(el), Locator::Css { selector, .. }) => {
                el.select(selector).map(Fragment::Html).collect()
            }
            (Fragment::Json(value), Locator::Field(path)) => match walk(value, path) {
                Some(Value::Array(items)) => items.iter().map(Fragment::Json).collect(),
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![Fragment::Json(other)],
            },
            _ => Vec::new(),
        }
    }

    /// Text value located within this fragment, trimmed; `None` when empty.
    pub fn extract(&self, locator: &Locator) -> Option<String> {
        let raw = match (*self, locator) {
            (Fragment::Html(el), Locator::Css { selector, attr, all }) => {
                let mut values = el
                    .select(selector)
                    .filter_map(|m| element_value(m, attr.as_deref()));
                if *all {
                    let joined: Vec<String> = values.collect();
                    (!joined.is_empty()).then(|| joined.join("\n"))
                } else {
                    values.next()
                }
            }
            (Fragment::Html(el), Locator::Attr(name)) => el.value().attr(name).map(str::to_string),
            (Fragment::Json(value), Locator::Field(path)) => walk(value, path).and_then(leaf_text),
            _ => None,
        }?;
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Truthiness of a locator, for next-page markers.
    fn flag(&self, locator: &Locator) -> bool {
        match (*self, locator) {
            (Fragment::Json(value), Locator::Field(path)) => match walk(value, path) {
                None | Some(Value::Null) | Some(Value::Bool(false)) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Array(items)) => !items.is_empty(),
                Some(_) => true,
            },
            (Fragment::Html(_), Locator::Css { .. }) => !self.select(locator).is_empty(),
            _ => self.extract(locator).is_some(),
        }
    }

    /// Non-empty text lines in document order.
    ///
    /// HTML is flattened the way it renders: inline markup stays on its line, block
    /// elements and `<br>` break lines, whitespace collapses, and script-like
    /// subtrees are dropped. JSON yields one line per leaf.
    pub fn lines(&self) -> Vec<String> {
        match self {
            Fragment::Html(el) => {
                let mut flat = Flattened::default();
                flat.walk(*el);
                flat.finish()
            }
            Fragment::Json(value) => {
                let mut pieces = Vec::new();
                collect_leaves(value, &mut pieces);
                pieces
                    .iter()
                    .flat_map(|p| p.lines())
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            }
        }
    }

    /// Flattened plain text, one line per rendered line.
    pub fn text(&self) -> String {
        self.lines().join("\n")
    }
}

fn element_value(el: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    let value = match attr {
        Some(name) => el.value().attr(name)?.to_string(),
        None => el.text().collect::<Vec<_>>().join(" "),
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

const SKIPPED: &[&str] = &["script", "style", "noscript", "template"];

const BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "details", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hr", "html", "li", "main", "nav", "ol", "p", "pre", "section", "summary",
    "table", "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Line accumulator for rendering an element tree as text.
#[derive(Default)]
struct Flattened {
    lines: Vec<String>,
    current: String,
}

impl Flattened {
    fn walk(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                let name = child_el.value().name();
                if SKIPPED.contains(&name) {
                    continue;
                }
                if name == "br" {
                    self.break_line();
                } else if BLOCKS.contains(&name) {
                    self.break_line();
                    self.walk(child_el);
                    self.break_line();
                } else {
                    self.walk(child_el);
                }
            } else if let Some(text) = child.value().as_text() {
                self.current.push_str(text);
            }
        }
    }

    fn break_line(&mut self) {
        let line = self.current.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            self.lines.push(line);
        }
        self.current.clear();
    }

    fn finish(mut self) -> Vec<String> {
        self.break_line();
        self.lines
    }
}

fn walk<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn leaf_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(leaf_text).collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        Value::Object(_) | Value::Null => None,
    }
}

fn collect_leaves(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_leaves(v, out)),
        Value::Bool(_) | Value::Null => {}
    }
}
