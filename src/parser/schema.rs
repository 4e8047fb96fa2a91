use chrono::NaiveDate;

use super::normalize::{parse_date, NormalizeRules};
use crate::record::{CandidateRecord, CanonicalJobRecord, Field, LINK_UNAVAILABLE, PLACEHOLDER};

/// Per-record facts that do not come from the fragment.
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    pub source: &'a str,
    /// Position of the fragment within the source's crawl.
    pub index: usize,
    pub today: NaiveDate,
}

impl RecordContext<'_> {
    pub fn synthetic_id(&self) -> String {
        format!("{}-{}", self.source, self.index)
    }
}

/// Map a validated candidate onto the fixed canonical shape.
///
/// Absent text fields become [`PLACEHOLDER`] or `null`; the link becomes
/// [`LINK_UNAVAILABLE`]; `qualification` falls back to the experience text.
pub fn to_canonical(
    candidate: &CandidateRecord,
    ctx: &RecordContext<'_>,
    rules: &NormalizeRules,
) -> CanonicalJobRecord {
    let text = |field: Field| candidate.get(field).map(str::to_string);
    let or_placeholder = |field: Field| text(field).unwrap_or_else(|| PLACEHOLDER.to_string());

    let tags = candidate
        .get(Field::Tags)
        .map(|raw| rules.tags(raw))
        .unwrap_or_default();
    let location = text(Field::Location);
    let description = candidate
        .get(Field::Description)
        .and_then(|d| rules.description(d));

    let scan = [
        candidate.get(Field::EmploymentType),
        candidate.get(Field::Title),
        description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n");

    CanonicalJobRecord {
        jobid: text(Field::Id).unwrap_or_else(|| ctx.synthetic_id()),
        title: or_placeholder(Field::Title),
        company: or_placeholder(Field::Company),
        employment_type: rules.employment_type(&scan).to_string(),
        salary: text(Field::Salary),
        posted_date: candidate
            .get(Field::PostedDate)
            .and_then(|d| parse_date(d, ctx.today)),
        remote: rules.is_remote(&tags, location.as_deref()),
        location: location.unwrap_or_else(|| PLACEHOLDER.to_string()),
        description,
        link: text(Field::Link).unwrap_or_else(|| LINK_UNAVAILABLE.to_string()),
        source: ctx.source.to_string(),
        tags,
        scraped_at: ctx.today,
        is_active: true,
        qualification: text(Field::Qualification).or_else(|| text(Field::Experience)),
    }
}
