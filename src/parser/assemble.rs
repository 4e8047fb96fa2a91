use thiserror::Error;

use super::fallback::FallbackRules;
use super::normalize::NormalizeRules;
use super::schema::{to_canonical, RecordContext};
use crate::config::EssentialPolicy;
use crate::record::{CandidateRecord, CanonicalJobRecord, Field, PLACEHOLDER};

/// Why a candidate was dropped. Logged, never surfaced as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("missing essential fields for policy {0:?}")]
    MissingEssential(EssentialPolicy),

    #[error("title '{0}' is a field label")]
    LabelTitle(String),
}

/// Accept or reject a validated candidate and map it to the canonical record.
pub fn assemble(
    candidate: &CandidateRecord,
    policy: EssentialPolicy,
    fallback: &FallbackRules,
    rules: &NormalizeRules,
    ctx: &RecordContext<'_>,
) -> Result<CanonicalJobRecord, Rejection> {
    let present = |field: Field| {
        candidate
            .get(field)
            .is_some_and(|v| !v.trim().is_empty() && !v.eq_ignore_ascii_case(PLACEHOLDER))
    };
    let (title, company) = (present(Field::Title), present(Field::Company));
    let accepted = match policy {
        EssentialPolicy::AnyOf => title || company,
        EssentialPolicy::Both => title && company,
        EssentialPolicy::Title => title,
    };
    if !accepted {
        return Err(Rejection::MissingEssential(policy));
    }
    if let Some(t) = candidate.get(Field::Title) {
        if fallback.is_disqualified_title(t) {
            return Err(Rejection::LabelTitle(t.to_string()));
        }
    }
    Ok(to_canonical(candidate, ctx, rules))
}
