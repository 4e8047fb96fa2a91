use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Logical fields a source can supply for one job posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Id,
    Title,
    Company,
    Location,
    EmploymentType,
    Salary,
    Experience,
    Qualification,
    PostedDate,
    Description,
    Link,
    Tags,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::Id,
        Field::Title,
        Field::Company,
        Field::Location,
        Field::EmploymentType,
        Field::Salary,
        Field::Experience,
        Field::Qualification,
        Field::PostedDate,
        Field::Description,
        Field::Link,
        Field::Tags,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Title => "title",
            Field::Company => "company",
            Field::Location => "location",
            Field::EmploymentType => "employment_type",
            Field::Salary => "salary",
            Field::Experience => "experience",
            Field::Qualification => "qualification",
            Field::PostedDate => "posted_date",
            Field::Description => "description",
            Field::Link => "link",
            Field::Tags => "tags",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a candidate value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Named strategy of the field's chain.
    Strategy(String),
    /// Line-scanning fallback over flattened text.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub value: String,
    pub provenance: Provenance,
}

/// Raw per-field values gathered for one fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateRecord {
    values: BTreeMap<Field, FieldValue>,
}

impl CandidateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: Field, value: String, provenance: Provenance) {
        self.values.insert(field, FieldValue { value, provenance });
    }

    /// Set only when the field is still absent.
    pub fn fill(&mut self, field: Field, value: String) -> bool {
        if self.has(field) {
            return false;
        }
        self.set(field, value, Provenance::Fallback);
        true
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(|v| v.value.as_str())
    }

    pub fn provenance(&self, field: Field) -> Option<&Provenance> {
        self.values.get(&field).map(|v| &v.provenance)
    }

    pub fn has(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    pub fn remove(&mut self, field: Field) -> Option<FieldValue> {
        self.values.remove(&field)
    }
}

pub const PLACEHOLDER: &str = "Not specified";
pub const LINK_UNAVAILABLE: &str = "unavailable";

/// The unified output record. Field order here is the key order on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalJobRecord {
    pub jobid: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub employment_type: String,
    pub salary: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub link: String,
    pub source: String,
    pub tags: Vec<String>,
    pub scraped_at: NaiveDate,
    pub is_active: bool,
    pub remote: bool,
    pub qualification: Option<String>,
}

impl CanonicalJobRecord {
    /// Dedup key: ids are unique per source, not globally.
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.jobid)
    }
}
