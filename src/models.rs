use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept "#12" as printed by `list`
        let digits = s.trim().trim_start_matches('#');
        digits.parse::<u64>().map(RecordId).map_err(|_| ParseEnumError {
            kind: "id",
            value: s.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Applied,
    Interviewing,
    Offer,
    Rejected,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Applied,
        Status::Interviewing,
        Status::Offer,
        Status::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Applied => "Applied",
            Status::Interviewing => "Interviewing",
            Status::Offer => "Offer",
            Status::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                kind: "status",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Remote,
    Hybrid,
    Office,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Remote => "remote",
            Location::Hybrid => "hybrid",
            Location::Office => "office",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" => Ok(Location::Remote),
            "hybrid" => Ok(Location::Hybrid),
            "office" => Ok(Location::Office),
            _ => Err(ParseEnumError {
                kind: "location",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Direct,
    Agent,
}

impl Agent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Agent::Direct => "direct",
            Agent::Agent => "agent",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agent {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Agent::Direct),
            "agent" => Ok(Agent::Agent),
            _ => Err(ParseEnumError {
                kind: "agent",
                value: s.to_string(),
            }),
        }
    }
}

/// One tracked job application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub company: String,
    pub position: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub agent: Option<Agent>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub optional_requirements: String,
    #[serde(default)]
    pub benefits: String,
    #[serde(default)]
    pub full_description: String,
    #[serde(default)]
    pub notes: String, // may span several lines
}

/// Form state. `id` is set only while editing an existing record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub id: Option<RecordId>,
    pub company: String,
    pub position: String,
    pub date: Option<NaiveDate>,
    pub location: Option<Location>,
    pub agent: Option<Agent>,
    pub status: Status,
    pub requirements: String,
    pub optional_requirements: String,
    pub benefits: String,
    pub full_description: String,
    pub notes: String,
}

impl Draft {
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: Some(record.id),
            company: record.company.clone(),
            position: record.position.clone(),
            date: record.date,
            location: record.location,
            agent: record.agent,
            status: record.status,
            requirements: record.requirements.clone(),
            optional_requirements: record.optional_requirements.clone(),
            benefits: record.benefits.clone(),
            full_description: record.full_description.clone(),
            notes: record.notes.clone(),
        }
    }

    pub fn to_record(&self, id: RecordId) -> Record {
        Record {
            id,
            company: self.company.clone(),
            position: self.position.clone(),
            date: self.date,
            location: self.location,
            agent: self.agent,
            status: self.status,
            requirements: self.requirements.clone(),
            optional_requirements: self.optional_requirements.clone(),
            benefits: self.benefits.clone(),
            full_description: self.full_description.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// Remote document shape: the whole collection for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub items: Vec<Record>,
}

/// Monotonic id source, seeded past every id already in the collection.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub fn seeded(records: &[Record]) -> Self {
        let mut ids = Self::default();
        ids.observe(records);
        ids
    }

    pub fn observe(&mut self, records: &[Record]) {
        if let Some(max) = records.iter().map(|r| r.id.0).max() {
            self.last = self.last.max(max);
        }
    }

    /// Fails once the id space is used up instead of wrapping onto old ids.
    pub fn next_id(&mut self) -> Result<RecordId, ValidationError> {
        self.last = self
            .last
            .checked_add(1)
            .ok_or(ValidationError::IdsExhausted)?;
        Ok(RecordId(self.last))
    }
}
