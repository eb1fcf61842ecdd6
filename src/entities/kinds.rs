//! Concrete record payloads.

use super::schedule::Schedule;
use super::VersionHeader;
use crate::types::{Timestamp, VersionId};
use serde::{Deserialize, Serialize};

/// A person's name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub given: Option<String>,
    pub family: Option<String>,
}

impl PersonName {
    pub fn new(given: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            given: Some(given.into()),
            family: Some(family.into()),
        }
    }

    pub(crate) fn family_or_given(&self) -> &str {
        self.family
            .as_deref()
            .or(self.given.as_deref())
            .unwrap_or("")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiologicalSex {
    Female,
    Male,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub header: VersionHeader,
    pub name: PersonName,
    pub sex: Option<BiologicalSex>,
    pub birthday: Option<Timestamp>,
    pub allergies: Vec<String>,
}

impl Patient {
    pub fn new(id: impl Into<String>, name: PersonName) -> Self {
        Self {
            header: VersionHeader::new(id),
            name,
            sex: None,
            birthday: None,
            allergies: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarePlan {
    pub header: VersionHeader,
    pub title: String,
    pub patient_version_id: Option<VersionId>,
}

impl CarePlan {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            header: VersionHeader::new(id),
            title: title.into(),
            patient_version_id: None,
        }
    }

    pub fn for_patient(mut self, patient_version_id: VersionId) -> Self {
        self.patient_version_id = Some(patient_version_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub header: VersionHeader,
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub impacts_adherence: bool,
    pub schedule: Schedule,
    pub care_plan_version_id: Option<VersionId>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: Option<String>, schedule: Schedule) -> Self {
        Self {
            header: VersionHeader::new(id),
            title,
            instructions: None,
            impacts_adherence: true,
            schedule,
            care_plan_version_id: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn in_care_plan(mut self, care_plan_version_id: VersionId) -> Self {
        self.care_plan_version_id = Some(care_plan_version_id);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactCategory {
    CareProvider,
    FriendsAndFamily,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub header: VersionHeader,
    pub name: PersonName,
    pub care_plan_version_id: Option<VersionId>,
    pub title: Option<String>,
    pub role: Option<String>,
    pub organization: Option<String>,
    pub category: Option<ContactCategory>,
    pub address: Option<PostalAddress>,
    pub email_addresses: Vec<LabeledValue>,
    pub phone_numbers: Vec<LabeledValue>,
}

impl Contact {
    pub fn new(id: impl Into<String>, name: PersonName) -> Self {
        Self {
            header: VersionHeader::new(id),
            name,
            care_plan_version_id: None,
            title: None,
            role: None,
            organization: None,
            category: None,
            address: None,
            email_addresses: Vec::new(),
            phone_numbers: Vec::new(),
        }
    }

    pub fn in_care_plan(mut self, care_plan_version_id: VersionId) -> Self {
        self.care_plan_version_id = Some(care_plan_version_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskCategory {
    pub header: VersionHeader,
    pub title: String,
    pub care_plan_version_id: Option<VersionId>,
}

impl TaskCategory {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            header: VersionHeader::new(id),
            title: title.into(),
            care_plan_version_id: None,
        }
    }
}

/// The underlying value of an [`OutcomeValue`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Text(String),
    Date(Timestamp),
}

/// One recorded value of an outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutcomeValue {
    pub value: ValueKind,
    pub units: Option<String>,
    pub kind: Option<String>,
}

impl OutcomeValue {
    pub fn new(value: ValueKind) -> Self {
        Self {
            value,
            units: None,
            kind: None,
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }
}

/// The result recorded for one scheduled occurrence of one task version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub header: VersionHeader,
    pub task_version_id: VersionId,
    pub occurrence_index: usize,
    pub values: Vec<OutcomeValue>,
}

impl Outcome {
    /// The id is derived from the occurrence slot it answers.
    pub fn new(task_version_id: VersionId, occurrence_index: usize, values: Vec<OutcomeValue>) -> Self {
        Self {
            header: VersionHeader::new(format!("{}_{}", task_version_id, occurrence_index)),
            task_version_id,
            occurrence_index,
            values,
        }
    }
}
