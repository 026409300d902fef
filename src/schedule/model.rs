//! Scheduled mutation data model
//!
//! A deferred, single-shot property update queued against a target record.

use crate::error::{validation_error, AppResult};
use crate::record::{decode_mapping, Mapping, Record, RecordId};
use crate::timestamp::{parse_timestamp, timestamp_from_value, timestamp_to_value};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Persisted field names
pub mod fields {
    pub const TARGET_TYPE: &str = "target_type";
    pub const TARGET_ID: &str = "target_id";
    pub const SCHEDULED_DATE: &str = "scheduled_date";
    pub const DATA_DIFF: &str = "data_diff";
    pub const PROCESSED: &str = "processed";
    pub const PROCESSED_DATE: &str = "processed_date";
}

/// Lifecycle state of a scheduled mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    /// Not applied yet (including after failed attempts)
    Pending,
    /// Applied once; never applied again
    Applied,
}

/// A pending property-level mutation of a target record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMutation {
    id: RecordId,
    target_type: Option<String>,
    target_id: Option<RecordId>,
    /// `None` means eligible immediately
    scheduled_at: Option<DateTime<Utc>>,
    data_diff: Mapping,
    processed: bool,
    processed_at: Option<DateTime<Utc>>,
}

impl ScheduledMutation {
    /// A pending mutation of `target_type`/`target_id`, eligible immediately
    pub fn new(target_type: impl Into<String>, target_id: impl Into<RecordId>, data_diff: Mapping) -> Self {
        Self::builder()
            .target_type(target_type)
            .target_id(target_id)
            .data_diff(data_diff)
            .build()
    }

    pub fn builder() -> ScheduledMutationBuilder {
        ScheduledMutationBuilder::default()
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn target_type(&self) -> Option<&str> {
        self.target_type.as_deref()
    }

    pub fn target_id(&self) -> Option<&RecordId> {
        self.target_id.as_ref()
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn data_diff(&self) -> &Mapping {
        &self.data_diff
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn state(&self) -> MutationState {
        if self.processed {
            MutationState::Applied
        } else {
            MutationState::Pending
        }
    }

    /// Pending and scheduled at or before `now` (or unscheduled)
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.processed && self.scheduled_at.map_or(true, |at| at <= now)
    }

    /// Target type and id, provided the mutation can ever be applied.
    /// Missing target fields or an empty diff are permanent failures.
    pub fn applicable_target(&self) -> AppResult<(String, RecordId)> {
        let target_type = match self.target_type.as_deref() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => return Err(validation_error(format!("Scheduled mutation {} has no object type", self.id))),
        };
        let Some(target_id) = self.target_id.clone() else {
            return Err(validation_error(format!("Scheduled mutation {} has no object id", self.id)));
        };
        if self.data_diff.is_empty() {
            return Err(validation_error(format!("Scheduled mutation {} has no data changes", self.id)));
        }
        Ok((target_type, target_id))
    }

    /// Move the due time. Applied mutations keep their schedule.
    pub fn reschedule(&mut self, at: Option<DateTime<Utc>>) -> AppResult<()> {
        if self.processed {
            return Err(validation_error(format!(
                "Scheduled mutation {} was already applied",
                self.id
            )));
        }
        self.scheduled_at = at;
        Ok(())
    }

    /// PENDING -> APPLIED; the only transition
    pub(crate) fn mark_processed(&mut self, at: DateTime<Utc>) {
        self.processed = true;
        self.processed_at = Some(at);
    }

    /// Fresh queue entries are always pending
    pub(crate) fn reset_pending(&mut self) {
        self.processed = false;
        self.processed_at = None;
    }

    /// Storage form under the given record type
    pub fn to_record(&self, record_type: &str) -> Record {
        let mut data = Mapping::new();
        data.insert(
            fields::TARGET_TYPE.into(),
            self.target_type.as_deref().map(Value::from).unwrap_or(Value::Null),
        );
        data.insert(
            fields::TARGET_ID.into(),
            self.target_id.as_ref().map(RecordId::to_value).unwrap_or(Value::Null),
        );
        data.insert(fields::SCHEDULED_DATE.into(), timestamp_to_value(self.scheduled_at.as_ref()));
        data.insert(fields::DATA_DIFF.into(), Value::Object(self.data_diff.clone()));
        data.insert(fields::PROCESSED.into(), Value::Bool(self.processed));
        data.insert(fields::PROCESSED_DATE.into(), timestamp_to_value(self.processed_at.as_ref()));

        Record {
            record_type: record_type.to_string(),
            id: Some(self.id.clone()),
            data,
        }
    }

    /// Decode a stored mutation. Structurally invalid fields are rejected;
    /// missing target fields are allowed here and rejected when applied.
    pub fn from_record(record: &Record) -> AppResult<ScheduledMutation> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| validation_error("Stored scheduled mutation has no id"))?;
        let data = &record.data;

        let target_type = match data.get(fields::TARGET_TYPE) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(validation_error("Scheduled object type must be a string")),
        };
        let target_id = match data.get(fields::TARGET_ID) {
            None | Some(Value::Null) => None,
            Some(value) => Some(RecordId::from_value(value).ok_or_else(|| {
                validation_error(format!("Invalid scheduled object id {}", value))
            })?),
        };

        Ok(ScheduledMutation {
            id,
            target_type,
            target_id,
            scheduled_at: timestamp_from_value(fields::SCHEDULED_DATE, data.get(fields::SCHEDULED_DATE))?,
            data_diff: data.get(fields::DATA_DIFF).map(decode_mapping).unwrap_or_default(),
            processed: parse_flag(data.get(fields::PROCESSED))?,
            processed_at: timestamp_from_value(fields::PROCESSED_DATE, data.get(fields::PROCESSED_DATE))?,
        })
    }
}

fn parse_flag(value: Option<&Value>) -> AppResult<bool> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => Ok(n.as_f64().map_or(false, |f| f != 0.0)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            other => Err(validation_error(format!("Invalid processed flag \"{}\"", other))),
        },
        Some(other) => Err(validation_error(format!("Invalid processed flag {}", other))),
    }
}

/// Validated construction of a [`ScheduledMutation`]
#[derive(Debug, Clone, Default)]
pub struct ScheduledMutationBuilder {
    id: Option<RecordId>,
    target_type: Option<String>,
    target_id: Option<RecordId>,
    scheduled_at: Option<DateTime<Utc>>,
    data_diff: Mapping,
}

impl ScheduledMutationBuilder {
    pub fn id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }

    pub fn target_id(mut self, target_id: impl Into<RecordId>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Parse a date/time string; unparsable input fails immediately
    pub fn scheduled_date(mut self, text: &str) -> AppResult<Self> {
        self.scheduled_at = Some(parse_timestamp(text)?);
        Ok(self)
    }

    /// Property name -> new value
    pub fn data_diff(mut self, data_diff: Mapping) -> Self {
        self.data_diff = data_diff;
        self
    }

    /// Set one property of the diff
    pub fn set(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data_diff.insert(property.into(), value.into());
        self
    }

    pub fn build(self) -> ScheduledMutation {
        ScheduledMutation {
            id: self.id.unwrap_or_else(|| RecordId::from(Uuid::new_v4())),
            target_type: self.target_type,
            target_id: self.target_id,
            scheduled_at: self.scheduled_at,
            data_diff: self.data_diff,
            processed: false,
            processed_at: None,
        }
    }
}
