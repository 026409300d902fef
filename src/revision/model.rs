//! Revision data model
//!
//! A revision is an immutable record of one change to a target record:
//! both snapshots and the diff between them.

use super::diff::{DataDiff, DiffEngine, DiffSummary};
use crate::error::{validation_error, AppResult};
use crate::record::{decode_mapping, Mapping, Record, RecordId};
use crate::timestamp::{format_timestamp, timestamp_from_value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Persisted field names
pub mod fields {
    pub const TARGET_TYPE: &str = "target_type";
    pub const TARGET_ID: &str = "target_id";
    pub const REV_NUM: &str = "rev_num";
    pub const REV_TS: &str = "rev_ts";
    pub const REV_USER: &str = "rev_user";
    pub const DATA_PREV: &str = "data_prev";
    pub const DATA_OBJ: &str = "data_obj";
    pub const DATA_DIFF: &str = "data_diff";
}

/// An immutable revision of a target record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    id: RecordId,
    target_type: String,
    target_id: RecordId,
    rev_num: u64,
    rev_ts: DateTime<Utc>,
    rev_user: Option<String>,
    data_prev: Mapping,
    data_obj: Mapping,
    data_diff: DataDiff,
}

impl Revision {
    pub fn builder(target_type: impl Into<String>, target_id: RecordId) -> RevisionBuilder {
        RevisionBuilder {
            id: None,
            target_type: target_type.into(),
            target_id,
            rev_num: 1,
            rev_ts: None,
            rev_user: None,
            data_prev: Mapping::new(),
            data_obj: Mapping::new(),
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn target_id(&self) -> &RecordId {
        &self.target_id
    }

    pub fn rev_num(&self) -> u64 {
        self.rev_num
    }

    pub fn rev_ts(&self) -> DateTime<Utc> {
        self.rev_ts
    }

    pub fn rev_user(&self) -> Option<&str> {
        self.rev_user.as_deref()
    }

    /// State before this revision
    pub fn data_prev(&self) -> &Mapping {
        &self.data_prev
    }

    /// State at this revision
    pub fn data_obj(&self) -> &Mapping {
        &self.data_obj
    }

    pub fn data_diff(&self) -> &DataDiff {
        &self.data_diff
    }

    /// Lightweight view used for listings
    pub fn metadata(&self) -> RevisionMetadata {
        RevisionMetadata::from(self)
    }

    /// Storage form under the given record type
    pub fn to_record(&self, record_type: &str) -> Record {
        let mut data = Mapping::new();
        data.insert(fields::TARGET_TYPE.into(), Value::from(self.target_type.as_str()));
        data.insert(fields::TARGET_ID.into(), self.target_id.to_value());
        data.insert(fields::REV_NUM.into(), Value::from(self.rev_num));
        data.insert(fields::REV_TS.into(), Value::from(format_timestamp(&self.rev_ts)));
        data.insert(
            fields::REV_USER.into(),
            self.rev_user.as_deref().map(Value::from).unwrap_or(Value::Null),
        );
        data.insert(fields::DATA_PREV.into(), Value::Object(self.data_prev.clone()));
        data.insert(fields::DATA_OBJ.into(), Value::Object(self.data_obj.clone()));
        data.insert(fields::DATA_DIFF.into(), self.data_diff.to_value());

        Record {
            record_type: record_type.to_string(),
            id: Some(self.id.clone()),
            data,
        }
    }

    /// Decode a stored revision.
    ///
    /// The diff is always recomputed from the two snapshots; a stored diff
    /// that disagrees with them is reported and discarded.
    pub fn from_record(record: &Record) -> AppResult<Revision> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| validation_error("Stored revision has no id"))?;
        let data = &record.data;

        let target_type = match data.get(fields::TARGET_TYPE) {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(validation_error("Revision target type must be a string")),
        };
        let target_id = data
            .get(fields::TARGET_ID)
            .and_then(RecordId::from_value)
            .ok_or_else(|| validation_error("Revision target id is missing"))?;
        let rev_num = parse_rev_num(data.get(fields::REV_NUM))?;
        let rev_ts = timestamp_from_value(fields::REV_TS, data.get(fields::REV_TS))?
            .ok_or_else(|| validation_error("Revision timestamp is missing"))?;
        let rev_user = match data.get(fields::REV_USER) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(validation_error("Revision user must be a string")),
        };

        let revision = Revision::builder(target_type, target_id)
            .id(id)
            .rev_num(rev_num)
            .rev_ts(rev_ts)
            .rev_user(rev_user)
            .data_prev(data.get(fields::DATA_PREV).map(decode_mapping).unwrap_or_default())
            .data_obj(data.get(fields::DATA_OBJ).map(decode_mapping).unwrap_or_default())
            .build()?;

        if let Some(stored) = data.get(fields::DATA_DIFF) {
            if DataDiff::from_value(stored) != revision.data_diff {
                tracing::warn!(
                    "Stored diff of revision {} ({} {} #{}) disagrees with its snapshots; using recomputed diff",
                    revision.id,
                    revision.target_type,
                    revision.target_id,
                    revision.rev_num
                );
            }
        }

        Ok(revision)
    }
}

fn parse_rev_num(value: Option<&Value>) -> AppResult<u64> {
    let n = match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n >= 1 => Ok(n),
        _ => Err(validation_error("Revision number must be a positive integer")),
    }
}

/// Validated construction of a [`Revision`]
#[derive(Debug, Clone)]
pub struct RevisionBuilder {
    id: Option<RecordId>,
    target_type: String,
    target_id: RecordId,
    rev_num: u64,
    rev_ts: Option<DateTime<Utc>>,
    rev_user: Option<String>,
    data_prev: Mapping,
    data_obj: Mapping,
}

impl RevisionBuilder {
    pub fn id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn rev_num(mut self, rev_num: u64) -> Self {
        self.rev_num = rev_num;
        self
    }

    pub fn rev_ts(mut self, rev_ts: DateTime<Utc>) -> Self {
        self.rev_ts = Some(rev_ts);
        self
    }

    pub fn rev_user(mut self, rev_user: Option<String>) -> Self {
        self.rev_user = rev_user;
        self
    }

    pub fn data_prev(mut self, data: Mapping) -> Self {
        self.data_prev = data;
        self
    }

    pub fn data_obj(mut self, data: Mapping) -> Self {
        self.data_obj = data;
        self
    }

    pub fn build(self) -> AppResult<Revision> {
        if self.target_type.trim().is_empty() {
            return Err(validation_error("Revision target type must not be empty"));
        }
        if self.rev_num == 0 {
            return Err(validation_error("Revision number must be a positive integer"));
        }

        let data_diff = DiffEngine::diff(&self.data_prev, &self.data_obj);

        Ok(Revision {
            id: self.id.unwrap_or_else(|| RecordId::from(Uuid::new_v4())),
            target_type: self.target_type,
            target_id: self.target_id,
            rev_num: self.rev_num,
            rev_ts: self.rev_ts.unwrap_or_else(Utc::now),
            rev_user: self.rev_user,
            data_prev: self.data_prev,
            data_obj: self.data_obj,
            data_diff,
        })
    }
}

/// Metadata about a revision (lightweight, used for listing)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionMetadata {
    pub id: RecordId,
    pub target_type: String,
    pub target_id: RecordId,
    pub rev_num: u64,
    pub rev_ts: DateTime<Utc>,
    pub rev_user: Option<String>,
    pub changes: DiffSummary,
}

impl From<&Revision> for RevisionMetadata {
    fn from(revision: &Revision) -> Self {
        Self {
            id: revision.id.clone(),
            target_type: revision.target_type.clone(),
            target_id: revision.target_id.clone(),
            rev_num: revision.rev_num,
            rev_ts: revision.rev_ts,
            rev_user: revision.rev_user.clone(),
            changes: revision.data_diff.summary(),
        }
    }
}
