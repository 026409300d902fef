//! Structural Diff Engine
//!
//! Compares two nested key/value snapshots and reports what changed on each
//! side. This is the "git diff" for a record's state.

use crate::record::{decode_mapping, Mapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Two-sided difference between a `before` and an `after` mapping
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDiff {
    /// Keys/subtrees of `before` that are absent or different in `after`
    pub removed_or_changed: Mapping,
    /// Keys/subtrees of `after` that are absent or different in `before`
    pub added_or_changed: Mapping,
}

/// Top-level change counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl DataDiff {
    /// No difference on either side
    pub fn is_empty(&self) -> bool {
        self.removed_or_changed.is_empty() && self.added_or_changed.is_empty()
    }

    /// The same diff seen from the other direction
    pub fn inverse(&self) -> DataDiff {
        DataDiff {
            removed_or_changed: self.added_or_changed.clone(),
            added_or_changed: self.removed_or_changed.clone(),
        }
    }

    /// Top-level keys touched on either side, sorted
    pub fn changed_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .removed_or_changed
            .keys()
            .chain(self.added_or_changed.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for key in self.changed_keys() {
            match (
                self.removed_or_changed.contains_key(&key),
                self.added_or_changed.contains_key(&key),
            ) {
                (true, true) => summary.modified += 1,
                (true, false) => summary.removed += 1,
                (false, true) => summary.added += 1,
                (false, false) => {}
            }
        }
        summary
    }

    /// Rebuild the `after` state from a `before` state.
    ///
    /// A subtree present only in `removed_or_changed` that equals the base
    /// subtree is dropped as a whole; a removed key and a nested key removal
    /// that empties its parent are indistinguishable in the diff, and the
    /// former is assumed.
    pub fn apply_to(&self, before: &Mapping) -> Mapping {
        patch(before, &self.removed_or_changed, &self.added_or_changed)
    }

    /// Rebuild the `before` state from an `after` state
    pub fn revert(&self, after: &Mapping) -> Mapping {
        patch(after, &self.added_or_changed, &self.removed_or_changed)
    }

    /// Storage form: `[removed_or_changed, added_or_changed]`
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Object(self.removed_or_changed.clone()),
            Value::Object(self.added_or_changed.clone()),
        ])
    }

    /// Decode the storage form.
    ///
    /// Accepts the two-element array, an object keyed `"0"`/`"1"` (a sparse
    /// array written by other producers), the camelCase object form, or any
    /// of these as JSON text. Anything else decodes to an empty diff.
    pub fn from_value(value: &Value) -> DataDiff {
        match value {
            Value::Array(sides) => DataDiff {
                removed_or_changed: sides.first().map(decode_mapping).unwrap_or_default(),
                added_or_changed: sides.get(1).map(decode_mapping).unwrap_or_default(),
            },
            Value::Object(map) if map.contains_key("removedOrChanged") || map.contains_key("addedOrChanged") => {
                DataDiff {
                    removed_or_changed: map.get("removedOrChanged").map(decode_mapping).unwrap_or_default(),
                    added_or_changed: map.get("addedOrChanged").map(decode_mapping).unwrap_or_default(),
                }
            }
            Value::Object(map) => DataDiff {
                removed_or_changed: map.get("0").map(decode_mapping).unwrap_or_default(),
                added_or_changed: map.get("1").map(decode_mapping).unwrap_or_default(),
            },
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed @ (Value::Array(_) | Value::Object(_))) => DataDiff::from_value(&parsed),
                _ => DataDiff::default(),
            },
            _ => DataDiff::default(),
        }
    }
}

/// The diff engine that compares snapshots
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two snapshots and return all differences
    pub fn diff(before: &Mapping, after: &Mapping) -> DataDiff {
        let (removed_or_changed, added_or_changed) = Self::diff_mappings(before, after);
        DataDiff {
            removed_or_changed,
            added_or_changed,
        }
    }

    fn diff_mappings(before: &Mapping, after: &Mapping) -> (Mapping, Mapping) {
        let mut removed = Mapping::new();
        let mut added = Mapping::new();

        for (key, old) in before {
            let Some(new) = after.get(key) else {
                removed.insert(key.clone(), old.clone());
                continue;
            };

            match (old, new) {
                (Value::Object(old_map), Value::Object(new_map)) => {
                    let (sub_removed, sub_added) = Self::diff_mappings(old_map, new_map);
                    if !sub_removed.is_empty() {
                        removed.insert(key.clone(), Value::Object(sub_removed));
                    }
                    if !sub_added.is_empty() {
                        added.insert(key.clone(), Value::Object(sub_added));
                    }
                }
                // Mapping replaced by a scalar/list: swap the whole value
                (Value::Object(_), _) => {
                    removed.insert(key.clone(), old.clone());
                    added.insert(key.clone(), new.clone());
                }
                _ if old != new => {
                    removed.insert(key.clone(), old.clone());
                    added.insert(key.clone(), new.clone());
                }
                _ => {}
            }
        }

        for (key, new) in after {
            if !before.contains_key(key) {
                added.insert(key.clone(), new.clone());
            }
        }

        (removed, added)
    }
}

fn patch(base: &Mapping, removed: &Mapping, added: &Mapping) -> Mapping {
    let mut out = base.clone();

    for (key, old) in removed {
        if added.contains_key(key) {
            continue;
        }
        match (out.get(key), old) {
            (Some(Value::Object(base_map)), Value::Object(removed_map)) if base_map != removed_map => {
                let nested = patch(base_map, removed_map, &Mapping::new());
                out.insert(key.clone(), Value::Object(nested));
            }
            _ => {
                out.remove(key);
            }
        }
    }

    for (key, new) in added {
        let nested = match (out.get(key), removed.get(key), new) {
            (Some(Value::Object(base_map)), Some(Value::Object(removed_map)), Value::Object(added_map)) => {
                Some(patch(base_map, removed_map, added_map))
            }
            (Some(Value::Object(base_map)), None, Value::Object(added_map)) => {
                Some(patch(base_map, &Mapping::new(), added_map))
            }
            _ => None,
        };
        match nested {
            Some(map) => out.insert(key.clone(), Value::Object(map)),
            None => out.insert(key.clone(), new.clone()),
        };
    }

    out
}
