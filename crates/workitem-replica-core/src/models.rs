//! Core data models shared by the replica, the sync engine, and the index.
//!
//! [`RemoteItem`] is what the remote source returns; [`LocalRecord`] is the
//! denormalized projection the replica stores; [`IndexedItem`] is the
//! tokenizable projection fed to the search index. Revision is the only
//! staleness signal: timestamps are carried for display and ordering checks,
//! never for deciding whether a record is stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Remote item identifier.
pub type ItemId = i64;

/// A single remote field value, kept as raw JSON.
pub type FieldValue = serde_json::Value;

/// Remote field reference names.
pub mod field {
    pub const TITLE: &str = "System.Title";
    pub const WORK_ITEM_TYPE: &str = "System.WorkItemType";
    pub const CHANGED_DATE: &str = "System.ChangedDate";
    pub const ASSIGNED_TO: &str = "System.AssignedTo";
    pub const STATE: &str = "System.State";
    pub const ITERATION_PATH: &str = "System.IterationPath";
    pub const TAGS: &str = "System.Tags";
}

/// Every field the replica projects out of a remote item.
pub const ALL_FIELDS: [&str; 7] = [
    field::TITLE,
    field::WORK_ITEM_TYPE,
    field::CHANGED_DATE,
    field::ASSIGNED_TO,
    field::STATE,
    field::ITERATION_PATH,
    field::TAGS,
];

/// Display name used when a remote item has no assignee.
pub const UNASSIGNED: &str = "Unassigned";

/// An item as returned by the remote batch fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: ItemId,
    #[serde(rename = "rev")]
    pub revision: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl RemoteItem {
    fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

/// The replica's denormalized copy of a remote item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub id: ItemId,
    pub revision: i64,
    pub title: String,
    pub type_name: String,
    pub changed_at: DateTime<Utc>,
    pub assignee: String,
    pub state: String,
    pub iteration_path: String,
    pub tags: Vec<String>,
}

impl LocalRecord {
    /// Project a remote item into its replica form.
    ///
    /// Missing optional fields fall back to neutral values: no assignee
    /// becomes [`UNASSIGNED`], no tags becomes an empty list, and an
    /// unparseable change date becomes the Unix epoch.
    pub fn from_remote(item: &RemoteItem) -> Self {
        let assignee = match item.fields.get(field::ASSIGNED_TO) {
            Some(serde_json::Value::Object(user)) => user
                .get("displayName")
                .and_then(|v| v.as_str())
                .unwrap_or(UNASSIGNED)
                .to_string(),
            Some(serde_json::Value::String(name)) if !name.is_empty() => name.clone(),
            _ => UNASSIGNED.to_string(),
        };

        let changed_at = item
            .str_field(field::CHANGED_DATE)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Self {
            id: item.id,
            revision: item.revision,
            title: item.str_field(field::TITLE).unwrap_or_default().to_string(),
            type_name: item
                .str_field(field::WORK_ITEM_TYPE)
                .unwrap_or_default()
                .to_string(),
            changed_at,
            assignee,
            state: item.str_field(field::STATE).unwrap_or_default().to_string(),
            iteration_path: item
                .str_field(field::ITERATION_PATH)
                .unwrap_or_default()
                .to_string(),
            tags: item
                .str_field(field::TAGS)
                .map(split_tags)
                .unwrap_or_default(),
        }
    }

    /// Last segment of the iteration path (`Project\Sprint 12` → `Sprint 12`).
    pub fn short_iteration(&self) -> &str {
        match self.iteration_path.rfind('\\') {
            Some(i) => &self.iteration_path[i + 1..],
            None => &self.iteration_path,
        }
    }

    /// Text the search index tokenizes for this record.
    pub fn searchable_text(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            self.state,
            self.id,
            self.type_name,
            self.assignee,
            self.short_iteration(),
            self.title,
            self.tags.join(" ")
        )
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// The tokenizable projection of a [`LocalRecord`]. Derived, never authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedItem {
    pub id: ItemId,
    pub searchable_text: String,
}

impl From<&LocalRecord> for IndexedItem {
    fn from(record: &LocalRecord) -> Self {
        Self {
            id: record.id,
            searchable_text: record.searchable_text(),
        }
    }
}

/// Ids touched by one sync attempt. Produced even when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub added_ids: BTreeSet<ItemId>,
    pub updated_ids: BTreeSet<ItemId>,
    pub deleted_ids: BTreeSet<ItemId>,
}

impl SyncSummary {
    /// True when any of the three id sets is non-empty.
    pub fn is_dirty(&self) -> bool {
        !(self.added_ids.is_empty() && self.updated_ids.is_empty() && self.deleted_ids.is_empty())
    }

    /// Human-readable outcome, e.g. `Sync items... Success! (2 added 1 deleted)`.
    pub fn message(&self) -> String {
        let mut parts = Vec::new();
        if !self.added_ids.is_empty() {
            parts.push(format!("{} added", self.added_ids.len()));
        }
        if !self.updated_ids.is_empty() {
            parts.push(format!("{} updated", self.updated_ids.len()));
        }
        if !self.deleted_ids.is_empty() {
            parts.push(format!("{} deleted", self.deleted_ids.len()));
        }
        if parts.is_empty() {
            parts.push("No change".to_string());
        }
        format!("Sync items... Success! ({})", parts.join(" "))
    }
}

// ─── Item type metadata ─────────────────────────────────────────────

/// Closed set of workflow state categories. Used only for sort priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateCategory {
    Proposed,
    InProgress,
    Resolved,
    Completed,
    Removed,
    #[serde(other)]
    Unknown,
}

impl StateCategory {
    pub fn from_label(label: &str) -> Self {
        match label {
            "Proposed" => Self::Proposed,
            "InProgress" => Self::InProgress,
            "Resolved" => Self::Resolved,
            "Completed" => Self::Completed,
            "Removed" => Self::Removed,
            _ => Self::Unknown,
        }
    }
}

/// Icon reference inside a remote type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IconRef {
    #[serde(default)]
    pub id: String,
    pub url: String,
}

/// A workflow state as defined by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub category: String,
}

/// Item type definition as returned by the metadata endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTypeDefinition {
    pub name: String,
    pub icon: IconRef,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub states: Vec<StateDefinition>,
}

/// Display metadata for one state of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub color: String,
    pub category: StateCategory,
}

/// Persisted, denormalized metadata for one item type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub type_name: String,
    pub icon_url: String,
    #[serde(skip)]
    pub icon_bytes: Vec<u8>,
    pub states: BTreeMap<String, StateMetadata>,
}

impl MetadataEntry {
    pub fn from_definition(def: &ItemTypeDefinition, icon_bytes: Vec<u8>) -> Self {
        Self {
            type_name: def.name.clone(),
            icon_url: def.icon.url.clone(),
            icon_bytes,
            states: state_map(&def.states),
        }
    }
}

/// Build the `stateName → {color, category}` map for a type.
pub fn state_map(states: &[StateDefinition]) -> BTreeMap<String, StateMetadata> {
    states
        .iter()
        .map(|s| {
            (
                s.name.clone(),
                StateMetadata {
                    color: s.color.clone(),
                    category: StateCategory::from_label(&s.category),
                },
            )
        })
        .collect()
}

/// Consumer-facing metadata for one type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMetadata {
    pub icon_url: String,
    /// Self-contained `data:` URL of the cached icon bytes.
    pub icon_data_url: String,
    pub states: BTreeMap<String, StateMetadata>,
}

/// `typeName → TypeMetadata`. Always replaced wholesale, never patched.
pub type MetadataMap = HashMap<String, TypeMetadata>;
