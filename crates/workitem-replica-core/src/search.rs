//! Ordering of search hits by workflow state.
//!
//! The index ranks by text relevance; the surface then groups hits so
//! open work comes first, completed work next, and removed work last.
//! The category of a record is looked up through the [`MetadataMap`]; a
//! type or state the map does not know sorts as [`StateCategory::Unknown`].

use crate::models::{LocalRecord, MetadataMap, StateCategory};

/// Sort priority of a category. Lower sorts first.
pub fn state_priority(category: StateCategory) -> u8 {
    match category {
        StateCategory::Completed => 1,
        StateCategory::Removed => 2,
        _ => 0,
    }
}

/// Category of `record`'s current state according to `metadata`.
pub fn category_of(metadata: &MetadataMap, record: &LocalRecord) -> StateCategory {
    metadata
        .get(&record.type_name)
        .and_then(|t| t.states.get(&record.state))
        .map(|s| s.category)
        .unwrap_or(StateCategory::Unknown)
}

/// Stable sort by state priority. Relevance order is kept within a priority.
pub fn sort_by_state(records: &mut [LocalRecord], metadata: &MetadataMap) {
    records.sort_by_key(|r| state_priority(category_of(metadata, r)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StateMetadata, TypeMetadata};
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;

    fn record(id: i64, state: &str) -> LocalRecord {
        LocalRecord {
            id,
            revision: 1,
            title: String::new(),
            type_name: "Bug".to_string(),
            changed_at: DateTime::<Utc>::UNIX_EPOCH,
            assignee: String::new(),
            state: state.to_string(),
            iteration_path: String::new(),
            tags: Vec::new(),
        }
    }

    fn metadata() -> MetadataMap {
        let states: BTreeMap<String, StateMetadata> = [
            ("New", StateCategory::Proposed),
            ("Active", StateCategory::InProgress),
            ("Closed", StateCategory::Completed),
            ("Cut", StateCategory::Removed),
        ]
        .into_iter()
        .map(|(name, category)| {
            (
                name.to_string(),
                StateMetadata {
                    color: "b2b2b2".to_string(),
                    category,
                },
            )
        })
        .collect();

        [(
            "Bug".to_string(),
            TypeMetadata {
                icon_url: String::new(),
                icon_data_url: String::new(),
                states,
            },
        )]
        .into_iter()
        .collect()
    }

    #[test]
    fn open_then_completed_then_removed() {
        let mut records = vec![
            record(1, "Cut"),
            record(2, "Closed"),
            record(3, "Active"),
            record(4, "New"),
        ];
        sort_by_state(&mut records, &metadata());
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4, 2, 1]);
    }

    #[test]
    fn unknown_state_sorts_with_open_work() {
        let map = metadata();
        assert_eq!(category_of(&map, &record(1, "Mystery")), StateCategory::Unknown);
        assert_eq!(category_of(&MetadataMap::new(), &record(1, "Closed")), StateCategory::Unknown);

        let mut records = vec![record(1, "Closed"), record(2, "Mystery")];
        sort_by_state(&mut records, &map);
        assert_eq!(records[0].id, 2);
    }
}
