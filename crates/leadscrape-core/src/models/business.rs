use std::collections::HashSet;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::TaskId;

pub const UNKNOWN_NAME: &str = "Unknown";

/// One extracted listing. Strategies leave `task_id` and `scraped_at` unset;
/// the orchestrator and the store stamp them on the way to persistence.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub website: String,
    pub email: String,
    pub rating: String,
    pub category: String,
    pub task_id: Option<TaskId>,
    pub scraped_at: Option<SystemTime>,
}

impl BusinessRecord {
    pub fn has_known_name(&self) -> bool {
        !self.name.trim().is_empty() && self.name != UNKNOWN_NAME
    }

    /// Fills every empty field of `self` from `other`.
    pub fn merge_from(&mut self, other: &BusinessRecord) {
        if !self.has_known_name() && other.has_known_name() {
            self.name = other.name.clone();
        }
        for (target, source) in [
            (&mut self.address, &other.address),
            (&mut self.phone, &other.phone),
            (&mut self.website, &other.website),
            (&mut self.email, &other.email),
            (&mut self.rating, &other.rating),
            (&mut self.category, &other.category),
        ] {
            if target.is_empty() && !source.is_empty() {
                target.clone_from(source);
            }
        }
    }
}

/// Keeps the first record per case-insensitive name; records without a name are dropped.
pub fn dedupe_by_name(records: Vec<BusinessRecord>) -> Vec<BusinessRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| {
            let key = record.name.trim().to_lowercase();
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{BusinessRecord, UNKNOWN_NAME, dedupe_by_name};

    fn named(name: &str) -> BusinessRecord {
        BusinessRecord {
            name: name.to_string(),
            ..BusinessRecord::default()
        }
    }

    #[test]
    fn dedupe_keeps_first_occurrence_and_drops_blank_names() {
        let records = vec![named("Blue Door"), named("  "), named("blue door "), named("Anchor")];
        let names: Vec<_> = dedupe_by_name(records)
            .into_iter()
            .map(|record| record.name)
            .collect();
        assert_eq!(names, vec!["Blue Door", "Anchor"]);
    }

    #[test]
    fn merge_prefers_existing_values() {
        let mut existing = BusinessRecord {
            name: UNKNOWN_NAME.to_string(),
            phone: "555-0100".to_string(),
            ..BusinessRecord::default()
        };
        let incoming = BusinessRecord {
            name: "Harbor Cafe".to_string(),
            phone: "555-0199".to_string(),
            email: "hi@harbor.example".to_string(),
            ..BusinessRecord::default()
        };

        existing.merge_from(&incoming);

        assert_eq!(existing.name, "Harbor Cafe");
        assert_eq!(existing.phone, "555-0100");
        assert_eq!(existing.email, "hi@harbor.example");
    }
}
