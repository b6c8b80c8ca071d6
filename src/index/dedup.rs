use std::collections::HashMap;

use serde::Serialize;

use super::registry::StoreSnapshot;
use super::DedupKey;
use crate::store::{StoreError, VectorStore};

/// Entries sharing one grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub key: String,
    /// First entry in snapshot order
    pub keep: String,
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepPlan {
    pub groups: Vec<DuplicateGroup>,
    /// Every id marked for removal, in group order
    pub removed: Vec<String>,
}

impl SweepPlan {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SweepOutcome {
    NothingToDo,
    Cancelled,
    Removed { removed: usize, remaining: usize },
}

pub struct DedupSweeper {
    key: DedupKey,
}

impl DedupSweeper {
    pub fn new(key: DedupKey) -> Self {
        Self { key }
    }

    /// Group stored entries by key. Entries without a usable path are left
    /// out entirely. Groups come back in order of their first member.
    pub fn plan(&self, snapshot: &StoreSnapshot) -> SweepPlan {
        let mut order: Vec<String> = Vec::new();
        let mut members: HashMap<String, Vec<String>> = HashMap::new();

        for (pos, id) in snapshot.ids.iter().enumerate() {
            let Some(key) = snapshot.path_at(pos).and_then(|p| self.key.key_for(p)) else {
                continue;
            };
            members
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(id.clone());
        }

        let mut plan = SweepPlan::default();
        for key in order {
            let Some(mut ids) = members.remove(&key) else {
                continue;
            };
            if ids.len() < 2 {
                continue;
            }
            let remove = ids.split_off(1);
            plan.removed.extend(remove.iter().cloned());
            plan.groups.push(DuplicateGroup {
                key,
                keep: ids.remove(0),
                remove,
            });
        }
        plan
    }

    /// Delete the planned entries once `confirm` approves.
    ///
    /// An empty plan returns without asking and without touching the store.
    pub fn apply<F>(
        &self,
        store: &dyn VectorStore,
        plan: &SweepPlan,
        confirm: F,
    ) -> Result<SweepOutcome, StoreError>
    where
        F: FnOnce(&SweepPlan) -> bool,
    {
        if plan.is_empty() {
            log::info!("no duplicates found");
            return Ok(SweepOutcome::NothingToDo);
        }

        if !confirm(plan) {
            log::info!("dedup cancelled, {} duplicates kept", plan.removed.len());
            return Ok(SweepOutcome::Cancelled);
        }

        store.delete(&plan.removed)?;
        let remaining = store.count()?;
        log::info!(
            "removed {} duplicates in {} groups, {} entries remain",
            plan.removed.len(),
            plan.groups.len(),
            remaining
        );

        Ok(SweepOutcome::Removed {
            removed: plan.removed.len(),
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{path_metadata, Metadata};

    fn snapshot(entries: &[(&str, Option<&str>)]) -> StoreSnapshot {
        StoreSnapshot {
            ids: entries.iter().map(|(id, _)| id.to_string()).collect(),
            embeddings: vec![],
            metadatas: entries
                .iter()
                .map(|(_, p)| p.map(path_metadata))
                .collect(),
        }
    }

    #[test]
    fn test_plan_groups_by_basename() {
        let snap = snapshot(&[
            ("1", Some("/a/cat.jpg")),
            ("2", Some("/b/dog.jpg")),
            ("3", Some("/c/cat.jpg")),
            ("4", Some("/d/cat.jpg")),
            ("5", None),
            ("6", Some("")),
        ]);
        let plan = DedupSweeper::new(DedupKey::Basename).plan(&snap);

        assert_eq!(plan.removed, vec!["3".to_string(), "4".to_string()]);
        assert_eq!(
            plan.groups,
            vec![DuplicateGroup {
                key: "cat.jpg".to_string(),
                keep: "1".to_string(),
                remove: vec!["3".to_string(), "4".to_string()],
            }]
        );
    }

    #[test]
    fn test_full_path_key_keeps_same_name_in_other_dirs() {
        let snap = snapshot(&[
            ("1", Some("/a/cat.jpg")),
            ("2", Some("/b/cat.jpg")),
            ("3", Some("/a/cat.jpg")),
        ]);
        let plan = DedupSweeper::new(DedupKey::FullPath).plan(&snap);

        assert_eq!(plan.removed, vec!["3".to_string()]);
    }

    #[test]
    fn test_missing_metadata_never_grouped() {
        let mut snap = snapshot(&[("1", None), ("2", None)]);
        snap.metadatas.push(Some(Metadata::new()));
        snap.ids.push("3".to_string());

        assert!(DedupSweeper::new(DedupKey::Basename).plan(&snap).is_empty());
    }

    #[test]
    fn test_plan_serializes() {
        let snap = snapshot(&[("1", Some("/a/x.png")), ("2", Some("/b/x.png"))]);
        let plan = DedupSweeper::new(DedupKey::Basename).plan(&snap);
        let json = serde_json::to_value(&plan).unwrap();

        assert_eq!(json["removed"], serde_json::json!(["2"]));
        assert_eq!(json["groups"][0]["keep"], "1");
    }
}
