//! Composite ordering of the items in one grouping.
//!
//! A [`SortPipeline`] is an ordered list of [`SortStrategy`] criteria, the
//! first one most significant. It always ends with a fallback on the
//! previous rank, so items tied on every configured criterion keep the order
//! they already had.
//!
//! Sorting is a stable multi-pass sort: one pass per criterion, least
//! significant first, each pass refining the order left by the one before.

mod key;
mod strategy;

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::domain::{Item, fields};
use crate::mirror::Mirror;

pub use key::{SortKey, compare_json};
pub use strategy::{
    FieldOptions, LabelOptions, LabelRanking, ReadyOptions, SortStrategy, StrategyConfig, is_ready,
};

/// Ordered list of sort criteria, ending with the rank fallback
#[derive(Debug, Clone, PartialEq)]
pub struct SortPipeline {
    strategies: Vec<SortStrategy>,
}

impl SortPipeline {
    /// Build a pipeline from criteria in order of significance
    pub fn new(mut strategies: Vec<SortStrategy>) -> Self {
        strategies.push(SortStrategy::rank_fallback());
        Self { strategies }
    }

    /// Build a pipeline from configs, resolving label titles with `titles_to_ids`
    pub fn resolve(configs: &[StrategyConfig], titles_to_ids: &HashMap<String, String>) -> Self {
        Self::new(
            configs
                .iter()
                .map(|config| SortStrategy::from_config(config, titles_to_ids))
                .collect(),
        )
    }

    /// Criteria in order of significance, fallback included
    pub fn strategies(&self) -> &[SortStrategy] {
        &self.strategies
    }

    /// Every field whose change can move an item within or between groupings
    pub fn relevant_fields(&self) -> BTreeSet<String> {
        let mut relevant: BTreeSet<String> = [fields::GROUP, fields::RANK]
            .into_iter()
            .map(String::from)
            .collect();
        for strategy in &self.strategies {
            relevant.extend(strategy.relevant_fields().into_iter().map(String::from));
        }
        relevant
    }

    /// Order `items` from first to last; position `i` gets rank `i + 1`
    pub fn sort(&self, mut items: Vec<Item>, mirror: &Mirror) -> Vec<Item> {
        // Fix the starting order so ties on every criterion resolve the same way each run
        items.sort_by(|a, b| a.id.cmp(&b.id));

        for strategy in self.strategies.iter().rev() {
            let mut keyed: Vec<(SortKey, Item)> = items
                .into_iter()
                .map(|item| (strategy.key(&item, mirror), item))
                .collect();
            if strategy.is_reversed() {
                keyed.sort_by(|a, b| b.0.cmp(&a.0));
            } else {
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
            }
            items = keyed.into_iter().map(|(_, item)| item).collect();
        }

        debug!("Sorted {} items with {} criteria", items.len(), self.strategies.len());
        items
    }
}

impl Default for SortPipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str, rank: i64) -> Item {
        Item::new(id).with_kind("Tasks").in_group("p1").with_rank(rank)
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_default_pipeline_keeps_rank_order() {
        let items = vec![task("a", 3), task("b", 1), task("c", 2)];
        let sorted = SortPipeline::default().sort(items, &Mirror::new());
        assert_eq!(ids(&sorted), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_unranked_items_sort_first() {
        let items = vec![task("a", 1), Item::new("new").with_kind("Tasks").in_group("p1")];
        let sorted = SortPipeline::default().sort(items, &Mirror::new());
        assert_eq!(ids(&sorted), vec!["new", "a"]);
    }

    #[test]
    fn test_descending_field_with_rank_tie_break() {
        let pipeline = SortPipeline::new(vec![SortStrategy::Field(
            FieldOptions::new("priority", json!(0)).reversed(),
        )]);
        let items = vec![
            task("a", 2).with_field("priority", json!(5)),
            task("b", 1).with_field("priority", json!(1)),
            task("c", 4).with_field("priority", json!(5)),
            task("d", 3),
        ];
        let sorted = pipeline.sort(items, &Mirror::new());
        assert_eq!(ids(&sorted), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_first_criterion_dominates() {
        let pipeline = SortPipeline::new(vec![
            SortStrategy::IsReady(ReadyOptions::default()),
            SortStrategy::Field(FieldOptions::new("priority", json!(0)).reversed()),
        ]);
        let mut deferred = task("a", 1).with_field("priority", json!(9));
        deferred.deferred = Some(true);
        let items = vec![deferred, task("b", 2).with_field("priority", json!(1)), task("c", 3)];

        let sorted = pipeline.sort(items, &Mirror::new());
        assert_eq!(ids(&sorted), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ties_keep_previous_order() {
        let pipeline = SortPipeline::new(vec![SortStrategy::Field(FieldOptions::new("priority", json!(0)))]);
        let items = vec![
            task("z", 1).with_field("priority", json!(1)),
            task("y", 2).with_field("priority", json!(1)),
            task("x", 3).with_field("priority", json!(1)),
        ];
        let sorted = pipeline.sort(items, &Mirror::new());
        assert_eq!(ids(&sorted), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_label_ordering() {
        let titles = HashMap::from([("urgent".to_string(), "l1".to_string())]);
        let pipeline = SortPipeline::resolve(
            &[StrategyConfig::Label(LabelOptions {
                labels: vec!["urgent".to_string()],
                no_match_last: true,
                reverse: false,
            })],
            &titles,
        );
        let mut urgent = task("b", 2);
        urgent.labels = Some(vec!["l1".to_string()]);
        let sorted = pipeline.sort(vec![task("a", 1), urgent], &Mirror::new());
        assert_eq!(ids(&sorted), vec!["b", "a"]);
    }

    #[test]
    fn test_relevant_fields() {
        let pipeline = SortPipeline::new(vec![
            SortStrategy::Field(FieldOptions::new("dueDate", json!(null))),
            SortStrategy::IsReady(ReadyOptions::default()),
        ]);
        let relevant = pipeline.relevant_fields();
        for field in ["parentId", "masterRank", "dueDate", "done", "dependsOn", "backburner"] {
            assert!(relevant.contains(field), "missing {}", field);
        }
        assert!(!relevant.contains("labelIds"));
        assert!(!relevant.contains("title"));
    }
}
