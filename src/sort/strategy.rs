//! Sort strategies and their configuration.
//!
//! A strategy turns an item into a [`SortKey`]. Three are built in:
//! - **field**: the raw value of a named field
//! - **label**: position of the first listed label the item carries
//! - **is_ready**: ready items (not deferred, dependencies done) first

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::SortKey;
use crate::domain::{Item, fields};
use crate::mirror::Mirror;

fn default_true() -> bool {
    true
}

/// Options of the `field` strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Wire name of the field to order by
    pub field_name: String,
    /// Value used when the field is missing (or null, see below)
    #[serde(default)]
    pub empty_value: Value,
    /// Also substitute `empty_value` for an explicit null
    #[serde(default = "default_true")]
    pub replace_none_with_empty: bool,
    #[serde(default)]
    pub reverse: bool,
}

impl FieldOptions {
    pub fn new(field_name: impl Into<String>, empty_value: Value) -> Self {
        Self {
            field_name: field_name.into(),
            empty_value,
            replace_none_with_empty: true,
            reverse: false,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// Options of the `label` strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelOptions {
    /// Label titles, most significant first
    pub labels: Vec<String>,
    /// Items with none of the labels go after (true) or before (false) the rest
    #[serde(default = "default_true")]
    pub no_match_last: bool,
    #[serde(default)]
    pub reverse: bool,
}

/// Options of the `is_ready` strategy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadyOptions {
    #[serde(default)]
    pub reverse: bool,
}

/// One configured sort criterion, before label titles are resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyConfig {
    Field(FieldOptions),
    Label(LabelOptions),
    IsReady(ReadyOptions),
}

impl StrategyConfig {
    /// Build from a `(name, options)` pair as found in a `SORT_LIST` value
    pub fn from_pair(name: &str, options: Value) -> Result<Self, serde_json::Error> {
        let mut options = match options {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "options for strategy {} must be an object, got {}",
                    name, other
                )));
            }
        };
        options.insert("strategy".to_string(), Value::String(name.to_string()));
        serde_json::from_value(Value::Object(options))
    }

    pub fn uses_labels(&self) -> bool {
        matches!(self, StrategyConfig::Label(_))
    }
}

/// Label ranking with titles already resolved to label ids
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRanking {
    /// Resolved id per configured title; `None` for titles with no such label
    label_ids: Vec<Option<String>>,
    no_match_last: bool,
    reverse: bool,
}

impl LabelRanking {
    /// Resolve `options` against a title → id map
    pub fn resolve(options: &LabelOptions, titles_to_ids: &HashMap<String, String>) -> Self {
        let label_ids = options
            .labels
            .iter()
            .map(|title| {
                let id = titles_to_ids.get(title).cloned();
                if id.is_none() {
                    warn!("Sort label {:?} does not exist, it will never match", title);
                }
                id
            })
            .collect();
        Self {
            label_ids,
            no_match_last: options.no_match_last,
            reverse: options.reverse,
        }
    }

    fn position(&self, item: &Item) -> i64 {
        let matched = self
            .label_ids
            .iter()
            .position(|id| id.as_deref().is_some_and(|id| item.has_label(id)));
        match matched {
            Some(index) => index as i64,
            None if self.no_match_last => self.label_ids.len() as i64,
            None => -1,
        }
    }
}

/// A sort criterion ready to compute keys
#[derive(Debug, Clone, PartialEq)]
pub enum SortStrategy {
    Field(FieldOptions),
    Label(LabelRanking),
    IsReady(ReadyOptions),
}

impl SortStrategy {
    /// Turn a config into a strategy, resolving label titles
    pub fn from_config(config: &StrategyConfig, titles_to_ids: &HashMap<String, String>) -> Self {
        match config {
            StrategyConfig::Field(options) => SortStrategy::Field(options.clone()),
            StrategyConfig::Label(options) => SortStrategy::Label(LabelRanking::resolve(options, titles_to_ids)),
            StrategyConfig::IsReady(options) => SortStrategy::IsReady(options.clone()),
        }
    }

    /// Final tie-breaker: previous rank, never-ranked items first
    pub fn rank_fallback() -> Self {
        SortStrategy::Field(FieldOptions::new(fields::RANK, Value::from(0)))
    }

    /// Whether this strategy sorts in descending order
    pub fn is_reversed(&self) -> bool {
        match self {
            SortStrategy::Field(options) => options.reverse,
            SortStrategy::Label(ranking) => ranking.reverse,
            SortStrategy::IsReady(options) => options.reverse,
        }
    }

    /// Fields whose change can alter this strategy's keys
    pub fn relevant_fields(&self) -> Vec<&str> {
        match self {
            SortStrategy::Field(options) => vec![options.field_name.as_str()],
            SortStrategy::Label(_) => vec![fields::LABELS],
            SortStrategy::IsReady(_) => vec![fields::DONE, fields::DEPENDENCIES, fields::DEFERRED],
        }
    }

    /// Key of `item`; readiness looks dependencies up in `mirror`
    pub fn key(&self, item: &Item, mirror: &Mirror) -> SortKey {
        match self {
            SortStrategy::Field(options) => SortKey::Value(field_value(options, item)),
            SortStrategy::Label(ranking) => SortKey::Position(ranking.position(item)),
            SortStrategy::IsReady(_) => SortKey::Position(if is_ready(item, mirror) { 0 } else { 1 }),
        }
    }
}

fn field_value(options: &FieldOptions, item: &Item) -> Value {
    match item.field(&options.field_name) {
        None => options.empty_value.clone(),
        Some(Value::Null) if options.replace_none_with_empty => options.empty_value.clone(),
        Some(value) => value,
    }
}

/// Not deferred, and every dependency done. Dependencies missing from the
/// mirror count as done; a non-mapping dependency field is ignored.
pub fn is_ready(item: &Item, mirror: &Mirror) -> bool {
    if item.is_deferred() {
        return false;
    }
    match item.dependency_ids() {
        Some(mut ids) => ids.all(|id| mirror.get(id).is_none_or(Item::is_done)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str) -> Item {
        Item::new(id).with_kind("Tasks").in_group("p1")
    }

    fn titles() -> HashMap<String, String> {
        HashMap::from([
            ("urgent".to_string(), "l-urgent".to_string()),
            ("someday".to_string(), "l-someday".to_string()),
        ])
    }

    #[test]
    fn test_strategy_config_from_yaml() {
        let yaml = r#"
- strategy: field
  field_name: dueDate
  empty_value: "9999-12-31"
- strategy: label
  labels: [urgent, someday]
  no_match_last: false
- strategy: is_ready
  reverse: true
"#;
        let configs: Vec<StrategyConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(configs.len(), 3);
        assert!(matches!(&configs[0], StrategyConfig::Field(o) if o.field_name == "dueDate" && o.replace_none_with_empty));
        assert!(matches!(&configs[1], StrategyConfig::Label(o) if !o.no_match_last && o.labels.len() == 2));
        assert!(matches!(&configs[2], StrategyConfig::IsReady(o) if o.reverse));
    }

    #[test]
    fn test_from_pair() {
        let config = StrategyConfig::from_pair("field", json!({"field_name": "priority", "reverse": true})).unwrap();
        assert!(matches!(config, StrategyConfig::Field(o) if o.reverse && o.empty_value.is_null()));
        assert!(StrategyConfig::from_pair("is_ready", Value::Null).is_ok());
        assert!(StrategyConfig::from_pair("bogus", json!({})).is_err());
        assert!(StrategyConfig::from_pair("field", json!([1])).is_err());
    }

    #[test]
    fn test_field_key_substitutes_empty_value() {
        let options = FieldOptions::new("priority", json!(0));
        let strategy = SortStrategy::Field(options.clone());
        let mirror = Mirror::new();

        assert_eq!(strategy.key(&task("a"), &mirror), SortKey::Value(json!(0)));
        let nulled = task("b").with_field("priority", Value::Null);
        assert_eq!(strategy.key(&nulled, &mirror), SortKey::Value(json!(0)));
        let set = task("c").with_field("priority", json!(3));
        assert_eq!(strategy.key(&set, &mirror), SortKey::Value(json!(3)));

        let keep_null = SortStrategy::Field(FieldOptions {
            replace_none_with_empty: false,
            ..options
        });
        assert_eq!(keep_null.key(&nulled, &mirror), SortKey::Value(Value::Null));
    }

    #[test]
    fn test_label_position() {
        let options = LabelOptions {
            labels: vec!["urgent".to_string(), "missing".to_string(), "someday".to_string()],
            no_match_last: true,
            reverse: false,
        };
        let ranking = LabelRanking::resolve(&options, &titles());

        let mut urgent = task("a");
        urgent.labels = Some(vec!["l-someday".to_string(), "l-urgent".to_string()]);
        let mut someday = task("b");
        someday.labels = Some(vec!["l-someday".to_string()]);

        assert_eq!(ranking.position(&urgent), 0);
        assert_eq!(ranking.position(&someday), 2);
        assert_eq!(ranking.position(&task("c")), 3);

        let first = LabelRanking::resolve(
            &LabelOptions {
                no_match_last: false,
                ..options
            },
            &titles(),
        );
        assert_eq!(first.position(&task("c")), -1);
    }

    #[test]
    fn test_deferred_is_never_ready() {
        let mut item = task("a");
        item.deferred = Some(true);
        assert!(!is_ready(&item, &Mirror::new()));
    }

    #[test]
    fn test_empty_dependencies_are_ready() {
        let mut item = task("a");
        item.dependencies = Some(json!({}));
        assert!(is_ready(&item, &Mirror::new()));
        assert!(is_ready(&task("b"), &Mirror::new()));
    }

    #[test]
    fn test_dependencies_must_be_done() {
        let mut blocker = task("dep");
        let mirror_open = Mirror::from_items(vec![blocker.clone()]);
        blocker.done = Some(true);
        let mirror_done = Mirror::from_items(vec![blocker]);

        let mut item = task("a");
        item.dependencies = Some(json!({"dep": true}));
        assert!(!is_ready(&item, &mirror_open));
        assert!(is_ready(&item, &mirror_done));

        // Unknown dependencies count as done
        item.dependencies = Some(json!({"gone": true}));
        assert!(is_ready(&item, &Mirror::new()));

        // A list is not a mapping and is ignored
        item.dependencies = Some(json!(["dep"]));
        assert!(is_ready(&item, &mirror_open));
    }

    #[test]
    fn test_relevant_fields() {
        let ready = SortStrategy::IsReady(ReadyOptions::default());
        assert_eq!(ready.relevant_fields(), vec!["done", "dependsOn", "backburner"]);
        assert_eq!(SortStrategy::rank_fallback().relevant_fields(), vec!["masterRank"]);
    }
}
