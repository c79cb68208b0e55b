//! Item documents as stored in the remote task store
//!
//! Only the fields the ranking logic reads are typed; everything else rides
//! along in `extra` so a write-back sends the full document unchanged,
//! explicit nulls included.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Grouping id of the inbox. Items here are never resorted.
pub const INBOX_GROUP: &str = "unassigned";

/// A note consisting of a lone escaped newline is treated as empty.
pub const EMPTY_NOTE: &str = "\\\n";

/// Kind discriminator of task documents
pub const TASKS_KIND: &str = "Tasks";

/// Kind discriminator of category (project) documents
pub const CATEGORIES_KIND: &str = "Categories";

/// Kinds kept in the mirror
pub const MIRRORED_KINDS: [&str; 2] = [TASKS_KIND, CATEGORIES_KIND];

/// Wire names of the fields the engine knows about
pub mod fields {
    pub const ID: &str = "_id";
    pub const REV: &str = "_rev";
    pub const KIND: &str = "db";
    pub const GROUP: &str = "parentId";
    pub const RANK: &str = "masterRank";
    pub const DONE: &str = "done";
    pub const DEFERRED: &str = "backburner";
    pub const DEPENDENCIES: &str = "dependsOn";
    pub const LABELS: &str = "labelIds";
    pub const NOTE: &str = "note";
}

/// A task or category document
///
/// Decoding never fails on a field's value: a typed field whose wire value is
/// null or of an unexpected type reads as `None`, and the raw value is kept
/// so the write-back sends it out unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Item {
    /// Document id; empty when the inbound payload omitted it
    pub id: String,

    /// Opaque revision token, changes on every write
    pub rev: Option<String>,

    /// Kind discriminator ("Tasks", "Categories", ...)
    pub kind: Option<String>,

    /// Grouping (project) this item belongs to
    pub group_id: Option<String>,

    /// 1-based display order within the grouping
    pub rank: Option<f64>,

    pub done: Option<bool>,

    /// "Backburner" flag; deferred items are never ready
    pub deferred: Option<bool>,

    /// Map of item id to an arbitrary marker
    pub dependencies: Option<Value>,

    pub labels: Option<Vec<String>>,

    pub note: Option<String>,

    /// Every other field of the document
    pub extra: Map<String, Value>,

    /// Wire values of typed fields that did not read as their type
    unread: Map<String, Value>,
}

impl Item {
    /// Create a bare item with an id, mostly useful for fixtures.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Set the grouping
    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set the rank
    pub fn with_rank(mut self, rank: i64) -> Self {
        self.rank = Some(rank as f64);
        self
    }

    /// Set the revision
    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    /// Set an untyped field
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Grouping id, if any
    pub fn group(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Whether this document's kind is kept in the mirror
    pub fn is_mirrored_kind(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| MIRRORED_KINDS.contains(&kind))
    }

    /// Whether this document is a category (a grouping in its own right)
    pub fn is_category(&self) -> bool {
        self.kind.as_deref() == Some(CATEGORIES_KIND)
    }

    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.unwrap_or(false)
    }

    /// Dependency ids, when the dependency field is a mapping
    pub fn dependency_ids(&self) -> Option<impl Iterator<Item = &str>> {
        match &self.dependencies {
            Some(Value::Object(map)) => Some(map.keys().map(String::as_str)),
            _ => None,
        }
    }

    /// Whether this item lists `id` among its dependencies
    pub fn depends_on(&self, id: &str) -> bool {
        matches!(&self.dependencies, Some(Value::Object(map)) if map.contains_key(id))
    }

    pub fn has_label(&self, label_id: &str) -> bool {
        self.labels
            .as_ref()
            .is_some_and(|labels| labels.iter().any(|l| l == label_id))
    }

    /// Whether the note holds only the escaped-newline placeholder
    pub fn has_empty_note(&self) -> bool {
        self.note.as_deref() == Some(EMPTY_NOTE)
    }

    /// Raw JSON value of a field by its wire name
    pub fn field(&self, name: &str) -> Option<Value> {
        let typed = match name {
            fields::ID => Some(Value::String(self.id.clone())),
            fields::REV => self.rev.clone().map(Value::String),
            fields::KIND => self.kind.clone().map(Value::String),
            fields::GROUP => self.group_id.clone().map(Value::String),
            fields::RANK => self.rank.map(rank_value),
            fields::DONE => self.done.map(Value::Bool),
            fields::DEFERRED => self.deferred.map(Value::Bool),
            fields::DEPENDENCIES => self.dependencies.clone(),
            fields::LABELS => self
                .labels
                .as_ref()
                .map(|labels| Value::Array(labels.iter().cloned().map(Value::String).collect())),
            fields::NOTE => self.note.clone().map(Value::String),
            other => return self.extra.get(other).cloned(),
        };
        typed.or_else(|| self.unread.get(name).cloned())
    }
}

fn rank_value(rank: f64) -> Value {
    if rank.fract() == 0.0 && rank.abs() < i64::MAX as f64 {
        Value::from(rank as i64)
    } else {
        serde_json::Number::from_f64(rank)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Remove `name` from `doc` and read it with `read`. A value that does not
/// read is parked in `unread`.
fn take<T>(
    doc: &mut Map<String, Value>,
    unread: &mut Map<String, Value>,
    name: &str,
    read: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = doc.remove(name)?;
    let typed = read(&value);
    if typed.is_none() {
        unread.insert(name.to_string(), value);
    }
    typed
}

fn read_string(value: &Value) -> Option<String> {
    value.as_str().map(String::from)
}

fn read_labels(value: &Value) -> Option<Vec<String>> {
    value.as_array()?.iter().map(read_string).collect()
}

impl From<Map<String, Value>> for Item {
    fn from(mut doc: Map<String, Value>) -> Self {
        let mut unread = Map::new();
        let d = &mut doc;
        let u = &mut unread;
        let id = take(d, u, fields::ID, read_string).unwrap_or_default();
        let rev = take(d, u, fields::REV, read_string);
        let kind = take(d, u, fields::KIND, read_string);
        let group_id = take(d, u, fields::GROUP, read_string);
        // Ranks written by other clients are not always integral
        let rank = take(d, u, fields::RANK, Value::as_f64);
        let done = take(d, u, fields::DONE, Value::as_bool);
        let deferred = take(d, u, fields::DEFERRED, Value::as_bool);
        let dependencies = take(d, u, fields::DEPENDENCIES, |v| (!v.is_null()).then(|| v.clone()));
        let labels = take(d, u, fields::LABELS, read_labels);
        let note = take(d, u, fields::NOTE, read_string);

        Self {
            id,
            rev,
            kind,
            group_id,
            rank,
            done,
            deferred,
            dependencies,
            labels,
            note,
            extra: doc,
            unread,
        }
    }
}

impl From<Item> for Map<String, Value> {
    fn from(item: Item) -> Self {
        let mut doc = item.extra;
        doc.extend(item.unread);
        if !item.id.is_empty() || !doc.contains_key(fields::ID) {
            doc.insert(fields::ID.to_string(), Value::String(item.id));
        }

        let typed = [
            (fields::REV, item.rev.map(Value::String)),
            (fields::KIND, item.kind.map(Value::String)),
            (fields::GROUP, item.group_id.map(Value::String)),
            (fields::RANK, item.rank.map(rank_value)),
            (fields::DONE, item.done.map(Value::Bool)),
            (fields::DEFERRED, item.deferred.map(Value::Bool)),
            (fields::DEPENDENCIES, item.dependencies),
            (
                fields::LABELS,
                item.labels
                    .map(|labels| Value::Array(labels.into_iter().map(Value::String).collect())),
            ),
            (fields::NOTE, item.note.map(Value::String)),
        ];
        for (name, value) in typed {
            if let Some(value) = value {
                doc.insert(name.to_string(), value);
            }
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Item {
        serde_json::from_value(json!({
            "_id": "t1",
            "_rev": "3-abc",
            "db": "Tasks",
            "parentId": "p1",
            "masterRank": 4,
            "title": "Write report",
            "dependsOn": {"t0": true},
            "labelIds": ["l1", "l2"],
            "note": "\\\n"
        }))
        .unwrap()
    }

    #[test]
    fn test_typed_fields_deserialize() {
        let item = task();
        assert_eq!(item.id, "t1");
        assert_eq!(item.rev.as_deref(), Some("3-abc"));
        assert_eq!(item.group(), Some("p1"));
        assert_eq!(item.rank, Some(4.0));
        assert!(!item.is_done());
        assert!(!item.is_deferred());
        assert!(item.is_mirrored_kind());
        assert!(!item.is_category());
    }

    #[test]
    fn test_untyped_fields_survive_write_back() {
        let value = serde_json::to_value(task()).unwrap();
        assert_eq!(value["title"], json!("Write report"));
        assert_eq!(value["masterRank"], json!(4));
        assert!(value.get("done").is_none());
    }

    #[test]
    fn test_fractional_rank_is_kept() {
        let item: Item = serde_json::from_value(json!({"_id": "x", "masterRank": 2.5})).unwrap();
        assert_eq!(item.rank, Some(2.5));
        assert_eq!(item.field(fields::RANK), Some(json!(2.5)));
    }

    #[test]
    fn test_non_numeric_rank_reads_as_missing() {
        let item: Item = serde_json::from_value(json!({"_id": "x", "masterRank": "high"})).unwrap();
        assert_eq!(item.rank, None);
        assert_eq!(serde_json::to_value(&item).unwrap()["masterRank"], json!("high"));
    }

    #[test]
    fn test_explicit_nulls_survive_write_back() {
        let doc = json!({
            "_id": "t2",
            "_rev": "1-a",
            "db": "Tasks",
            "parentId": null,
            "masterRank": null,
            "done": null,
            "backburner": null,
            "dependsOn": null,
            "labelIds": null,
            "note": null,
            "dueDate": null
        });
        let item: Item = serde_json::from_value(doc.clone()).unwrap();
        assert_eq!(item.group(), None);
        assert_eq!(item.dependencies, None);
        assert_eq!(item.field(fields::DONE), Some(Value::Null));

        assert_eq!(serde_json::to_value(&item).unwrap(), doc);
    }

    #[test]
    fn test_unexpected_value_types_read_leniently() {
        let doc = json!({
            "_id": "t3",
            "db": "Tasks",
            "parentId": "p1",
            "done": 0,
            "backburner": "true",
            "labelIds": ["l1", 7],
            "note": {"text": "x"}
        });
        let item: Item = serde_json::from_value(doc.clone()).unwrap();
        assert!(!item.is_done());
        assert!(!item.is_deferred());
        assert!(!item.has_label("l1"));
        assert_eq!(item.note, None);
        assert_eq!(item.field(fields::LABELS), Some(json!(["l1", 7])));

        assert_eq!(serde_json::to_value(&item).unwrap(), doc);
    }

    #[test]
    fn test_typed_write_replaces_unread_value() {
        let mut item: Item = serde_json::from_value(json!({"_id": "t4", "masterRank": "high", "done": null})).unwrap();
        item.rank = Some(2.0);
        item.done = Some(true);

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["masterRank"], json!(2));
        assert_eq!(value["done"], json!(true));
    }

    #[test]
    fn test_field_lookup_by_wire_name() {
        let item = task();
        assert_eq!(item.field("parentId"), Some(json!("p1")));
        assert_eq!(item.field("title"), Some(json!("Write report")));
        assert_eq!(item.field("labelIds"), Some(json!(["l1", "l2"])));
        assert_eq!(item.field("dueDate"), None);
    }

    #[test]
    fn test_dependencies() {
        let item = task();
        assert!(item.depends_on("t0"));
        assert!(!item.depends_on("t9"));
        let ids: Vec<&str> = item.dependency_ids().unwrap().collect();
        assert_eq!(ids, vec!["t0"]);

        let listed = Item::new("y").with_field("unused", json!(1));
        assert!(listed.dependency_ids().is_none());
    }

    #[test]
    fn test_empty_note_detection() {
        assert!(task().has_empty_note());
        let mut item = task();
        item.note = Some("real text".to_string());
        assert!(!item.has_empty_note());
    }

    #[test]
    fn test_labels() {
        let item = task();
        assert!(item.has_label("l2"));
        assert!(!item.has_label("l3"));
    }
}
