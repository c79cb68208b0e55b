//! Change feed entries and store selectors

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use super::item::{Item, fields};

/// Revision reference inside a change entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevRef {
    pub rev: String,
}

/// One entry from the remote change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Feed position of this change
    #[serde(deserialize_with = "deserialize_seq")]
    pub seq: String,
    /// Id of the changed document
    pub id: String,
    /// Leaf revisions produced by the change
    #[serde(default)]
    pub changes: Vec<RevRef>,
    #[serde(default)]
    pub deleted: bool,
}

impl Change {
    /// Build an update change for `id` at `seq`
    pub fn updated(seq: impl Into<String>, id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            seq: seq.into(),
            id: id.into(),
            changes: vec![RevRef { rev: rev.into() }],
            deleted: false,
        }
    }

    /// Build a deletion change for `id` at `seq`
    pub fn deletion(seq: impl Into<String>, id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            deleted: true,
            ..Self::updated(seq, id, rev)
        }
    }

    /// Whether this change produced revision `rev`
    pub fn has_rev(&self, rev: &str) -> bool {
        self.changes.iter().any(|r| r.rev == rev)
    }
}

/// A line from the continuous change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A document changed
    Change(Change),
    /// No more changes are currently available; carries the feed position
    LastSeq(String),
}

impl FeedEvent {
    /// Parse one line of a continuous feed. Blank heartbeat lines yield `None`.
    pub fn from_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(line)?;
        if let Some(seq) = value.get("last_seq") {
            return Ok(Some(FeedEvent::LastSeq(seq_to_string(seq))));
        }
        Ok(Some(FeedEvent::Change(serde_json::from_value(value)?)))
    }
}

/// Result of a bounded (non-continuous) change feed read
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangesPage {
    #[serde(default)]
    pub results: Vec<Change>,
    #[serde(deserialize_with = "deserialize_seq")]
    pub last_seq: String,
}

/// Per-document result of a bulk update, in input order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub id: String,
    pub ok: bool,
    /// New revision when the write succeeded
    pub rev: Option<String>,
}

/// Document selection for store queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Documents whose kind is one of these
    KindIn(Vec<String>),
    /// Documents with one of these ids
    IdIn(Vec<String>),
}

impl Selector {
    /// Selector for every mirrored kind
    pub fn mirrored() -> Self {
        Selector::KindIn(super::MIRRORED_KINDS.iter().map(|k| k.to_string()).collect())
    }

    /// Render as a Mango selector
    pub fn to_mango(&self) -> Value {
        let (field, values) = match self {
            Selector::KindIn(kinds) => (fields::KIND, kinds),
            Selector::IdIn(ids) => (fields::ID, ids),
        };
        let alternatives: Vec<Value> = values.iter().map(|v| json!({ field: v })).collect();
        json!({ "$or": alternatives })
    }

    /// Whether `item` is selected
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Selector::KindIn(kinds) => item.kind.as_ref().is_some_and(|k| kinds.contains(k)),
            Selector::IdIn(ids) => ids.contains(&item.id),
        }
    }
}

fn seq_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Feed positions are strings on newer servers and integers on older ones.
fn deserialize_seq<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(seq_to_string(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_change_line() {
        let line = r#"{"seq":"12-g1A","id":"t1","changes":[{"rev":"2-b"}]}"#;
        let event = FeedEvent::from_line(line).unwrap().unwrap();
        assert_eq!(event, FeedEvent::Change(Change::updated("12-g1A", "t1", "2-b")));
    }

    #[test]
    fn test_parse_numeric_seq() {
        let line = r#"{"seq":7,"id":"t1","changes":[{"rev":"2-b"}],"deleted":true}"#;
        let event = FeedEvent::from_line(line).unwrap().unwrap();
        assert_eq!(event, FeedEvent::Change(Change::deletion("7", "t1", "2-b")));
    }

    #[test]
    fn test_parse_last_seq_marker() {
        let event = FeedEvent::from_line(r#"{"last_seq":"15-xyz","pending":0}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, FeedEvent::LastSeq("15-xyz".to_string()));
    }

    #[test]
    fn test_heartbeat_line_is_skipped() {
        assert_eq!(FeedEvent::from_line("\n").unwrap(), None);
    }

    #[test]
    fn test_garbage_line_is_error() {
        assert!(FeedEvent::from_line("not json").is_err());
    }

    #[test]
    fn test_has_rev() {
        let change = Change::updated("1", "t1", "2-b");
        assert!(change.has_rev("2-b"));
        assert!(!change.has_rev("1-a"));
    }

    #[test]
    fn test_changes_page() {
        let page: ChangesPage = serde_json::from_value(json!({
            "results": [{"seq": "3-a", "id": "t1", "changes": [{"rev": "1-x"}]}],
            "last_seq": "3-a"
        }))
        .unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.last_seq, "3-a");
    }

    #[test]
    fn test_selector_to_mango() {
        let selector = Selector::IdIn(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(selector.to_mango(), json!({"$or": [{"_id": "a"}, {"_id": "b"}]}));
        assert_eq!(
            Selector::mirrored().to_mango(),
            json!({"$or": [{"db": "Tasks"}, {"db": "Categories"}]})
        );
    }

    #[test]
    fn test_selector_matches() {
        let task = Item::new("a").with_kind("Tasks");
        assert!(Selector::mirrored().matches(&task));
        assert!(!Selector::mirrored().matches(&Item::new("s").with_kind("Settings")));
        assert!(Selector::IdIn(vec!["a".to_string()]).matches(&task));
    }
}
