//! Types shared by every document store backend.

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::StorageResult;

/// Reserved field holding the document id.
pub const ID_FIELD: &str = "_id";

/// Reserved field holding the document revision.
pub const REV_FIELD: &str = "_rev";

/// Returns the `_id` of a document body, if any.
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Returns the `_rev` of a document body, if any.
pub fn doc_rev(doc: &Value) -> Option<&str> {
    doc.get(REV_FIELD).and_then(Value::as_str)
}

/// Parses the generation prefix of a `"<generation>-<suffix>"` revision.
pub fn revision_generation(rev: &str) -> Option<u64> {
    rev.split_once('-').and_then(|(generation, _)| generation.parse().ok())
}

/// Identity of a stored document revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub rev: String,
}

/// Sort direction for indexes and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A field and its sort direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Mango form: `{"field": "asc"}`.
    pub fn to_mango(&self) -> Value {
        let mut entry = Map::new();
        entry.insert(self.field.clone(), json!(self.direction));
        Value::Object(entry)
    }
}

/// A named json index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<SortField>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(SortField::asc(field));
        self
    }

    pub fn field_desc(mut self, field: impl Into<String>) -> Self {
        self.fields.push(SortField::desc(field));
        self
    }

    /// Request body for `POST /{db}/_index`.
    ///
    /// The design document shares the index name so `use_index` can refer to
    /// it by that name alone.
    pub fn to_mango(&self) -> Value {
        json!({
            "ddoc": self.name,
            "name": self.name,
            "type": "json",
            "index": {
                "fields": self.fields.iter().map(SortField::to_mango).collect::<Vec<_>>(),
            },
        })
    }
}

/// A selector query.
///
/// The selector is a Mango document: field paths (dot separated) mapped to a
/// value (implicit `$eq`) or to an operator object.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub selector: Value,
    pub sort: Vec<SortField>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub fields: Option<Vec<String>>,
    pub use_index: Option<String>,
}

impl FindQuery {
    pub fn new(selector: Value) -> Self {
        Self {
            selector,
            sort: Vec::new(),
            limit: None,
            skip: None,
            fields: None,
            use_index: None,
        }
    }

    pub fn sort(mut self, field: SortField) -> Self {
        self.sort.push(field);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn use_index(mut self, index: impl Into<String>) -> Self {
        self.use_index = Some(index.into());
        self
    }

    /// Request body for `POST /{db}/_find`.
    pub fn to_mango(&self) -> Value {
        let mut body = Map::new();
        body.insert("selector".into(), self.selector.clone());
        if !self.sort.is_empty() {
            body.insert(
                "sort".into(),
                Value::Array(self.sort.iter().map(SortField::to_mango).collect()),
            );
        }
        if let Some(limit) = self.limit {
            body.insert("limit".into(), json!(limit));
        }
        if let Some(skip) = self.skip {
            body.insert("skip".into(), json!(skip));
        }
        if let Some(fields) = &self.fields {
            body.insert("fields".into(), json!(fields));
        }
        if let Some(index) = &self.use_index {
            body.insert("use_index".into(), json!(index));
        }
        Value::Object(body)
    }
}

/// Where a change feed subscription starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesSince {
    /// Only changes that happen after subscribing.
    Now,
    /// Every change from the start of the database.
    Beginning,
    /// Changes after the given sequence token.
    Seq(String),
}

impl ChangesSince {
    /// Value of the `since` query parameter.
    pub fn as_param(&self) -> &str {
        match self {
            Self::Now => "now",
            Self::Beginning => "0",
            Self::Seq(seq) => seq,
        }
    }
}

/// One entry of a change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub seq: String,
    pub id: String,
    pub rev: String,
    #[serde(default)]
    pub deleted: bool,
}

impl ChangeRecord {
    /// Design documents carry index definitions, not data.
    pub fn is_design(&self) -> bool {
        self.id.starts_with("_design/")
    }
}

/// A change feed subscription.
pub type ChangeStream = BoxStream<'static, StorageResult<ChangeRecord>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_query_to_mango() {
        let query = FindQuery::new(json!({ "kind": "access_token" }))
            .sort(SortField::desc("req.requested_at"))
            .limit(10)
            .use_index("oauth_requested_at_sort_index");

        assert_eq!(
            query.to_mango(),
            json!({
                "selector": { "kind": "access_token" },
                "sort": [{ "req.requested_at": "desc" }],
                "limit": 10,
                "use_index": "oauth_requested_at_sort_index",
            })
        );
    }

    #[test]
    fn test_index_definition_to_mango() {
        let index = IndexDefinition::new("oauth_requested_at_sort_index").field_desc("req.requested_at");
        assert_eq!(
            index.to_mango(),
            json!({
                "ddoc": "oauth_requested_at_sort_index",
                "name": "oauth_requested_at_sort_index",
                "type": "json",
                "index": { "fields": [{ "req.requested_at": "desc" }] },
            })
        );
    }

    #[test]
    fn test_revision_generation() {
        assert_eq!(revision_generation("3-abc"), Some(3));
        assert_eq!(revision_generation("garbage"), None);
    }

    #[test]
    fn test_changes_since_param() {
        assert_eq!(ChangesSince::Now.as_param(), "now");
        assert_eq!(ChangesSince::Beginning.as_param(), "0");
        assert_eq!(ChangesSince::Seq("12-x".into()).as_param(), "12-x");
    }

    #[test]
    fn test_design_records() {
        let record = ChangeRecord {
            seq: "1".into(),
            id: "_design/idx".into(),
            rev: "1-a".into(),
            deleted: false,
        };
        assert!(record.is_design());
    }
}
