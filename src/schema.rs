//! Collection and index declarations
//!
//! A [`CollectionSpec`] names a collection and the secondary indexes it must
//! carry. Key patterns keep their declared field order, which is significant
//! for compound indexes.

use std::collections::HashSet;
use std::fmt;

use mongodb::bson::{Bson, Document};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::plan::PlanError;

/// Direction token of a single key in an index key pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexDirection {
    Ascending,
    Descending,
    /// Full-text search key, declared with the literal marker `"text"`
    Text,
}

impl IndexDirection {
    pub fn to_bson(self) -> Bson {
        match self {
            IndexDirection::Ascending => Bson::Int32(1),
            IndexDirection::Descending => Bson::Int32(-1),
            IndexDirection::Text => Bson::String("text".to_string()),
        }
    }

    /// Parse a direction as reported back by the server, which may widen
    /// the numeric tokens to 64-bit integers or doubles.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(1) | Bson::Int64(1) => Some(IndexDirection::Ascending),
            Bson::Int32(-1) | Bson::Int64(-1) => Some(IndexDirection::Descending),
            Bson::Double(d) if *d == 1.0 => Some(IndexDirection::Ascending),
            Bson::Double(d) if *d == -1.0 => Some(IndexDirection::Descending),
            Bson::String(s) if s == "text" => Some(IndexDirection::Text),
            _ => None,
        }
    }

    fn token(self) -> &'static str {
        match self {
            IndexDirection::Ascending => "1",
            IndexDirection::Descending => "-1",
            IndexDirection::Text => "text",
        }
    }
}

impl<'de> Deserialize<'de> for IndexDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DirectionVisitor;

        impl Visitor<'_> for DirectionVisitor {
            type Value = IndexDirection;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("1, -1 or \"text\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                match v {
                    1 => Ok(IndexDirection::Ascending),
                    -1 => Ok(IndexDirection::Descending),
                    other => Err(E::invalid_value(de::Unexpected::Signed(other), &self)),
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                match v {
                    1 => Ok(IndexDirection::Ascending),
                    other => Err(E::invalid_value(de::Unexpected::Unsigned(other), &self)),
                }
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if v == 1.0 {
                    Ok(IndexDirection::Ascending)
                } else if v == -1.0 {
                    Ok(IndexDirection::Descending)
                } else {
                    Err(E::invalid_value(de::Unexpected::Float(v), &self))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v {
                    "text" => Ok(IndexDirection::Text),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }
        }

        deserializer.deserialize_any(DirectionVisitor)
    }
}

/// Ordered list of `(field, direction)` pairs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern(Vec<(String, IndexDirection)>);

impl KeyPattern {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = (S, IndexDirection)>,
        S: Into<String>,
    {
        KeyPattern(keys.into_iter().map(|(f, d)| (f.into(), d)).collect())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(f, _)| f.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_text(&self) -> bool {
        self.0.iter().any(|(_, d)| *d == IndexDirection::Text)
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        for (field, direction) in &self.0 {
            doc.insert(field.clone(), direction.to_bson());
        }
        doc
    }

    /// Parse a key document as returned by the server; `None` for index
    /// kinds this tool never declares (hashed, geo, ...).
    pub fn from_document(doc: &Document) -> Option<Self> {
        doc.iter()
            .map(|(field, value)| IndexDirection::from_bson(value).map(|d| (field.clone(), d)))
            .collect::<Option<Vec<_>>>()
            .map(KeyPattern)
    }

    /// Whether a live index key document satisfies this declared pattern.
    ///
    /// MongoDB stores text indexes under the synthetic `_fts`/`_ftsx` keys,
    /// so a declared text pattern only requires the live one to be a text
    /// index.
    pub fn matches(&self, live: &Document) -> bool {
        if self.is_text() {
            return live.contains_key("_fts")
                || KeyPattern::from_document(live).is_some_and(|p| p.is_text());
        }
        KeyPattern::from_document(live).is_some_and(|p| &p == self)
    }

    /// Index name MongoDB derives when none is given, e.g. `userId_1_courseId_1`
    pub fn default_name(&self) -> String {
        self.0
            .iter()
            .map(|(field, direction)| format!("{}_{}", field, direction.token()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for (i, (field, direction)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", field, direction.token())?;
        }
        f.write_str(" }")
    }
}

impl<'de> Deserialize<'de> for KeyPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PatternVisitor;

        impl<'de> Visitor<'de> for PatternVisitor {
            type Value = KeyPattern;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field names to 1, -1 or \"text\"")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut keys = Vec::new();
                while let Some((field, direction)) = map.next_entry::<String, IndexDirection>()? {
                    if keys.iter().any(|(f, _)| f == &field) {
                        return Err(de::Error::custom(format!("duplicate key field '{}'", field)));
                    }
                    keys.push((field, direction));
                }
                Ok(KeyPattern(keys))
            }
        }

        deserializer.deserialize_map(PatternVisitor)
    }
}

/// A secondary index declaration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSpec {
    keys: KeyPattern,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    name: Option<String>,
}

impl IndexSpec {
    pub fn new(keys: KeyPattern) -> Self {
        Self {
            keys,
            unique: false,
            name: None,
        }
    }

    /// Single-field ascending unique index
    pub fn unique_on(field: &str) -> Self {
        Self::new(KeyPattern::new([(field, IndexDirection::Ascending)])).unique(true)
    }

    /// Single-field ascending non-unique index
    pub fn on(field: &str) -> Self {
        Self::new(KeyPattern::new([(field, IndexDirection::Ascending)]))
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn keys(&self) -> &KeyPattern {
        &self.keys
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Explicit name if declared, otherwise the server's default name
    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.keys.default_name())
    }
}

/// A collection and the indexes it must carry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionSpec {
    name: String,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
    /// Abort the run when any seed record of this collection is rejected
    #[serde(default)]
    required_seeds: bool,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, indexes: Vec<IndexSpec>) -> Self {
        Self {
            name: name.into(),
            indexes,
            required_seeds: false,
        }
    }

    pub fn with_required_seeds(mut self, required: bool) -> Self {
        self.required_seeds = required;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn required_seeds(&self) -> bool {
        self.required_seeds
    }

    /// Check the per-collection index invariants
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.name.trim().is_empty() {
            return Err(PlanError::EmptyCollectionName);
        }
        let mut patterns = HashSet::new();
        let mut names = HashSet::new();
        let mut text_indexes = 0;
        for (position, index) in self.indexes.iter().enumerate() {
            if index.keys.is_empty() {
                return Err(PlanError::EmptyKeyPattern {
                    collection: self.name.clone(),
                    position,
                });
            }
            if !patterns.insert(&index.keys) {
                return Err(PlanError::DuplicateKeyPattern {
                    collection: self.name.clone(),
                    pattern: index.keys.to_string(),
                });
            }
            let name = index.name();
            if name == "_id_" || !names.insert(name.clone()) {
                return Err(PlanError::DuplicateIndexName {
                    collection: self.name.clone(),
                    name,
                });
            }
            if index.keys.is_text() {
                text_indexes += 1;
            }
        }
        if text_indexes > 1 {
            return Err(PlanError::MultipleTextIndexes(self.name.clone()));
        }
        Ok(())
    }
}
