//! Seed records and their typed values
//!
//! Seed bodies are read from JSON. Values that JSON cannot express are
//! written as single-key marker objects:
//!
//! - `{"$oid": "650000000000000000000001"}` reference id
//! - `{"$date": "2024-01-01T00:00:00Z"}` or `{"$date": 1704067200000}` absolute timestamp
//! - `{"$now": {"days": 30}}` timestamp relative to the run's clock
//!
//! Relative timestamps are resolved against a [`Clock`] when the record is
//! turned into a BSON document, so a fixed clock yields exact values.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use serde_json::Value;
use thiserror::Error;

/// Source of "now" for relative timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error("unknown value marker '{0}'")]
    UnknownMarker(String),
    #[error("invalid object id '{0}'")]
    InvalidObjectId(String),
    #[error("invalid $date value: {0}")]
    InvalidDate(String),
    #[error("invalid $now offset: {0}")]
    InvalidOffset(String),
    #[error("number {0} does not fit in a 64-bit integer")]
    NumberOutOfRange(String),
    #[error("timestamp out of range")]
    TimestampOutOfRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    At(DateTime<Utc>),
    FromNow(Duration),
}

impl Timestamp {
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ValueError> {
        match self {
            Timestamp::At(at) => Ok(*at),
            Timestamp::FromNow(offset) => now
                .checked_add_signed(*offset)
                .ok_or(ValueError::TimestampOutOfRange),
        }
    }
}

/// A typed document value
#[derive(Debug, Clone, PartialEq)]
pub enum SeedValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    ObjectId(ObjectId),
    Timestamp(Timestamp),
    Array(Vec<SeedValue>),
    Document(Vec<(String, SeedValue)>),
}

impl SeedValue {
    pub fn from_json(value: &Value) -> Result<Self, ValueError> {
        Ok(match value {
            Value::Null => SeedValue::Null,
            Value::Bool(b) => SeedValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SeedValue::Int(i)
                } else if n.is_u64() {
                    return Err(ValueError::NumberOutOfRange(n.to_string()));
                } else {
                    SeedValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => SeedValue::String(s.clone()),
            Value::Array(items) => SeedValue::Array(
                items
                    .iter()
                    .map(SeedValue::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some((key, inner)) = map.iter().next() {
                        if key.starts_with('$') {
                            return parse_marker(key, inner);
                        }
                    }
                }
                SeedValue::Document(
                    map.iter()
                        .map(|(k, v)| SeedValue::from_json(v).map(|v| (k.clone(), v)))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }

    pub fn to_bson(&self, now: DateTime<Utc>) -> Result<Bson, ValueError> {
        Ok(match self {
            SeedValue::Null => Bson::Null,
            SeedValue::Bool(b) => Bson::Boolean(*b),
            SeedValue::Int(i) => match i32::try_from(*i) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(*i),
            },
            SeedValue::Double(d) => Bson::Double(*d),
            SeedValue::String(s) => Bson::String(s.clone()),
            SeedValue::ObjectId(oid) => Bson::ObjectId(*oid),
            SeedValue::Timestamp(ts) => {
                Bson::DateTime(BsonDateTime::from_millis(ts.resolve(now)?.timestamp_millis()))
            }
            SeedValue::Array(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| item.to_bson(now))
                    .collect::<Result<_, _>>()?,
            ),
            SeedValue::Document(fields) => Bson::Document(fields_to_document(fields, now)?),
        })
    }
}

impl fmt::Display for SeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedValue::ObjectId(oid) => write!(f, "{}", oid.to_hex()),
            SeedValue::String(s) => write!(f, "\"{}\"", s),
            SeedValue::Int(i) => write!(f, "{}", i),
            SeedValue::Double(d) => write!(f, "{}", d),
            SeedValue::Bool(b) => write!(f, "{}", b),
            SeedValue::Null => f.write_str("null"),
            other => write!(f, "{:?}", other),
        }
    }
}

fn parse_marker(key: &str, inner: &Value) -> Result<SeedValue, ValueError> {
    match key {
        "$oid" => {
            let hex = inner
                .as_str()
                .ok_or_else(|| ValueError::InvalidObjectId(inner.to_string()))?;
            ObjectId::parse_str(hex)
                .map(SeedValue::ObjectId)
                .map_err(|_| ValueError::InvalidObjectId(hex.to_string()))
        }
        "$date" => {
            let at = match inner {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| ValueError::InvalidDate(format!("{}: {}", s, e)))?,
                Value::Number(n) => n
                    .as_i64()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .ok_or_else(|| ValueError::InvalidDate(n.to_string()))?,
                other => return Err(ValueError::InvalidDate(other.to_string())),
            };
            Ok(SeedValue::Timestamp(Timestamp::At(at)))
        }
        "$now" => parse_offset(inner).map(|d| SeedValue::Timestamp(Timestamp::FromNow(d))),
        other => Err(ValueError::UnknownMarker(other.to_string())),
    }
}

fn parse_offset(inner: &Value) -> Result<Duration, ValueError> {
    let map = inner
        .as_object()
        .ok_or_else(|| ValueError::InvalidOffset(inner.to_string()))?;
    let mut offset = Duration::zero();
    for (unit, amount) in map {
        let amount = amount
            .as_i64()
            .ok_or_else(|| ValueError::InvalidOffset(format!("{}: {}", unit, amount)))?;
        let step = match unit.as_str() {
            "days" => Duration::try_days(amount),
            "hours" => Duration::try_hours(amount),
            "minutes" => Duration::try_minutes(amount),
            other => return Err(ValueError::InvalidOffset(format!("unknown unit '{}'", other))),
        };
        offset = step
            .and_then(|s| offset.checked_add(&s))
            .ok_or_else(|| ValueError::InvalidOffset(format!("{} {} overflows", amount, unit)))?;
    }
    Ok(offset)
}

fn fields_to_document(
    fields: &[(String, SeedValue)],
    now: DateTime<Utc>,
) -> Result<Document, ValueError> {
    let mut doc = Document::new();
    for (key, value) in fields {
        doc.insert(key.clone(), value.to_bson(now)?);
    }
    Ok(doc)
}

/// One document to insert into a target collection
#[derive(Debug, Clone, PartialEq)]
pub struct SeedRecord {
    collection: String,
    id: Option<SeedValue>,
    body: Vec<(String, SeedValue)>,
    position: usize,
}

impl SeedRecord {
    pub fn new(collection: impl Into<String>, body: Vec<(String, SeedValue)>) -> Self {
        Self {
            collection: collection.into(),
            id: None,
            body,
            position: 0,
        }
    }

    pub fn with_id(mut self, id: SeedValue) -> Self {
        self.id = Some(id);
        self
    }

    /// Position of the record in the plan's seed list, used in reports
    pub fn at_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Explicit identifier, either declared separately or as the body's `_id`
    pub fn id(&self) -> Option<&SeedValue> {
        self.id.as_ref().or_else(|| {
            self.body
                .iter()
                .find(|(k, _)| k == "_id")
                .map(|(_, v)| v)
        })
    }

    /// Build the BSON document to insert, `_id` first
    pub fn to_document(&self, now: DateTime<Utc>) -> Result<Document, ValueError> {
        let mut doc = Document::new();
        if let Some(id) = self.id() {
            doc.insert("_id", id.to_bson(now)?);
        }
        for (key, value) in &self.body {
            if key != "_id" {
                doc.insert(key.clone(), value.to_bson(now)?);
            }
        }
        Ok(doc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    /// Structurally invalid, never sent to the database
    Invalid,
    /// Violates `_id` or a unique index
    DuplicateKey,
    /// Any other per-document store failure
    Store,
}

impl fmt::Display for RejectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectKind::Invalid => "invalid",
            RejectKind::DuplicateKey => "duplicate key",
            RejectKind::Store => "store error",
        })
    }
}

/// A seed record that was not inserted
#[derive(Debug, Clone, PartialEq)]
pub struct SeedInsertError {
    pub collection: String,
    pub position: usize,
    pub id: Option<String>,
    pub kind: RejectKind,
    pub reason: String,
}

impl SeedInsertError {
    pub fn for_record(record: &SeedRecord, kind: RejectKind, reason: impl Into<String>) -> Self {
        Self {
            collection: record.collection.clone(),
            position: record.position,
            id: record.id().map(|id| id.to_string()),
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SeedInsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seed #{} ({}", self.position, self.collection)?;
        if let Some(id) = &self.id {
            write!(f, ", _id {}", id)?;
        }
        write!(f, ") {}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for SeedInsertError {}
