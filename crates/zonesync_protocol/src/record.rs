//! Remote record values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ProtocolError, ProtocolResult};
use crate::ids::RecordId;

/// A single value in a record's field bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Boolean flag.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    /// Ordered list of values.
    List(Vec<FieldValue>),
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

/// The store-maintained part of a record: identity, type and change tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFields {
    /// Record identity.
    pub id: RecordId,
    /// Record type (the entity type name).
    pub record_type: String,
    /// Server change tag of the last accepted write, if any.
    pub change_tag: Option<String>,
}

/// An opaque remote record.
///
/// The sync engine only manages a record's identity and lifecycle. Field
/// contents are written and read by the entity's own serialize/deserialize
/// pair; the change tag is assigned by the store on every accepted write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    record_type: String,
    fields: BTreeMap<String, FieldValue>,
    change_tag: Option<String>,
}

impl Record {
    /// Creates an empty record that has never been written to a store.
    pub fn new(record_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            fields: BTreeMap::new(),
            change_tag: None,
        }
    }

    /// Returns the record ID.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Returns the record type.
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Returns the change tag assigned by the store.
    pub fn change_tag(&self) -> Option<&str> {
        self.change_tag.as_deref()
    }

    /// Sets the change tag. Only record stores should call this.
    pub fn set_change_tag(&mut self, tag: impl Into<String>) {
        self.change_tag = Some(tag.into());
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Removes a field.
    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    /// Returns a field value.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Returns a text field.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns an integer field.
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(FieldValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    /// Returns a boolean field.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.fields.get(key) {
            Some(FieldValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Returns a timestamp field (milliseconds since the Unix epoch).
    pub fn get_timestamp(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(FieldValue::Timestamp(ms)) => Some(*ms),
            _ => None,
        }
    }

    /// Iterates over fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns the system fields of this record.
    pub fn system_fields(&self) -> SystemFields {
        SystemFields {
            id: self.id.clone(),
            record_type: self.record_type.clone(),
            change_tag: self.change_tag.clone(),
        }
    }

    /// Encodes only the system fields to CBOR.
    ///
    /// This is what a client keeps to re-create a record shell for a later
    /// save without holding on to the field bag.
    pub fn encode_system_fields(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(&self.system_fields())
    }

    /// Re-creates an empty record from encoded system fields.
    pub fn decode_system_fields(bytes: &[u8]) -> ProtocolResult<Self> {
        let system: SystemFields = decode_cbor(bytes)?;
        Ok(Self {
            id: system.id,
            record_type: system.record_type,
            fields: BTreeMap::new(),
            change_tag: system.change_tag,
        })
    }

    /// Encodes the whole record to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes a whole record from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

fn encode_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::encoding(e.to_string()))?;
    Ok(out)
}

fn decode_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding(e.to_string()))
}
