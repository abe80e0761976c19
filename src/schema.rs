//! Schema: Serialisers and the Aggregation Contract
//!
//! Per group, the schema declares which properties are group-by (they
//! participate in the column qualifier and the aggregation key) and which
//! are non-group-by (stored in the value and merged by an aggregation
//! function at query time). It also declares the byte serialiser for the
//! vertex identifier and for each property.
//!
//! Serialisers are marked order-preserving or not; range construction
//! refuses non-order-preserving vertex serialisers because the resulting
//! scan bounds would be wrong.

use crate::element::PropertyValue;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Byte encodings for typed values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialiserKind {
    /// UTF-8 bytes of a string. Order-preserving.
    Utf8,
    /// Big-endian i64 with the sign bit flipped. Order-preserving.
    I64Be,
    /// Big-endian f64 with the usual total-order bit trick. Order-preserving.
    F64Ord,
    /// Single byte, 0 or 1. Order-preserving.
    Bool,
    /// Raw bytes, passed through. Order-preserving.
    Raw,
    /// JSON text of any value. NOT order-preserving.
    Json,
}

impl SerialiserKind {
    /// Whether byte-lexicographic order of the encoding matches the
    /// value's natural order.
    pub fn preserves_order(&self) -> bool {
        !matches!(self, SerialiserKind::Json)
    }

    /// Encode a value, failing if the runtime type does not match.
    pub fn serialise(&self, value: &PropertyValue) -> Result<Vec<u8>> {
        match (self, value) {
            (SerialiserKind::Utf8, PropertyValue::Str(s)) => Ok(s.as_bytes().to_vec()),
            (SerialiserKind::I64Be, PropertyValue::Long(v)) => {
                Ok(((*v as u64) ^ (1 << 63)).to_be_bytes().to_vec())
            }
            (SerialiserKind::F64Ord, PropertyValue::Double(v)) => {
                let bits = v.to_bits();
                let ordered = if bits & (1 << 63) == 0 {
                    bits ^ (1 << 63)
                } else {
                    !bits
                };
                Ok(ordered.to_be_bytes().to_vec())
            }
            (SerialiserKind::Bool, PropertyValue::Bool(v)) => Ok(vec![u8::from(*v)]),
            (SerialiserKind::Raw, PropertyValue::Bytes(b)) => Ok(b.clone()),
            (SerialiserKind::Json, v) => serde_json::to_vec(v)
                .map_err(|e| Error::serialisation(format!("json encode: {}", e))),
            (kind, v) => Err(Error::serialisation(format!(
                "serialiser {:?} cannot handle {} value",
                kind,
                v.type_name()
            ))),
        }
    }

    /// Invert [`serialise`](Self::serialise).
    pub fn deserialise(&self, bytes: &[u8]) -> Result<PropertyValue> {
        match self {
            SerialiserKind::Utf8 => String::from_utf8(bytes.to_vec())
                .map(PropertyValue::Str)
                .map_err(|e| Error::serialisation(format!("invalid utf-8: {}", e))),
            SerialiserKind::I64Be => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| Error::serialisation("i64 field is not 8 bytes"))?;
                Ok(PropertyValue::Long(
                    (u64::from_be_bytes(arr) ^ (1 << 63)) as i64,
                ))
            }
            SerialiserKind::F64Ord => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| Error::serialisation("f64 field is not 8 bytes"))?;
                let ordered = u64::from_be_bytes(arr);
                let bits = if ordered & (1 << 63) != 0 {
                    ordered ^ (1 << 63)
                } else {
                    !ordered
                };
                Ok(PropertyValue::Double(f64::from_bits(bits)))
            }
            SerialiserKind::Bool => match bytes {
                [0] => Ok(PropertyValue::Bool(false)),
                [1] => Ok(PropertyValue::Bool(true)),
                _ => Err(Error::serialisation("bool field is not a single 0/1 byte")),
            },
            SerialiserKind::Raw => Ok(PropertyValue::Bytes(bytes.to_vec())),
            SerialiserKind::Json => serde_json::from_slice(bytes)
                .map_err(|e| Error::serialisation(format!("json decode: {}", e))),
        }
    }
}

/// Merge function for a non-group-by property.
///
/// Must be associative and commutative: the store may merge values for
/// equal keys repeatedly and in any order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    Min,
    Max,
    And,
    Or,
}

impl AggregateFunction {
    /// Merge two values for the same property.
    pub fn merge(&self, a: &PropertyValue, b: &PropertyValue) -> Result<PropertyValue> {
        use PropertyValue::*;
        match (self, a, b) {
            (AggregateFunction::Sum, Long(x), Long(y)) => Ok(Long(x.wrapping_add(*y))),
            (AggregateFunction::Sum, Double(x), Double(y)) => Ok(Double(x + y)),
            (AggregateFunction::Min, Long(x), Long(y)) => Ok(Long(*x.min(y))),
            (AggregateFunction::Max, Long(x), Long(y)) => Ok(Long(*x.max(y))),
            (AggregateFunction::Min, Double(x), Double(y)) => Ok(Double(x.min(*y))),
            (AggregateFunction::Max, Double(x), Double(y)) => Ok(Double(x.max(*y))),
            (AggregateFunction::Min, Str(x), Str(y)) => Ok(Str(x.min(y).clone())),
            (AggregateFunction::Max, Str(x), Str(y)) => Ok(Str(x.max(y).clone())),
            (AggregateFunction::And, Bool(x), Bool(y)) => Ok(Bool(*x && *y)),
            (AggregateFunction::Or, Bool(x), Bool(y)) => Ok(Bool(*x || *y)),
            _ => Err(Error::serialisation(format!(
                "aggregate {:?} cannot merge {} with {}",
                self,
                a.type_name(),
                b.type_name()
            ))),
        }
    }
}

/// One property declaration within a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub serialiser: SerialiserKind,
    /// Group-by properties form the column qualifier, in declaration order.
    #[serde(default)]
    pub group_by: bool,
    /// Merge function for non-group-by properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateFunction>,
}

impl PropertyDef {
    pub fn group_by(name: impl Into<String>, serialiser: SerialiserKind) -> Self {
        Self {
            name: name.into(),
            serialiser,
            group_by: true,
            aggregate: None,
        }
    }

    pub fn aggregated(
        name: impl Into<String>,
        serialiser: SerialiserKind,
        aggregate: AggregateFunction,
    ) -> Self {
        Self {
            name: name.into(),
            serialiser,
            group_by: false,
            aggregate: Some(aggregate),
        }
    }

    pub fn plain(name: impl Into<String>, serialiser: SerialiserKind) -> Self {
        Self {
            name: name.into(),
            serialiser,
            group_by: false,
            aggregate: None,
        }
    }
}

/// Property declarations for one group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSchema {
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
}

impl GroupSchema {
    pub fn new(properties: Vec<PropertyDef>) -> Self {
        Self { properties }
    }

    /// Group-by declarations in qualifier order.
    pub fn group_by_defs(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.group_by)
    }

    /// Non-group-by declarations.
    pub fn non_group_by_defs(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| !p.group_by)
    }

    /// Look up a declaration by property name.
    pub fn def(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// The graph schema: vertex serialiser plus per-group declarations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default = "Schema::default_vertex_serialiser")]
    pub vertex_serialiser: SerialiserKind,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupSchema>,
}

impl Schema {
    fn default_vertex_serialiser() -> SerialiserKind {
        SerialiserKind::Utf8
    }

    pub fn new(vertex_serialiser: SerialiserKind) -> Self {
        Self {
            vertex_serialiser,
            groups: BTreeMap::new(),
        }
    }

    /// Builder-style group registration.
    pub fn with_group(mut self, name: impl Into<String>, group: GroupSchema) -> Self {
        self.groups.insert(name.into(), group);
        self
    }

    pub fn group(&self, name: &str) -> Option<&GroupSchema> {
        self.groups.get(name)
    }
}

impl Default for SerialiserKind {
    fn default() -> Self {
        SerialiserKind::Utf8
    }
}
