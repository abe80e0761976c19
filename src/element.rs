//! Graph Element Model
//!
//! An element is either an entity (one vertex) or an edge (a vertex pair
//! with a directed flag), plus a group name identifying its type and a
//! property map. These are the units the codec translates to and from
//! store key/value pairs.

use crate::escape::ByteLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed property or vertex value.
///
/// Doubles as the vertex identifier type: a vertex is just a value the
/// schema's vertex serialiser can encode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Str(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    /// Compare two values of the same type.
    ///
    /// Values of different types are incomparable and return `None`;
    /// predicates treat that as a failed match, never an error.
    pub fn compare(&self, other: &PropertyValue) -> Option<std::cmp::Ordering> {
        use PropertyValue::*;
        match (self, other) {
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Long(a), Long(b)) => Some(a.cmp(b)),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Bytes(a), Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Str(_) => "str",
            PropertyValue::Long(_) => "long",
            PropertyValue::Double(_) => "double",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Bytes(_) => "bytes",
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Long(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

/// Property name → value. Insertion order is irrelevant; a sorted map
/// keeps the serialised form canonical.
pub type Properties = BTreeMap<String, PropertyValue>;

/// One-byte direction marker appended to edge rows.
///
/// Flag bytes are laid out relative to the delimiter (`delimiter + 1`,
/// `+2`, `+3`) so they can never collide with it. The ordering matters:
/// an `Either` edge range spans `[Undirected, IncorrectWay]`, so
/// `Undirected < CorrectWay < IncorrectWay` is load-bearing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectionFlag {
    /// Undirected edge row (stored in both orientations)
    Undirected,
    /// Directed edge row stored source-first
    CorrectWay,
    /// Directed edge row stored destination-first, so the edge is
    /// discoverable from its destination side
    IncorrectWay,
}

impl DirectionFlag {
    /// The flag's on-disk byte under the given layout.
    #[inline]
    pub fn as_byte(self, layout: &ByteLayout) -> u8 {
        let offset = match self {
            DirectionFlag::Undirected => 1,
            DirectionFlag::CorrectWay => 2,
            DirectionFlag::IncorrectWay => 3,
        };
        layout.delimiter() + offset
    }

    /// Parse an on-disk flag byte under the given layout.
    pub fn from_byte(b: u8, layout: &ByteLayout) -> Option<Self> {
        let d = layout.delimiter();
        if b == d + 1 {
            Some(DirectionFlag::Undirected)
        } else if b == d + 2 {
            Some(DirectionFlag::CorrectWay)
        } else if b == d + 3 {
            Some(DirectionFlag::IncorrectWay)
        } else {
            None
        }
    }
}

/// Directedness requested by an edge seed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectedType {
    /// Match directed and undirected edges
    #[default]
    Either,
    /// Match directed edges only
    Directed,
    /// Match undirected edges only
    Undirected,
}

/// Which side of a vertex the query wants edges for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InOutType {
    /// Both incoming and outgoing
    #[default]
    Either,
    /// Edges arriving at the seed vertex
    Incoming,
    /// Edges leaving the seed vertex
    Outgoing,
}

/// Records which endpoint of a decoded edge matched the query vertex.
///
/// A single stored key can answer queries from either endpoint, so the
/// decoded element carries this when the caller asks for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchedVertex {
    Source,
    Destination,
}

/// An entity: one vertex with grouped properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub group: String,
    pub vertex: PropertyValue,
    #[serde(default)]
    pub properties: Properties,
}

impl Entity {
    pub fn new(group: impl Into<String>, vertex: impl Into<PropertyValue>) -> Self {
        Self {
            group: group.into(),
            vertex: vertex.into(),
            properties: Properties::new(),
        }
    }

    /// Builder-style property insertion.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// An edge: a source/destination vertex pair with grouped properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub group: String,
    pub source: PropertyValue,
    pub destination: PropertyValue,
    pub directed: bool,
    #[serde(default)]
    pub properties: Properties,
    /// Set on decode when the caller asked for it; never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_vertex: Option<MatchedVertex>,
}

impl Edge {
    pub fn new(
        group: impl Into<String>,
        source: impl Into<PropertyValue>,
        destination: impl Into<PropertyValue>,
        directed: bool,
    ) -> Self {
        Self {
            group: group.into(),
            source: source.into(),
            destination: destination.into(),
            directed,
            properties: Properties::new(),
            matched_vertex: None,
        }
    }

    /// Builder-style property insertion.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// A graph element: entity or edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Entity(Entity),
    Edge(Edge),
}

impl Element {
    /// The element's group name.
    pub fn group(&self) -> &str {
        match self {
            Element::Entity(e) => &e.group,
            Element::Edge(e) => &e.group,
        }
    }

    /// The element's property map.
    pub fn properties(&self) -> &Properties {
        match self {
            Element::Entity(e) => &e.properties,
            Element::Edge(e) => &e.properties,
        }
    }

    /// Mutable access to the property map.
    pub fn properties_mut(&mut self) -> &mut Properties {
        match self {
            Element::Entity(e) => &mut e.properties,
            Element::Edge(e) => &mut e.properties,
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, Element::Entity(_))
    }

    pub fn is_edge(&self) -> bool {
        matches!(self, Element::Edge(_))
    }
}

impl From<Entity> for Element {
    fn from(e: Entity) -> Self {
        Element::Entity(e)
    }
}

impl From<Edge> for Element {
    fn from(e: Edge) -> Self {
        Element::Edge(e)
    }
}
