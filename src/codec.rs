//! Element ⇄ Key/Value Codec
//!
//! Row layout:
//!
//! ```text
//! entity:  escape(vertex)
//! edge:    escape(source) ++ [D] ++ escape(destination) ++ [D] ++ flag
//! ```
//!
//! Column family is the escaped group name; column qualifier is the
//! escaped, delimiter-joined group-by property values in schema order;
//! the value is the bincode-encoded non-group-by property bag.
//!
//! Edges are written twice — once source-first and once destination-first
//! — so a vertex-anchored scan finds them from either endpoint. The
//! destination-first row carries the `IncorrectWay` flag (or `Undirected`
//! again) and decodes back to canonical source/destination orientation.

use crate::element::{
    DirectionFlag, Edge, Element, Entity, MatchedVertex, Properties, PropertyValue,
};
use crate::error::{Error, Result};
use crate::escape::ByteLayout;
use crate::key::{Key, Value};
use crate::schema::{GroupSchema, Schema};
use smallvec::SmallVec;

/// Stateless element codec for one byte layout.
#[derive(Clone, Copy, Debug)]
pub struct ElementCodec {
    layout: ByteLayout,
}

impl ElementCodec {
    pub fn new(layout: ByteLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ByteLayout {
        &self.layout
    }

    /// Encode an element into its primary key/value pair.
    ///
    /// For edges this is the source-first row; ingest should normally use
    /// [`to_key_values`](Self::to_key_values) so the edge is reachable
    /// from both endpoints.
    pub fn to_key_value(&self, element: &Element, schema: &Schema) -> Result<(Key, Value)> {
        let group_schema = self.group_schema(schema, element.group())?;
        let row = match element {
            Element::Entity(entity) => self.entity_row(entity, schema)?,
            Element::Edge(edge) => self.edge_row(edge, schema, false)?,
        };
        let key = Key::new(
            row,
            self.layout.escape(element.group().as_bytes()),
            self.qualifier(group_schema, element.properties())?,
        );
        let value = self.value_bytes(group_schema, element.group(), element.properties())?;
        Ok((key, value))
    }

    /// Encode an element into every key/value pair that must be stored
    /// for it: one for entities, both orientations for edges.
    pub fn to_key_values(&self, element: &Element, schema: &Schema) -> Result<Vec<(Key, Value)>> {
        let (primary_key, value) = self.to_key_value(element, schema)?;
        let Element::Edge(edge) = element else {
            return Ok(vec![(primary_key, value)]);
        };
        let reversed_row = self.edge_row(edge, schema, true)?;
        if reversed_row == primary_key.row {
            // Undirected self-loop: both orientations collapse to one row.
            return Ok(vec![(primary_key, value)]);
        }
        let reversed_key = Key::new(
            reversed_row,
            primary_key.column_family.clone(),
            primary_key.column_qualifier.clone(),
        );
        Ok(vec![(primary_key, value.clone()), (reversed_key, value)])
    }

    /// Decode a stored key/value pair back into an element.
    ///
    /// `include_matched_vertex` records which edge endpoint the row was
    /// keyed by, for callers resolving queries from either side.
    pub fn to_element(
        &self,
        key: &Key,
        value: &[u8],
        schema: &Schema,
        include_matched_vertex: bool,
    ) -> Result<Element> {
        let group_bytes = self.layout.unescape(&key.column_family)?;
        let group = String::from_utf8(group_bytes)
            .map_err(|e| Error::conversion(format!("group name is not utf-8: {}", e)))?;
        let group_schema = schema
            .group(&group)
            .ok_or_else(|| Error::conversion(format!("unknown group {:?}", group)))?;

        let mut properties =
            self.decode_qualifier(group_schema, &group, &key.column_qualifier)?;
        properties.append(&mut self.decode_value(group_schema, &group, value)?);

        let d = self.layout.delimiter();
        let fields: SmallVec<[&[u8]; 3]> = key.row.split(|&b| b == d).collect();
        match fields.as_slice() {
            [vertex_field] => {
                let vertex = self.decode_identifier(vertex_field, schema)?;
                Ok(Element::Entity(Entity {
                    group,
                    vertex,
                    properties,
                }))
            }
            [first_field, second_field, flag_field] if flag_field.len() == 1 => {
                let flag = DirectionFlag::from_byte(flag_field[0], &self.layout)
                    .ok_or_else(|| {
                        Error::conversion(format!("bad direction flag {:#04x}", flag_field[0]))
                    })?;
                let first = self.decode_identifier(first_field, schema)?;
                let second = self.decode_identifier(second_field, schema)?;
                let (source, destination, directed, matched) = match flag {
                    DirectionFlag::CorrectWay => (first, second, true, MatchedVertex::Source),
                    DirectionFlag::IncorrectWay => {
                        (second, first, true, MatchedVertex::Destination)
                    }
                    DirectionFlag::Undirected => (first, second, false, MatchedVertex::Source),
                };
                Ok(Element::Edge(Edge {
                    group,
                    source,
                    destination,
                    directed,
                    properties,
                    matched_vertex: include_matched_vertex.then_some(matched),
                }))
            }
            _ => Err(Error::conversion(format!(
                "row splits into {} fields, expected 1 or 3",
                fields.len()
            ))),
        }
    }

    /// Serialise and escape a vertex identifier.
    pub fn encode_identifier(&self, vertex: &PropertyValue, schema: &Schema) -> Result<Vec<u8>> {
        Ok(self.layout.escape(&schema.vertex_serialiser.serialise(vertex)?))
    }

    fn decode_identifier(&self, field: &[u8], schema: &Schema) -> Result<PropertyValue> {
        let raw = self.layout.unescape(field)?;
        schema
            .vertex_serialiser
            .deserialise(&raw)
            .map_err(|e| Error::conversion(format!("vertex: {}", e)))
    }

    fn group_schema<'s>(&self, schema: &'s Schema, group: &str) -> Result<&'s GroupSchema> {
        schema
            .group(group)
            .ok_or_else(|| Error::serialisation(format!("unknown group {:?}", group)))
    }

    fn entity_row(&self, entity: &Entity, schema: &Schema) -> Result<Vec<u8>> {
        self.encode_identifier(&entity.vertex, schema)
    }

    /// Edge row bytes; `reversed` selects the destination-first twin.
    fn edge_row(&self, edge: &Edge, schema: &Schema, reversed: bool) -> Result<Vec<u8>> {
        let (first, second) = if reversed {
            (&edge.destination, &edge.source)
        } else {
            (&edge.source, &edge.destination)
        };
        let flag = match (edge.directed, reversed) {
            (false, _) => DirectionFlag::Undirected,
            (true, false) => DirectionFlag::CorrectWay,
            (true, true) => DirectionFlag::IncorrectWay,
        };
        let mut row = self.encode_identifier(first, schema)?;
        row.push(self.layout.delimiter());
        row.extend_from_slice(&self.encode_identifier(second, schema)?);
        row.push(self.layout.delimiter());
        row.push(flag.as_byte(&self.layout));
        Ok(row)
    }

    /// Escaped, delimiter-joined group-by values in schema order.
    /// An absent property encodes as an empty field.
    fn qualifier(&self, group_schema: &GroupSchema, properties: &Properties) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut first = true;
        for def in group_schema.group_by_defs() {
            if !first {
                out.push(self.layout.delimiter());
            }
            first = false;
            if let Some(value) = properties.get(&def.name) {
                let raw = def.serialiser.serialise(value)?;
                self.layout.escape_into(&raw, &mut out);
            }
        }
        Ok(out)
    }

    fn decode_qualifier(
        &self,
        group_schema: &GroupSchema,
        group: &str,
        qualifier: &[u8],
    ) -> Result<Properties> {
        let defs: Vec<_> = group_schema.group_by_defs().collect();
        let mut properties = Properties::new();
        if defs.is_empty() {
            if !qualifier.is_empty() {
                return Err(Error::conversion(format!(
                    "group {:?} declares no group-by properties but qualifier is non-empty",
                    group
                )));
            }
            return Ok(properties);
        }
        let d = self.layout.delimiter();
        let fields: Vec<&[u8]> = qualifier.split(|&b| b == d).collect();
        if fields.len() != defs.len() {
            return Err(Error::conversion(format!(
                "qualifier has {} fields, group {:?} declares {}",
                fields.len(),
                group,
                defs.len()
            )));
        }
        for (def, field) in defs.iter().zip(fields) {
            if field.is_empty() {
                continue;
            }
            let raw = self.layout.unescape(field)?;
            let value = def
                .serialiser
                .deserialise(&raw)
                .map_err(|e| Error::conversion(format!("group-by {:?}: {}", def.name, e)))?;
            properties.insert(def.name.clone(), value);
        }
        Ok(properties)
    }

    /// Encode the non-group-by property bag. Undeclared properties are a
    /// codec mismatch, not silently dropped.
    fn value_bytes(
        &self,
        group_schema: &GroupSchema,
        group: &str,
        properties: &Properties,
    ) -> Result<Value> {
        let mut bag = Properties::new();
        for (name, value) in properties {
            let def = group_schema.def(name).ok_or_else(|| {
                Error::serialisation(format!(
                    "property {:?} is not declared for group {:?}",
                    name, group
                ))
            })?;
            if !def.group_by {
                bag.insert(name.clone(), value.clone());
            }
        }
        bincode::serialize(&bag)
            .map_err(|e| Error::serialisation(format!("value encode: {}", e)))
    }

    fn decode_value(
        &self,
        group_schema: &GroupSchema,
        group: &str,
        value: &[u8],
    ) -> Result<Properties> {
        if value.is_empty() {
            return Ok(Properties::new());
        }
        let bag: Properties = bincode::deserialize(value)
            .map_err(|e| Error::conversion(format!("value decode: {}", e)))?;
        for name in bag.keys() {
            if group_schema.def(name).is_none() {
                return Err(Error::conversion(format!(
                    "stored property {:?} is not declared for group {:?}",
                    name, group
                )));
            }
        }
        Ok(bag)
    }
}
