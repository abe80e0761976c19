//! Seed → Scan Range Construction
//!
//! Turns query seeds (vertices, vertex pairs, raw ranges) into the
//! minimal set of row ranges the store must scan. Row-key algebra only:
//! no I/O happens here.
//!
//! Vertex serialisers used here must be order-preserving — otherwise the
//! computed bounds do not bound anything, and the factory fails fast
//! rather than return a silently wrong range.

use crate::codec::ElementCodec;
use crate::element::{DirectedType, DirectionFlag, InOutType, PropertyValue};
use crate::error::{Error, Result};
use crate::escape::ByteLayout;
use crate::key::{Key, Range};
use crate::schema::Schema;
use serde::{Deserialize, Serialize};

/// How a vertex seed matches stored elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedMatching {
    /// The seed matches every element touching the vertex
    #[default]
    RelatedTo,
    /// The seed matches only the vertex's own entities
    Equal,
}

/// Caller-supplied starting point for a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Seed {
    /// A single vertex
    Vertex(PropertyValue),
    /// A vertex pair naming one logical edge
    Edge {
        source: PropertyValue,
        destination: PropertyValue,
        directed: DirectedType,
    },
    /// An explicit pre-built range
    Range(Range),
}

/// Per-query flags shared by every seed of the query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOptions {
    pub include_entities: bool,
    pub include_edges: bool,
    pub matching: SeedMatching,
    pub in_out: InOutType,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            include_entities: true,
            include_edges: true,
            matching: SeedMatching::RelatedTo,
            in_out: InOutType::Either,
        }
    }
}

impl QueryOptions {
    pub fn entities_only() -> Self {
        Self {
            include_edges: false,
            ..Default::default()
        }
    }

    pub fn edges_only() -> Self {
        Self {
            include_entities: false,
            ..Default::default()
        }
    }

    pub fn with_matching(mut self, matching: SeedMatching) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_in_out(mut self, in_out: InOutType) -> Self {
        self.in_out = in_out;
        self
    }
}

/// Stateless range construction for one byte layout.
#[derive(Clone, Copy, Debug)]
pub struct RangeFactory {
    layout: ByteLayout,
    codec: ElementCodec,
}

impl RangeFactory {
    pub fn new(layout: ByteLayout) -> Self {
        Self {
            layout,
            codec: ElementCodec::new(layout),
        }
    }

    /// Ranges covering every element anchored at `vertex`, per the
    /// entity/edge flags.
    ///
    /// `SeedMatching::Equal` forces entities-only: an exact-match seed
    /// only ever resolves to the vertex's own entities.
    pub fn range_for_vertex(
        &self,
        vertex: &PropertyValue,
        schema: &Schema,
        options: &QueryOptions,
    ) -> Result<Vec<Range>> {
        self.require_ordered(schema)?;
        let escaped = self.codec.encode_identifier(vertex, schema)?;
        let d = self.layout.delimiter();

        let include_entities = options.include_entities;
        let include_edges =
            options.include_edges && options.matching != SeedMatching::Equal;

        let (start_row, end_row) = match (include_entities, include_edges) {
            // Anything with a delimiter-prefixed suffix is an edge row.
            (true, false) => (escaped.clone(), with_suffix(&escaped, d)),
            (false, true) => (
                with_suffix(&escaped, d),
                with_suffix(&escaped, self.layout.delimiter_plus_one()),
            ),
            (true, true) => (
                escaped.clone(),
                with_suffix(&escaped, self.layout.delimiter_plus_one()),
            ),
            (false, false) => return Ok(Vec::new()),
        };

        Ok(vec![Range::half_open(
            Key::from_row(start_row),
            Key::from_row(end_row),
        )])
    }

    /// Point range locating one logical edge.
    ///
    /// `in_out == Incoming` serialises the destination first, because the
    /// physical row for an incoming query is the destination-first twin;
    /// decode flips the result back to canonical orientation.
    pub fn range_for_edge(
        &self,
        source: &PropertyValue,
        destination: &PropertyValue,
        schema: &Schema,
        directed: DirectedType,
        in_out: InOutType,
    ) -> Result<Range> {
        self.require_ordered(schema)?;
        let (start_flag, end_flag) = match directed {
            DirectedType::Either => (DirectionFlag::Undirected, DirectionFlag::IncorrectWay),
            DirectedType::Directed => {
                let flag = if in_out == InOutType::Incoming {
                    DirectionFlag::IncorrectWay
                } else {
                    DirectionFlag::CorrectWay
                };
                (flag, flag)
            }
            DirectedType::Undirected => (DirectionFlag::Undirected, DirectionFlag::Undirected),
        };

        let (first, second) = if in_out == InOutType::Incoming {
            (destination, source)
        } else {
            (source, destination)
        };

        let mut base = self.codec.encode_identifier(first, schema)?;
        base.push(self.layout.delimiter());
        base.extend_from_slice(&self.codec.encode_identifier(second, schema)?);
        base.push(self.layout.delimiter());

        let mut start_row = base.clone();
        start_row.push(start_flag.as_byte(&self.layout));

        // End row is one sentinel byte past the last real key, still
        // expressed as an inclusive bound.
        let mut end_row = base;
        end_row.push(end_flag.as_byte(&self.layout));
        end_row.push(self.layout.delimiter_plus_one());

        Ok(Range::closed(
            Key::from_row(start_row),
            Key::from_row(end_row),
        ))
    }

    /// Dispatch over the seed kinds.
    pub fn ranges_for_seed(
        &self,
        seed: &Seed,
        schema: &Schema,
        options: &QueryOptions,
    ) -> Result<Vec<Range>> {
        match seed {
            Seed::Vertex(vertex) => self.range_for_vertex(vertex, schema, options),
            Seed::Edge {
                source,
                destination,
                directed,
            } => Ok(vec![self.range_for_edge(
                source,
                destination,
                schema,
                *directed,
                options.in_out,
            )?]),
            Seed::Range(range) => Ok(vec![range.clone()]),
        }
    }

    fn require_ordered(&self, schema: &Schema) -> Result<()> {
        if !schema.vertex_serialiser.preserves_order() {
            return Err(Error::range_factory(format!(
                "vertex serialiser {:?} does not preserve order; range bounds would be wrong",
                schema.vertex_serialiser
            )));
        }
        Ok(())
    }
}

fn with_suffix(row: &[u8], suffix: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + 1);
    out.extend_from_slice(row);
    out.push(suffix);
    out
}
