//! Server-Side Scan Predicate
//!
//! The acceptance test the store runs inside its own scan pipeline. It
//! is a pure function of `(Key, Value)` plus a serialisable config, so
//! any host scan process can adapt it to its plugin surface without the
//! logic knowing about it.
//!
//! Configuration crosses the process boundary as an opaque string map:
//! JSON view, JSON schema, and the codec identifier. Missing keys are a
//! setup error, raised before any scanning begins.

use crate::codec::ElementCodec;
use crate::error::{Error, Result};
use crate::escape::{are_sorted_bytes_equal, ByteLayout};
use crate::key::Key;
use crate::schema::Schema;
use crate::view::View;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Option-map key for the JSON-serialised view.
pub const VIEW_OPTION: &str = "jala.view";
/// Option-map key for the JSON-serialised schema.
pub const SCHEMA_OPTION: &str = "jala.schema";
/// Option-map key for the codec identifier.
pub const CODEC_OPTION: &str = "jala.codec";
/// Option-map key for the delimiter byte (decimal).
pub const DELIMITER_OPTION: &str = "jala.delimiter";

/// The one codec implementation this crate ships.
pub const ELEMENT_CODEC_ID: &str = "jala.ElementCodec";

/// Everything the scan-side filter needs, in a form that survives the
/// trip through the store's opaque option map.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanPredicateConfig {
    pub view: View,
    pub schema: Schema,
    pub codec_id: String,
    pub layout: ByteLayout,
}

impl ScanPredicateConfig {
    pub fn new(view: View, schema: Schema, layout: ByteLayout) -> Self {
        Self {
            view,
            schema,
            codec_id: ELEMENT_CODEC_ID.to_string(),
            layout,
        }
    }

    /// Serialise into the store's string option map.
    pub fn to_options(&self) -> Result<BTreeMap<String, String>> {
        let mut options = BTreeMap::new();
        options.insert(
            VIEW_OPTION.to_string(),
            serde_json::to_string(&self.view)
                .map_err(|e| Error::predicate_config(format!("view encode: {}", e)))?,
        );
        options.insert(
            SCHEMA_OPTION.to_string(),
            serde_json::to_string(&self.schema)
                .map_err(|e| Error::predicate_config(format!("schema encode: {}", e)))?,
        );
        options.insert(CODEC_OPTION.to_string(), self.codec_id.clone());
        options.insert(
            DELIMITER_OPTION.to_string(),
            self.layout.delimiter().to_string(),
        );
        Ok(options)
    }

    /// Parse the store's string option map, validating every required
    /// key before any scanning begins.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self> {
        let view_json = require(options, VIEW_OPTION)?;
        let schema_json = require(options, SCHEMA_OPTION)?;
        let codec_id = require(options, CODEC_OPTION)?;
        if codec_id != ELEMENT_CODEC_ID {
            return Err(Error::predicate_config(format!(
                "unknown codec {:?}",
                codec_id
            )));
        }
        let view: View = serde_json::from_str(view_json)
            .map_err(|e| Error::predicate_config(format!("view decode: {}", e)))?;
        let schema: Schema = serde_json::from_str(schema_json)
            .map_err(|e| Error::predicate_config(format!("schema decode: {}", e)))?;
        let layout = match options.get(DELIMITER_OPTION) {
            Some(raw) => {
                let delimiter: u8 = raw.parse().map_err(|_| {
                    Error::predicate_config(format!("bad delimiter {:?}", raw))
                })?;
                ByteLayout::new(delimiter)
                    .map_err(|e| Error::predicate_config(e.to_string()))?
            }
            None => ByteLayout::DEFAULT,
        };
        Ok(Self {
            view,
            schema,
            codec_id: codec_id.clone(),
            layout,
        })
    }
}

fn require<'m>(options: &'m BTreeMap<String, String>, key: &str) -> Result<&'m String> {
    options
        .get(key)
        .ok_or_else(|| Error::predicate_config(format!("missing required option {:?}", key)))
}

/// The scan-side acceptance test.
///
/// The escaped allowed-group set is computed once at construction; the
/// per-key fast path rejects foreign groups without decoding anything.
pub struct ScanPredicate {
    view: View,
    schema: Schema,
    codec: ElementCodec,
    layout: ByteLayout,
    allowed_groups: SmallVec<[Vec<u8>; 4]>,
}

impl ScanPredicate {
    pub fn new(config: ScanPredicateConfig) -> Self {
        let layout = config.layout;
        let allowed_groups = config
            .view
            .groups
            .keys()
            .map(|name| layout.escape(name.as_bytes()))
            .collect();
        Self {
            view: config.view,
            schema: config.schema,
            codec: ElementCodec::new(layout),
            layout,
            allowed_groups,
        }
    }

    /// Construct directly from the store's option map.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self> {
        Ok(Self::new(ScanPredicateConfig::from_options(options)?))
    }

    /// Decide whether a stored cell belongs in the scan output.
    ///
    /// A decode failure here is fatal for the scan: a server-side filter
    /// has no fallback and must not silently swallow a corrupt entry it
    /// was asked to evaluate.
    pub fn accept(&self, key: &Key, value: &[u8]) -> Result<bool> {
        if !self.group_allowed(&key.column_family) {
            return Ok(false);
        }
        let element = self.codec.to_element(key, value, &self.schema, false)?;
        Ok(self.view.validate_pre_aggregation(&element))
    }

    /// Column-family match against the allowed escaped group names.
    ///
    /// Equal bytes match; so does an extension of an allowed name, but
    /// only across a delimiter boundary — one group's escaped name being
    /// a plain lexical prefix of another's must not match.
    fn group_allowed(&self, column_family: &[u8]) -> bool {
        let d = self.layout.delimiter();
        self.allowed_groups.iter().any(|group| {
            are_sorted_bytes_equal(group, column_family)
                || (column_family.len() > group.len()
                    && column_family.starts_with(group)
                    && column_family[group.len()] == d)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, Entity};
    use crate::schema::{GroupSchema, PropertyDef, SerialiserKind};
    use crate::view::{PropertyPredicate, ViewGroup};

    fn schema() -> Schema {
        Schema::new(SerialiserKind::Utf8)
            .with_group(
                "Edge",
                GroupSchema::new(vec![PropertyDef::plain("count", SerialiserKind::I64Be)]),
            )
            .with_group(
                "Edge2",
                GroupSchema::new(vec![PropertyDef::plain("count", SerialiserKind::I64Be)]),
            )
    }

    fn encode(element: &Element, schema: &Schema) -> (Key, Vec<u8>) {
        ElementCodec::new(ByteLayout::DEFAULT)
            .to_key_value(element, schema)
            .unwrap()
    }

    #[test]
    fn test_group_boundary_not_a_lexical_prefix_match() {
        let schema = schema();
        let view = View::of_groups(["Edge"]);
        let predicate =
            ScanPredicate::new(ScanPredicateConfig::new(view, schema.clone(), ByteLayout::DEFAULT));

        let wanted: Element = Entity::new("Edge", "v").into();
        let decoy: Element = Entity::new("Edge2", "v").into();

        let (key, value) = encode(&wanted, &schema);
        assert!(predicate.accept(&key, &value).unwrap());

        // "Edge" is a lexical prefix of "Edge2"; must still reject.
        let (key, value) = encode(&decoy, &schema);
        assert!(!predicate.accept(&key, &value).unwrap());
    }

    #[test]
    fn test_delimiter_bounded_extension_matches() {
        let predicate = ScanPredicate::new(ScanPredicateConfig::new(
            View::of_groups(["Edge"]),
            schema(),
            ByteLayout::DEFAULT,
        ));
        let layout = ByteLayout::DEFAULT;
        let mut extended = layout.escape(b"Edge");
        extended.push(layout.delimiter());
        extended.extend_from_slice(b"extra");
        assert!(predicate.group_allowed(&extended));
        assert!(!predicate.group_allowed(&layout.escape(b"Edge2")));
    }

    #[test]
    fn test_pre_aggregation_filter_applied() {
        let schema = schema();
        let view = View::new().with_group(
            "Edge",
            ViewGroup::all().with_pre_aggregation_filter(PropertyPredicate::gt("count", 10i64)),
        );
        let predicate =
            ScanPredicate::new(ScanPredicateConfig::new(view, schema.clone(), ByteLayout::DEFAULT));

        let passing: Element = Entity::new("Edge", "v").with_property("count", 11i64).into();
        let failing: Element = Entity::new("Edge", "v").with_property("count", 9i64).into();

        let (key, value) = encode(&passing, &schema);
        assert!(predicate.accept(&key, &value).unwrap());
        let (key, value) = encode(&failing, &schema);
        assert!(!predicate.accept(&key, &value).unwrap());
    }

    #[test]
    fn test_decode_failure_is_fatal() {
        let schema = schema();
        let predicate = ScanPredicate::new(ScanPredicateConfig::new(
            View::of_groups(["Edge"]),
            schema.clone(),
            ByteLayout::DEFAULT,
        ));
        let element: Element = Entity::new("Edge", "v").into();
        let (key, _) = encode(&element, &schema);
        assert!(matches!(
            predicate.accept(&key, &[0xFF, 0xFE]),
            Err(Error::ElementConversion(_))
        ));
    }

    #[test]
    fn test_config_round_trip_and_missing_keys() {
        let config = ScanPredicateConfig::new(
            View::of_groups(["Edge"]),
            schema(),
            ByteLayout::DEFAULT,
        );
        let options = config.to_options().unwrap();
        let back = ScanPredicateConfig::from_options(&options).unwrap();
        assert_eq!(back, config);

        for required in [VIEW_OPTION, SCHEMA_OPTION, CODEC_OPTION] {
            let mut incomplete = options.clone();
            incomplete.remove(required);
            let err = ScanPredicateConfig::from_options(&incomplete).unwrap_err();
            assert!(matches!(err, Error::PredicateConfig(_)), "{}", required);
        }

        let mut bad_codec = options.clone();
        bad_codec.insert(CODEC_OPTION.to_string(), "someone.Else".to_string());
        assert!(matches!(
            ScanPredicateConfig::from_options(&bad_codec),
            Err(Error::PredicateConfig(_))
        ));
    }
}
