//! Query View
//!
//! A view names the groups a query wants, the properties to return for
//! each, and the property predicates applied before and after query-time
//! aggregation. Views travel to the store's scan process as JSON inside
//! the scan predicate option map, so everything here is serde-friendly.

use crate::element::{Element, Properties, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Comparison applied by a [`PropertyPredicate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    /// Property present, any value
    Exists,
    /// Property equal to the given value
    Eq,
    /// Property strictly greater than the given value
    Gt,
    /// Property strictly less than the given value
    Lt,
}

/// One serialisable filter condition over an element's properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyPredicate {
    pub property: String,
    pub op: PredicateOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
}

impl PropertyPredicate {
    pub fn exists(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            op: PredicateOp::Exists,
            value: None,
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            property: property.into(),
            op: PredicateOp::Eq,
            value: Some(value.into()),
        }
    }

    pub fn gt(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            property: property.into(),
            op: PredicateOp::Gt,
            value: Some(value.into()),
        }
    }

    pub fn lt(property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            property: property.into(),
            op: PredicateOp::Lt,
            value: Some(value.into()),
        }
    }

    /// Test the predicate against a property map.
    ///
    /// An absent property fails every op; a comparison against a value of
    /// a different type fails rather than erroring.
    pub fn test(&self, properties: &Properties) -> bool {
        let Some(actual) = properties.get(&self.property) else {
            return false;
        };
        match self.op {
            PredicateOp::Exists => true,
            PredicateOp::Eq => self.value.as_ref() == Some(actual),
            PredicateOp::Gt => self
                .value
                .as_ref()
                .and_then(|v| actual.compare(v))
                .is_some_and(|ord| ord.is_gt()),
            PredicateOp::Lt => self
                .value
                .as_ref()
                .and_then(|v| actual.compare(v))
                .is_some_and(|ord| ord.is_lt()),
        }
    }
}

/// Per-group view settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewGroup {
    /// Properties to return. `None` keeps all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
    /// Applied inside the store scan before query-time aggregation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_aggregation_filter: Vec<PropertyPredicate>,
    /// Applied after query-time aggregation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_aggregation_filter: Vec<PropertyPredicate>,
}

impl ViewGroup {
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict the returned properties.
    pub fn with_properties(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.properties = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pre_aggregation_filter(mut self, predicate: PropertyPredicate) -> Self {
        self.pre_aggregation_filter.push(predicate);
        self
    }

    pub fn with_post_aggregation_filter(mut self, predicate: PropertyPredicate) -> Self {
        self.post_aggregation_filter.push(predicate);
        self
    }
}

/// The query view: which groups are wanted, and how.
///
/// A view with no groups matches nothing; build from the schema's group
/// names when everything is wanted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct View {
    #[serde(default)]
    pub groups: BTreeMap<String, ViewGroup>,
}

impl View {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style group inclusion.
    pub fn with_group(mut self, name: impl Into<String>, group: ViewGroup) -> Self {
        self.groups.insert(name.into(), group);
        self
    }

    /// A view over the given groups with no filters or projection.
    pub fn of_groups(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut view = Self::new();
        for name in names {
            view.groups.insert(name.into(), ViewGroup::all());
        }
        view
    }

    pub fn includes_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn group(&self, name: &str) -> Option<&ViewGroup> {
        self.groups.get(name)
    }

    /// The element validator the server-side scan filter delegates to:
    /// group membership plus the group's pre-aggregation filter.
    pub fn validate_pre_aggregation(&self, element: &Element) -> bool {
        let Some(group) = self.group(element.group()) else {
            return false;
        };
        group
            .pre_aggregation_filter
            .iter()
            .all(|p| p.test(element.properties()))
    }

    /// Post-aggregation acceptance for an element.
    pub fn validate_post_aggregation(&self, element: &Element) -> bool {
        let Some(group) = self.group(element.group()) else {
            return false;
        };
        group
            .post_aggregation_filter
            .iter()
            .all(|p| p.test(element.properties()))
    }

    /// Drop properties the view did not request.
    pub fn strip_unrequested(&self, element: &mut Element) {
        let Some(wanted) = self
            .group(element.group())
            .and_then(|g| g.properties.clone())
        else {
            return;
        };
        element
            .properties_mut()
            .retain(|name, _| wanted.iter().any(|w| w == name));
    }
}
