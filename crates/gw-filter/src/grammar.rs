//! Filter grammar (spec §4.8): a small recursive boolean language over
//! tags, attributes, and structural markers, used by cache policies and
//! index filters. Styled after `core/store/src/columns.rs`'s tagged-
//! enum-with-doc-comment-per-variant pattern.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::item::TaggedItem;

/// A single tag match clause: `{name}`, `{name, value}`, or
/// `{name, valueStartsWith}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    pub name: String,
    pub value: Option<String>,
    pub value_starts_with: Option<String>,
}

/// The filter grammar itself. `And`/`Or`/`Not` nest arbitrarily; the
/// leaves are `Always`, `Never`, `Tags`, `Attributes`, and
/// `IsNestedBundle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Always,
    Never,
    Tags(Vec<TagMatch>),
    Attributes(Vec<(String, String)>),
    IsNestedBundle,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("filter object must set exactly one of always/never/tags/attributes/isNestedBundle/and/or/not, found {0}")]
    AmbiguousOrEmptyShape(usize),
    #[error("tag match at index {0} must set at most one of value/valueStartsWith")]
    TagMatchHasBothValueForms(usize),
}

/// Raw wire shape accepting every grammar key, disambiguated at
/// conversion time into exactly one [`Filter`] variant.
#[derive(Debug, Deserialize)]
struct RawFilter {
    #[serde(default)]
    always: Option<bool>,
    #[serde(default)]
    never: Option<bool>,
    #[serde(default)]
    tags: Option<Vec<RawTagMatch>>,
    #[serde(default)]
    attributes: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default, rename = "isNestedBundle")]
    is_nested_bundle: Option<bool>,
    #[serde(default)]
    and: Option<Vec<RawFilter>>,
    #[serde(default)]
    or: Option<Vec<RawFilter>>,
    #[serde(default)]
    not: Option<Box<RawFilter>>,
}

#[derive(Debug, Deserialize)]
struct RawTagMatch {
    name: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default, rename = "valueStartsWith")]
    value_starts_with: Option<String>,
}

impl TryFrom<RawTagMatch> for TagMatch {
    type Error = FilterParseError;

    fn try_from(raw: RawTagMatch) -> Result<Self, Self::Error> {
        if raw.value.is_some() && raw.value_starts_with.is_some() {
            return Err(FilterParseError::TagMatchHasBothValueForms(0));
        }
        Ok(TagMatch { name: raw.name, value: raw.value, value_starts_with: raw.value_starts_with })
    }
}

impl TryFrom<RawFilter> for Filter {
    type Error = FilterParseError;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        let mut shapes: Vec<Filter> = Vec::new();

        if raw.always == Some(true) {
            shapes.push(Filter::Always);
        }
        if raw.never == Some(true) {
            shapes.push(Filter::Never);
        }
        if let Some(tags) = raw.tags {
            let converted: Result<Vec<TagMatch>, _> = tags.into_iter().map(TagMatch::try_from).collect();
            shapes.push(Filter::Tags(converted?));
        }
        if let Some(attributes) = raw.attributes {
            shapes.push(Filter::Attributes(attributes.into_iter().collect()));
        }
        if raw.is_nested_bundle == Some(true) {
            shapes.push(Filter::IsNestedBundle);
        }
        if let Some(and) = raw.and {
            let converted: Result<Vec<Filter>, _> = and.into_iter().map(Filter::try_from).collect();
            shapes.push(Filter::And(converted?));
        }
        if let Some(or) = raw.or {
            let converted: Result<Vec<Filter>, _> = or.into_iter().map(Filter::try_from).collect();
            shapes.push(Filter::Or(converted?));
        }
        if let Some(not) = raw.not {
            shapes.push(Filter::Not(Box::new(Filter::try_from(*not)?)));
        }

        if shapes.len() != 1 {
            return Err(FilterParseError::AmbiguousOrEmptyShape(shapes.len()));
        }
        Ok(shapes.into_iter().next().unwrap())
    }
}

impl Filter {
    pub fn from_json(s: &str) -> Result<Self, FilterLoadError> {
        let raw: RawFilter = serde_json::from_str(s)?;
        Ok(Filter::try_from(raw)?)
    }

    /// Evaluates this filter against `item`. Pure and total (spec §8
    /// invariant 9 "filter idempotence"): the grammar has no leaf that
    /// can fail once parsed, so there is no error channel here — a
    /// malformed filter is rejected at parse time instead (spec §4.8
    /// evaluator note: "policy-evaluation errors are logged and treated
    /// as no match," realized here by keeping every parsed `Filter`
    /// well-formed by construction).
    pub fn matches(&self, item: &TaggedItem) -> bool {
        match self {
            Filter::Always => true,
            Filter::Never => false,
            Filter::Tags(matches) => matches.iter().all(|tm| tag_match_satisfied(tm, item)),
            Filter::Attributes(attrs) => attrs.iter().all(|(k, v)| attribute_satisfied(k, v, item)),
            Filter::IsNestedBundle => item.is_nested_bundle,
            Filter::And(children) => children.iter().all(|f| f.matches(item)),
            Filter::Or(children) => children.iter().any(|f| f.matches(item)),
            Filter::Not(inner) => !inner.matches(item),
        }
    }
}

fn tag_match_satisfied(tag_match: &TagMatch, item: &TaggedItem) -> bool {
    item.tags.iter().any(|(name_b64, value_b64)| {
        let (Some(name), Some(value)) = (decode_b64u(name_b64), decode_b64u(value_b64)) else {
            return false;
        };
        if name != tag_match.name {
            return false;
        }
        match (&tag_match.value, &tag_match.value_starts_with) {
            (Some(expected), _) => value == *expected,
            (None, Some(prefix)) => value.starts_with(prefix.as_str()),
            (None, None) => true,
        }
    })
}

fn attribute_satisfied(key: &str, expected: &str, item: &TaggedItem) -> bool {
    if key == "owner_address" {
        return match &item.owner {
            Some(owner_bytes) => {
                let hash = Sha256::digest(owner_bytes);
                URL_SAFE_NO_PAD.encode(hash) == expected
            }
            None => false,
        };
    }
    item.attributes.get(key).map(|v| v.as_str()) == Some(expected)
}

fn decode_b64u(s: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(s).ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Error)]
pub enum FilterLoadError {
    #[error("failed to parse filter JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Shape(#[from] FilterParseError),
}
