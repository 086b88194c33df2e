use std::collections::HashMap;

/// The subset of a retrieved item's metadata the filter grammar can
/// match against (spec §4.8). Tag names/values are carried exactly as
/// they appear on the item — base64url-encoded — since the matcher is
/// the thing responsible for decoding them.
#[derive(Debug, Clone, Default)]
pub struct TaggedItem {
    pub tags: Vec<(String, String)>,
    pub attributes: HashMap<String, String>,
    pub owner: Option<Vec<u8>>,
    pub is_nested_bundle: bool,
}

impl TaggedItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, name_b64: impl Into<String>, value_b64: impl Into<String>) -> Self {
        self.tags.push((name_b64.into(), value_b64.into()));
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}
