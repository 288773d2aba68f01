//! Whitelist-driven JSON extraction.
//!
//! A [`FieldFilter`] is built from path patterns such as
//! `data[*].floors[*].doors[*].name` and applied while the document is
//! being parsed: whitelisted values are materialized, everything else is
//! skipped token by token through [`serde::de::IgnoredAny`]. Memory use is
//! bounded by the filter's depth plus the size of the kept values, never by
//! the size of the document.
//!
//! Pattern syntax: dot-separated object keys, each optionally followed by
//! one or more `[*]` (or `[]`) wildcards that descend into every array
//! element. A pattern may start with a wildcard when the root is an array.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Value};
use thiserror::Error;

/// A pattern could not be added to a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("empty field pattern")]
    Empty,

    #[error("invalid field pattern {pattern:?}: {reason}")]
    Syntax { pattern: String, reason: &'static str },

    #[error("field pattern {pattern:?} treats a path as both object and array")]
    Conflict { pattern: String },
}

/// One level of the whitelist tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FilterNode {
    /// Nothing selected below this point.
    #[default]
    Nothing,
    /// Keep the whole value.
    Leaf,
    /// Keep only the listed keys of an object.
    Object(BTreeMap<String, FilterNode>),
    /// Apply the inner node to every element of an array.
    Array(Box<FilterNode>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Each,
}

/// A compiled set of whitelisted paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    root: FilterNode,
}

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from several patterns.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for pattern in patterns {
            filter.allow(pattern.as_ref())?;
        }
        Ok(filter)
    }

    /// Whitelist one more path.
    pub fn allow(&mut self, pattern: &str) -> Result<(), FilterError> {
        let steps = parse_pattern(pattern)?;
        insert(&mut self.root, &steps).map_err(|()| FilterError::Conflict {
            pattern: pattern.to_owned(),
        })
    }

    pub fn root(&self) -> &FilterNode {
        &self.root
    }

    /// Extract from a blocking reader. The reader is consumed incrementally;
    /// wrap raw sockets in a `BufReader`.
    pub fn extract_reader<R: io::Read>(&self, reader: R) -> serde_json::Result<Value> {
        let mut de = serde_json::Deserializer::from_reader(reader);
        let value = Filtered(&self.root).deserialize(&mut de)?;
        de.end()?;
        Ok(value)
    }

    /// Extract from an in-memory document.
    pub fn extract_slice(&self, bytes: &[u8]) -> serde_json::Result<Value> {
        let mut de = serde_json::Deserializer::from_slice(bytes);
        let value = Filtered(&self.root).deserialize(&mut de)?;
        de.end()?;
        Ok(value)
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Step>, FilterError> {
    let syntax = |reason| FilterError::Syntax {
        pattern: pattern.to_owned(),
        reason,
    };

    if pattern.trim().is_empty() {
        return Err(FilterError::Empty);
    }

    let mut steps = Vec::new();
    for (i, segment) in pattern.split('.').enumerate() {
        let (name, mut rest) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };

        if name.is_empty() {
            // Only a leading wildcard may stand without a key.
            if i != 0 || rest.is_empty() {
                return Err(syntax("empty key"));
            }
        } else {
            steps.push(Step::Key(name.to_owned()));
        }

        while !rest.is_empty() {
            rest = if let Some(r) = rest.strip_prefix("[*]") {
                r
            } else if let Some(r) = rest.strip_prefix("[]") {
                r
            } else {
                return Err(syntax("only [*] or [] may follow a key"));
            };
            steps.push(Step::Each);
        }
    }
    Ok(steps)
}

/// Merge `steps` into `node`. `Err(())` on object/array conflicts.
fn insert(node: &mut FilterNode, steps: &[Step]) -> Result<(), ()> {
    let Some((step, rest)) = steps.split_first() else {
        *node = FilterNode::Leaf;
        return Ok(());
    };

    match node {
        // A kept value already covers anything beneath it.
        FilterNode::Leaf => return Ok(()),
        FilterNode::Nothing => {
            *node = match step {
                Step::Key(_) => FilterNode::Object(BTreeMap::new()),
                Step::Each => FilterNode::Array(Box::default()),
            };
        }
        FilterNode::Object(_) | FilterNode::Array(_) => {}
    }

    match (node, step) {
        (FilterNode::Object(fields), Step::Key(key)) => {
            insert(fields.entry(key.clone()).or_default(), rest)
        }
        (FilterNode::Array(inner), Step::Each) => insert(inner, rest),
        _ => Err(()),
    }
}

// ── Deserialization ──────────────────────────────────────────────────

/// Seed that deserializes one value through a filter node.
struct Filtered<'f>(&'f FilterNode);

impl<'de> DeserializeSeed<'de> for Filtered<'_> {
    type Value = Value;

    fn deserialize<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        match self.0 {
            FilterNode::Leaf => serde::Deserialize::deserialize(deserializer),
            FilterNode::Nothing => {
                deserializer.deserialize_ignored_any(IgnoredAny)?;
                Ok(Value::Null)
            }
            FilterNode::Object(_) | FilterNode::Array(_) => {
                deserializer.deserialize_any(FilterVisitor(self.0))
            }
        }
    }
}

/// Visits a container the filter descends into. Values whose shape does
/// not match the filter collapse to `null`.
struct FilterVisitor<'f>(&'f FilterNode);

impl<'de> Visitor<'de> for FilterVisitor<'_> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let FilterNode::Object(fields) = self.0 else {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            return Ok(Value::Null);
        };

        let mut kept = Map::new();
        while let Some(key) = map.next_key::<String>()? {
            match fields.get(&key) {
                Some(child) => {
                    let value = map.next_value_seed(Filtered(child))?;
                    kept.insert(key, value);
                }
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(Value::Object(kept))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let FilterNode::Array(inner) = self.0 else {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            return Ok(Value::Null);
        };

        let mut kept = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(64));
        while let Some(value) = seq.next_element_seed(Filtered(inner))? {
            kept.push(value);
        }
        Ok(Value::Array(kept))
    }

    fn visit_bool<E>(self, _: bool) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_i64<E>(self, _: i64) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_u64<E>(self, _: u64) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_f64<E>(self, _: f64) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_str<E>(self, _: &str) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }
}
