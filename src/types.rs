//! Identifiers and rows as they come off the ledger's `edges` table.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A ledger identifier normalized so numeric and string encodings compare
/// equal.
///
/// Nodes serialize 64-bit ids either as JSON numbers or as decimal strings,
/// depending on the node version and the magnitude of the value. Anything
/// that parses as a `u64` (surrounding whitespace and leading zeros allowed)
/// becomes [`Key::Numeric`]; everything else is kept as a trimmed name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Unsigned 64-bit identifier.
    Numeric(u64),
    /// Non-numeric token, kept verbatim after trimming.
    Name(String),
}

impl Key {
    /// Normalizes a textual key.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u64>() {
            Ok(value) => Key::Numeric(value),
            Err(_) => Key::Name(trimmed.to_string()),
        }
    }

    /// Returns the numeric value when the key is numeric.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Key::Numeric(value) => Some(*value),
            Key::Name(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Numeric(value) => write!(f, "{value}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::Numeric(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::parse(value)
    }
}

impl FromStr for Key {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Key::parse(s))
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Numeric(value) => serializer.serialize_u64(*value),
            Key::Name(name) => serializer.serialize_str(name),
        }
    }
}

struct KeyVisitor;

impl<'de> Visitor<'de> for KeyVisitor {
    type Value = Key;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string identifier")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Key, E> {
        Ok(Key::Numeric(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Key, E> {
        Ok(match u64::try_from(v) {
            Ok(value) => Key::Numeric(value),
            Err(_) => Key::Name(v.to_string()),
        })
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Key, E> {
        Ok(Key::parse(v))
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(KeyVisitor)
    }
}

/// Primary key of an edge row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub Key);

/// Graph node reference (a DAO on the origin side, a document on the
/// destination side).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Key);

macro_rules! key_newtype {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $ty {
            fn from(value: u64) -> Self {
                $ty(Key::Numeric(value))
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                $ty(Key::parse(value))
            }
        }

        impl From<Key> for $ty {
            fn from(value: Key) -> Self {
                $ty(value)
            }
        }
    };
}

key_newtype!(EdgeId);
key_newtype!(NodeId);

/// Edge name describing where a proposal sits in the governance lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Proposal currently open for voting.
    Votable,
    /// Proposal drafted but not yet published.
    StagingProp,
    /// Active proposal.
    Proposal,
    /// Closed proposal that passed.
    PassedProps,
    /// Closed proposal that failed.
    FailedProps,
    /// Proposal whose voting period has closed.
    ClosedProps,
    /// Any other edge name carried by the table.
    Other(String),
}

impl Category {
    /// The six lifecycle categories the scanner knows about.
    pub const KNOWN: [Category; 6] = [
        Category::Votable,
        Category::StagingProp,
        Category::Proposal,
        Category::PassedProps,
        Category::FailedProps,
        Category::ClosedProps,
    ];

    /// Maps a wire edge name onto a category. Never fails.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "votable" => Category::Votable,
            "stagingprop" => Category::StagingProp,
            "proposal" => Category::Proposal,
            "passedprops" => Category::PassedProps,
            "failedprops" => Category::FailedProps,
            "closedprops" => Category::ClosedProps,
            other => Category::Other(other.to_string()),
        }
    }

    /// Wire edge name.
    pub fn as_str(&self) -> &str {
        match self {
            Category::Votable => "votable",
            Category::StagingProp => "stagingprop",
            Category::Proposal => "proposal",
            Category::PassedProps => "passedprops",
            Category::FailedProps => "failedprops",
            Category::ClosedProps => "closedprops",
            Category::Other(name) => name,
        }
    }

    /// Whether edges of this category count toward the DAO's proposal total.
    ///
    /// `votable`, `passedprops` and `failedprops` overlap `closedprops` and
    /// `proposal` and are informational only.
    pub fn counts_toward_total(&self) -> bool {
        matches!(
            self,
            Category::Proposal | Category::ClosedProps | Category::StagingProp
        )
    }

    /// Whether this is one of [`Category::KNOWN`].
    pub fn is_known(&self) -> bool {
        !matches!(self, Category::Other(_))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Category::from_name(&name))
    }
}

/// Allowlist of edge categories a scan keeps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Keep every edge name, including ones outside [`Category::KNOWN`].
    Any,
    /// Keep only the listed categories.
    Only(BTreeSet<Category>),
}

impl Default for CategoryFilter {
    fn default() -> Self {
        CategoryFilter::Only(Category::KNOWN.into_iter().collect())
    }
}

impl CategoryFilter {
    /// Builds an allowlist from category names.
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CategoryFilter::Only(
            names
                .into_iter()
                .map(|name| Category::from_name(name.as_ref()))
                .collect(),
        )
    }

    /// Parses a comma separated list; `all` or `any` selects [`CategoryFilter::Any`].
    pub fn parse(raw: &str) -> Result<Self, String> {
        let names: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();
        match names.as_slice() {
            [] => Err("category list is empty".to_string()),
            ["all"] | ["any"] => Ok(CategoryFilter::Any),
            _ => Ok(CategoryFilter::only(names)),
        }
    }

    /// Set containment check.
    pub fn allows(&self, category: &Category) -> bool {
        match self {
            CategoryFilter::Any => true,
            CategoryFilter::Only(set) => set.contains(category),
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::Any => f.write_str("any"),
            CategoryFilter::Only(set) => {
                let names: Vec<&str> = set.iter().map(Category::as_str).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

impl Serialize for CategoryFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Opaque resumption token handed back by the node as `next_key`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    /// Wraps a raw token.
    pub fn new(raw: impl Into<String>) -> Self {
        Cursor(raw.into())
    }

    /// Raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&NodeId> for Cursor {
    fn from(node: &NodeId) -> Self {
        Cursor(node.to_string())
    }
}

struct CursorVisitor;

impl<'de> Visitor<'de> for CursorVisitor {
    type Value = Option<Cursor>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer cursor")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(Cursor(v.to_string())))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(Cursor(v.to_string())))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        if v.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Cursor(v.to_string())))
        }
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

/// Deserializes an optional `next_key`; `null`, a missing field and `""` all
/// mean "no cursor".
pub(crate) fn deserialize_next_key<'de, D>(deserializer: D) -> Result<Option<Cursor>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(CursorVisitor)
}

/// One row of the ledger's graph-relation table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Primary key.
    pub id: EdgeId,
    /// Origin node (the DAO).
    pub from_node: NodeId,
    /// Destination node (the proposal document).
    pub to_node: NodeId,
    /// Lifecycle category, `edge_name` on the wire.
    #[serde(rename = "edge_name")]
    pub category: Category,
    /// Creation timestamp as reported by the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
}

impl Edge {
    /// Builds an edge without a creation timestamp.
    pub fn new(
        id: impl Into<EdgeId>,
        from_node: impl Into<NodeId>,
        to_node: impl Into<NodeId>,
        category: Category,
    ) -> Self {
        Self {
            id: id.into(),
            from_node: from_node.into(),
            to_node: to_node.into(),
            category,
            created_date: None,
        }
    }

    /// Whether two observations of the same id describe the same relation.
    pub fn same_relation(&self, other: &Edge) -> bool {
        self.from_node == other.from_node
            && self.to_node == other.to_node
            && self.category == other.category
    }
}
