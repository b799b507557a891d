#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as JsonValue;

/// The aggregate kinds managed by the back office. The set is closed:
/// the save pipeline, the ledger's polymorphic item reference, and the
/// relationship registry all dispatch over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Customer,
    Product,
    Order,
    Category,
}

/// A many-to-many relationship owned by an entity kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelationshipDef {
    pub name: &'static str,
    pub target: EntityKind,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Product => "product",
            Self::Order => "order",
            Self::Category => "category",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "customer" => Some(Self::Customer),
            "product" => Some(Self::Product),
            "order" => Some(Self::Order),
            "category" => Some(Self::Category),
            _ => None,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Customer => "cus",
            Self::Product => "prd",
            Self::Order => "ord",
            Self::Category => "cat",
        }
    }

    /// Child collections exclusively owned by this kind. Children are
    /// only ever mutated inside a parent graph save.
    pub fn child_collections(&self) -> &'static [&'static str] {
        match self {
            Self::Customer => &["addresses"],
            Self::Product => &["variants"],
            Self::Order => &["lines"],
            Self::Category => &[],
        }
    }

    pub fn relationships(&self) -> &'static [RelationshipDef] {
        match self {
            Self::Customer => &[RelationshipDef {
                name: "segments",
                target: Self::Category,
            }],
            Self::Product => &[RelationshipDef {
                name: "categories",
                target: Self::Category,
            }],
            Self::Order | Self::Category => &[],
        }
    }

    pub fn relationship(&self, name: &str) -> Option<RelationshipDef> {
        self.relationships().iter().copied().find(|r| r.name == name)
    }

    pub fn owns_collection(&self, collection: &str) -> bool {
        self.child_collections().contains(&collection)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, EntityIdError> {
        let value = value.into();
        validate_entity_id(&value)?;
        Ok(Self(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityIdError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

impl EntityIdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "id must not be empty",
            Self::TooLong => "id must be at most 64 characters",
            Self::InvalidFirstChar => "id must start with an alphanumeric character",
            Self::InvalidChar { .. } => "id contains an invalid character",
        }
    }
}

fn validate_entity_id(value: &str) -> Result<(), EntityIdError> {
    if value.is_empty() {
        return Err(EntityIdError::Empty);
    }
    if value.len() > 64 {
        return Err(EntityIdError::TooLong);
    }
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(EntityIdError::Empty);
    };
    if !first.is_ascii_alphanumeric() {
        return Err(EntityIdError::InvalidFirstChar);
    }
    for (index, ch) in value.chars().enumerate() {
        if index == 0 {
            continue;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            continue;
        }
        return Err(EntityIdError::InvalidChar { ch, index });
    }
    Ok(())
}

/// Polymorphic reference to one aggregate: a known kind plus an opaque id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id.as_str())
    }
}

/// One record exclusively owned by a parent aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildRecord {
    pub id: String,
    pub version: i64,
    pub fields: BTreeMap<String, JsonValue>,
    pub deleted: bool,
}

/// In-memory aggregate: the parent row, its owned children grouped by
/// collection, and the live linked-id set per relationship.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphEntity {
    pub item: EntityRef,
    pub version: i64,
    pub fields: BTreeMap<String, JsonValue>,
    pub children: BTreeMap<String, Vec<ChildRecord>>,
    pub links: BTreeMap<String, BTreeSet<String>>,
}

impl GraphEntity {
    pub fn new(item: EntityRef, version: i64) -> Self {
        Self {
            item,
            version,
            fields: BTreeMap::new(),
            children: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }

    pub fn linked_ids(&self, relation: &str) -> BTreeSet<String> {
        self.links.get(relation).cloned().unwrap_or_default()
    }
}
