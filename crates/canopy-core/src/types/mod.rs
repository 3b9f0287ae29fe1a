//! # Core Type Definitions
//!
//! This module contains the value types shared by every Canopy component:
//! - Identifiers (`EntityId`, `UserId`) and version numbers (`VersionNumber`)
//! - The entity model (`Entity`, `EntityType`, `Publication`)
//! - Traversal projections (`ListItem`, `HierarchyItem`, `TreeNode`)
//! - Request types consumed by the hierarchy engine
//! - Error types (`CanopyError`), re-exported from `error`
//!
//! ## Ordering Guarantees
//!
//! Identifiers implement `Ord` so that permission sets and traversal
//! results can live in `BTreeSet`/`BTreeMap` and come out in a stable order.

mod error;

pub use error::{CanopyError, ValidationRule};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of an entity in the hierarchy.
///
/// Assigned once by an `IdGenerator` and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// The all-zero identifier. Never assigned to a stored entity.
    pub const NIL: Self = Self(Uuid::nil());

    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Identifier of the user acting on the hierarchy (creator, editor, viewer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A published version number. Always `>= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct VersionNumber(u32);

impl VersionNumber {
    /// The version assigned on first publish.
    pub const FIRST: Self = Self(1);

    /// Create a version number, rejecting zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        if value == 0 { None } else { Some(Self(value)) }
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for VersionNumber {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "version numbers start at 1".to_string())
    }
}

impl From<VersionNumber> for u32 {
    fn from(value: VersionNumber) -> Self {
        value.0
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// ENTITY MODEL
// =============================================================================

/// Kind of node in the forest.
///
/// `Department` is a container and may be a root. `Article` is leaf content:
/// it always needs a parent and can never be one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Department,
    Article,
}

impl EntityType {
    /// Stable lowercase name, used for storage and the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Department => "department",
            Self::Article => "article",
        }
    }

    /// Whether an entity of this type must have a parent.
    #[must_use]
    pub const fn requires_parent(self) -> bool {
        matches!(self, Self::Article)
    }

    /// Whether entities of this type may have children.
    #[must_use]
    pub const fn accepts_children(self) -> bool {
        matches!(self, Self::Department)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publication state of an entity.
///
/// A `Draft` has no version history of its own at the moment it is a draft;
/// a `Published` entity's current row mirrors its newest version record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "version", rename_all = "snake_case")]
pub enum Publication {
    Draft,
    Published(VersionNumber),
}

impl Publication {
    #[must_use]
    pub const fn is_draft(&self) -> bool {
        matches!(self, Self::Draft)
    }

    /// The current version, `None` for drafts.
    #[must_use]
    pub const fn version(&self) -> Option<VersionNumber> {
        match self {
            Self::Draft => None,
            Self::Published(v) => Some(*v),
        }
    }
}

/// A node in the managed hierarchy, with its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub name: String,
    pub content: String,
    pub parent_id: Option<EntityId>,
    pub created_by: UserId,
    pub updated_by: UserId,
    pub publication: Publication,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity {
    /// Reduce to the traversal projection.
    #[must_use]
    pub fn list_item(&self) -> ListItem {
        ListItem {
            id: self.id,
            entity_type: self.entity_type,
            name: self.name.clone(),
            parent_id: self.parent_id,
        }
    }
}

// =============================================================================
// TRAVERSAL PROJECTIONS
// =============================================================================

/// Lightweight projection used for traversal and tree assembly.
///
/// Never carries content, so traversal queries stay cheap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub name: String,
    pub parent_id: Option<EntityId>,
}

/// A list item annotated with its traversal depth (1 at the seed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyItem {
    pub item: ListItem,
    pub depth: u32,
}

/// A list item plus its children, assembled in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub item: ListItem,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn subtree_size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TreeNode::subtree_size)
            .sum::<usize>()
    }

    /// Visit every identifier in this subtree, depth first.
    pub fn collect_ids(&self, out: &mut Vec<EntityId>) {
        out.push(self.item.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

/// Which way a hierarchy traversal walks from its seeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ChildrenOnly,
    ParentsOnly,
    ChildrenAndParents,
}

impl Direction {
    #[must_use]
    pub const fn walks_down(self) -> bool {
        matches!(self, Self::ChildrenOnly | Self::ChildrenAndParents)
    }

    #[must_use]
    pub const fn walks_up(self) -> bool {
        matches!(self, Self::ParentsOnly | Self::ChildrenAndParents)
    }
}

/// Capability requested from the permission layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
}

impl Capability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Traversal used to expand a direct grant into reachable identifiers.
    ///
    /// A write grant covers the granted node's descendants only. A read
    /// grant also exposes the ancestors, so the node can be placed in a tree.
    #[must_use]
    pub const fn scope(self) -> Direction {
        match self {
            Self::Read => Direction::ChildrenAndParents,
            Self::Write => Direction::ChildrenOnly,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(CanopyError::ValidationFailed {
                field: "capability",
                rule: ValidationRule::UnknownValue {
                    value: other.to_string(),
                },
            }),
        }
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Input for `HierarchyCore::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub user_id: UserId,
    pub entity_type: EntityType,
    pub name: String,
    pub content: String,
    pub parent_id: Option<EntityId>,
    pub is_draft: bool,
}

/// Input for `HierarchyCore::update`.
///
/// `parent_id` is only looked at when `parent_changed` is set; otherwise the
/// entity keeps its current parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub id: EntityId,
    pub user_id: UserId,
    pub name: String,
    pub content: String,
    pub parent_changed: bool,
    pub parent_id: Option<EntityId>,
    pub is_draft: bool,
}

/// Validated row data handed to `HierarchyStore::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntity {
    pub entity_type: EntityType,
    pub name: String,
    pub content: String,
    pub parent_id: Option<EntityId>,
    pub user_id: UserId,
}

/// Validated row data handed to `HierarchyStore::update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChanges {
    pub id: EntityId,
    pub name: String,
    pub content: String,
    /// `None` leaves the stored parent untouched; `Some(p)` re-parents to `p`.
    pub parent_id: Option<Option<EntityId>>,
    pub user_id: UserId,
}

impl EntityChanges {
    /// Whether these changes re-parent the entity.
    #[must_use]
    pub const fn moves(&self) -> bool {
        self.parent_id.is_some()
    }
}

// =============================================================================
// TESTS
// =============================================================================
