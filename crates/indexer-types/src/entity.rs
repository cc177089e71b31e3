//! Entity types that can be indexed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Kind of content entity an indexing task refers to.
///
/// Tasks carry the entity type as raw text because they are written by
/// external producers; the processor parses it with [`EntityType::from_str`]
/// and routes unknown values to a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A document page
    Page,
    /// A block inside a page
    Block,
    /// A structured database
    Database,
    /// A row of a structured database
    DatabaseRow,
    /// A workspace (container of pages and databases)
    Workspace,
}

impl EntityType {
    /// All known entity types.
    pub const ALL: [EntityType; 5] = [
        EntityType::Page,
        EntityType::Block,
        EntityType::Database,
        EntityType::DatabaseRow,
        EntityType::Workspace,
    ];

    /// Wire name of this entity type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Page => "page",
            EntityType::Block => "block",
            EntityType::Database => "database",
            EntityType::DatabaseRow => "database_row",
            EntityType::Workspace => "workspace",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypesError::UnknownEntityType(s.to_string()))
    }
}
