//! Invalidation rules.

use serde::{Deserialize, Serialize};

use indexer_types::{EntityType, TaskOperation};

use crate::pattern::PatternTemplate;

/// Static rule: a mutation of `entity_type` by `operation` invalidates
/// every key matching one of `invalidates_patterns`, plus dependents up to
/// `cascade_depth` hops away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRule {
    /// Entity type the rule applies to
    pub entity_type: String,
    /// Operation the rule applies to
    pub operation: TaskOperation,
    /// Key patterns (`*` and `{entityId}` supported)
    pub invalidates_patterns: Vec<String>,
    /// Reverse-dependency hops to follow from matched keys
    pub cascade_depth: usize,
}

impl InvalidationRule {
    /// Create a rule.
    pub fn new(
        entity_type: impl Into<String>,
        operation: TaskOperation,
        patterns: &[&str],
        cascade_depth: usize,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation,
            invalidates_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            cascade_depth,
        }
    }

    /// Parse the patterns once.
    pub fn compile(&self) -> CompiledRule {
        CompiledRule {
            entity_type: self.entity_type.clone(),
            operation: self.operation,
            patterns: self
                .invalidates_patterns
                .iter()
                .map(|p| PatternTemplate::compile(p))
                .collect(),
            cascade_depth: self.cascade_depth,
        }
    }
}

/// A rule with its patterns parsed.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Entity type the rule applies to
    pub entity_type: String,
    /// Operation the rule applies to
    pub operation: TaskOperation,
    /// Parsed patterns
    pub patterns: Vec<PatternTemplate>,
    /// Reverse-dependency hops to follow
    pub cascade_depth: usize,
}

impl CompiledRule {
    /// Whether the rule applies to this mutation.
    pub fn applies_to(&self, entity_type: &str, operation: TaskOperation) -> bool {
        self.entity_type == entity_type && self.operation == operation
    }
}

/// Rules used when none are configured.
///
/// Every content entity invalidates its own keys and their sub-keys on
/// any mutation. Workspace mutations cascade further because most cached
/// values hang off a workspace.
pub fn default_rules() -> Vec<InvalidationRule> {
    let mut rules = Vec::new();
    let operations = [
        TaskOperation::Insert,
        TaskOperation::Update,
        TaskOperation::Delete,
    ];

    for ty in [
        EntityType::Page,
        EntityType::Block,
        EntityType::Database,
        EntityType::DatabaseRow,
    ] {
        let own = format!("{}:{{entityId}}", ty);
        let nested = format!("{}:{{entityId}}:*", ty);
        for op in operations {
            rules.push(InvalidationRule::new(ty.as_str(), op, &[&own, &nested], 2));
        }
    }

    for op in [TaskOperation::Update, TaskOperation::Delete] {
        rules.push(InvalidationRule::new(
            EntityType::Workspace.as_str(),
            op,
            &["workspace:{entityId}", "workspace:{entityId}:*"],
            3,
        ));
    }

    rules
}
