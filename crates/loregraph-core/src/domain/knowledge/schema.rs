//! Schema registry for lore entities
//!
//! Every [`EntityType`] maps to a static [`EntitySchema`] through an
//! exhaustive match, so adding a type without a schema fails to compile.
//! Validation is pure: no state, no I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::{EntityType, Properties};

/// A single schema problem on one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub field: String,
    pub issue: String,
}

impl SchemaViolation {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            issue: issue.into(),
        }
    }

    /// Prefix the field with an entity identifier, e.g. `location:ruby_mines.region`
    pub fn qualified(self, entity_id: &str) -> Self {
        Self {
            field: format!("{}.{}", entity_id, self.field),
            issue: self.issue,
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.issue)
    }
}

/// Structural expectation for a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer { min: i64, max: i64 },
    TextList,
    OneOf(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

/// Field definitions for one entity type
#[derive(Debug)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub fields: &'static [FieldSpec],
}

impl EntitySchema {
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|f| f.required).map(|f| f.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

const STRATEGIC_VALUE: FieldKind = FieldKind::Integer { min: 0, max: 100 };

static FACTION_SCHEMA: EntitySchema = EntitySchema {
    entity_type: EntityType::Faction,
    fields: &[
        required("name", FieldKind::Text),
        required("description", FieldKind::Text),
        optional("leader_name", FieldKind::Text),
        optional("ideology", FieldKind::Text),
        optional("headquarters", FieldKind::Text),
        optional("strategic_value", STRATEGIC_VALUE),
    ],
};

static CHARACTER_SCHEMA: EntitySchema = EntitySchema {
    entity_type: EntityType::Character,
    fields: &[
        required("name", FieldKind::Text),
        required("description", FieldKind::Text),
        optional("faction", FieldKind::Text),
        optional("role", FieldKind::Text),
        optional("status", FieldKind::OneOf(&["alive", "dead", "missing", "unknown"])),
        optional("age", FieldKind::Integer { min: 0, max: 100_000 }),
    ],
};

static LOCATION_SCHEMA: EntitySchema = EntitySchema {
    entity_type: EntityType::Location,
    fields: &[
        required("name", FieldKind::Text),
        required("description", FieldKind::Text),
        optional("region", FieldKind::Text),
        optional("controlling_faction", FieldKind::Text),
        optional("strategic_value", STRATEGIC_VALUE),
    ],
};

static RESOURCE_SCHEMA: EntitySchema = EntitySchema {
    entity_type: EntityType::Resource,
    fields: &[
        required("name", FieldKind::Text),
        required("description", FieldKind::Text),
        optional("rarity", FieldKind::OneOf(&["common", "uncommon", "rare", "legendary"])),
        optional("location", FieldKind::Text),
        optional("strategic_value", STRATEGIC_VALUE),
    ],
};

static EVENT_SCHEMA: EntitySchema = EntitySchema {
    entity_type: EntityType::Event,
    fields: &[
        required("name", FieldKind::Text),
        required("description", FieldKind::Text),
        optional("date", FieldKind::Text),
        optional("location", FieldKind::Text),
        optional("participants", FieldKind::TextList),
    ],
};

/// Look up the schema for an entity type
pub fn schema_for(entity_type: EntityType) -> &'static EntitySchema {
    match entity_type {
        EntityType::Faction => &FACTION_SCHEMA,
        EntityType::Character => &CHARACTER_SCHEMA,
        EntityType::Location => &LOCATION_SCHEMA,
        EntityType::Resource => &RESOURCE_SCHEMA,
        EntityType::Event => &EVENT_SCHEMA,
    }
}

/// Stateless registry of entity schemas
///
/// Fields not declared in a schema are allowed and not checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRegistry;

impl SchemaRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn schema(&self, entity_type: EntityType) -> &'static EntitySchema {
        schema_for(entity_type)
    }

    /// Validate properties against the schema for `entity_type`
    ///
    /// Returns one violation per offending field, in schema declaration order.
    pub fn validate(&self, entity_type: EntityType, properties: &Properties) -> Vec<SchemaViolation> {
        let schema = schema_for(entity_type);
        let mut violations = Vec::new();

        for spec in schema.fields {
            match properties.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(SchemaViolation::new(spec.name, "required field is missing"));
                    }
                }
                Some(value) => {
                    if let Some(issue) = check_kind(spec, value) {
                        violations.push(SchemaViolation::new(spec.name, issue));
                    }
                }
            }
        }

        violations
    }
}

fn check_kind(spec: &FieldSpec, value: &Value) -> Option<String> {
    match spec.kind {
        FieldKind::Text => match value.as_str() {
            None => Some("expected a string".to_string()),
            Some(s) if spec.required && s.trim().is_empty() => {
                Some("required field is empty".to_string())
            }
            Some(_) => None,
        },
        FieldKind::Integer { min, max } => match value.as_i64() {
            None => Some("expected an integer".to_string()),
            Some(n) if n < min || n > max => {
                Some(format!("value {} is outside the range {}-{}", n, min, max))
            }
            Some(_) => None,
        },
        FieldKind::TextList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => None,
            _ => Some("expected a list of strings".to_string()),
        },
        FieldKind::OneOf(options) => match value.as_str() {
            Some(s) if options.contains(&s.trim().to_lowercase().as_str()) => None,
            _ => Some(format!("expected one of: {}", options.join(", "))),
        },
    }
}
