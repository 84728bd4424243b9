//! Model handles produced by the default model factory

use std::sync::Arc;

use super::entity::{Entity, FieldDefinition};
use super::relationships::{RelationshipKind, RelationshipMetadata, RelationshipRegistry};
use crate::error::ModelResult;

/// Shared, immutable model handle
pub type ModelHandle = Arc<Model>;

/// A constructed model: name, table and columns.
///
/// The table name is the entity name unchanged (never pluralised).
/// Associations are recorded in the registry-wide [`RelationshipRegistry`],
/// so the handle itself never changes after construction.
#[derive(Debug)]
pub struct Model {
    name: String,
    table_name: String,
    fields: Vec<FieldDefinition>,
    relationships: RelationshipRegistry,
}

impl Model {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>, relationships: RelationshipRegistry) -> Self {
        let name = name.into();
        Self {
            table_name: name.clone(),
            name,
            fields,
            relationships,
        }
    }

    /// Build a handle from an entity descriptor
    pub fn from_entity<M>(entity: &dyn Entity<M>, relationships: RelationshipRegistry) -> ModelHandle {
        Arc::new(Self::new(entity.name(), entity.fields(), relationships))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Primary key column, if one is declared
    pub fn primary_key(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|field| field.primary_key)
    }

    pub fn has_one(&self, target: &Model, foreign_key: impl Into<String>) -> ModelResult<()> {
        self.associate(RelationshipKind::HasOne, target.name(), target, foreign_key)
    }

    pub fn has_many(&self, target: &Model, foreign_key: impl Into<String>) -> ModelResult<()> {
        self.associate(RelationshipKind::HasMany, target.name(), target, foreign_key)
    }

    pub fn belongs_to(&self, target: &Model, foreign_key: impl Into<String>) -> ModelResult<()> {
        self.associate(RelationshipKind::BelongsTo, target.name(), target, foreign_key)
    }

    /// Record an association under an explicit name
    pub fn associate(
        &self,
        kind: RelationshipKind,
        name: impl Into<String>,
        target: &Model,
        foreign_key: impl Into<String>,
    ) -> ModelResult<()> {
        self.relationships.register(RelationshipMetadata {
            name: name.into(),
            kind,
            source_model: self.name.clone(),
            target_model: target.name.clone(),
            foreign_key: foreign_key.into(),
        })
    }

    /// Associations recorded on this model
    pub fn relationships(&self) -> Vec<RelationshipMetadata> {
        self.relationships.for_model(&self.name)
    }

    pub fn relationship(&self, name: &str) -> Option<RelationshipMetadata> {
        self.relationships.get(&self.name, name)
    }
}
