//! Relationship metadata recorded while models are wired

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Kind of association between two models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    HasOne,
    HasMany,
    BelongsTo,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            RelationshipKind::HasOne => "hasOne",
            RelationshipKind::HasMany => "hasMany",
            RelationshipKind::BelongsTo => "belongsTo",
        };
        f.write_str(kind)
    }
}

/// One recorded association
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    /// Name the association is known by on the source model
    pub name: String,
    pub kind: RelationshipKind,
    pub source_model: String,
    pub target_model: String,
    /// Column holding the key; lives on the target for `HasOne`/`HasMany`
    /// and on the source for `BelongsTo`
    pub foreign_key: String,
}

impl RelationshipMetadata {
    fn validate(&self) -> ModelResult<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::Relationship(format!(
                "{} relationship on '{}' needs a name",
                self.kind, self.source_model
            )));
        }
        if self.foreign_key.trim().is_empty() {
            return Err(ModelError::Relationship(format!(
                "Relationship '{}.{}' needs a foreign key",
                self.source_model, self.name
            )));
        }
        Ok(())
    }
}

/// Thread-safe store of relationship metadata shared by every model of one registry
#[derive(Debug, Clone, Default)]
pub struct RelationshipRegistry {
    /// Map of model name -> relationship name -> metadata
    relationships: Arc<DashMap<String, HashMap<String, RelationshipMetadata>>>,
}

impl RelationshipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a relationship; a name may only be used once per model
    pub fn register(&self, metadata: RelationshipMetadata) -> ModelResult<()> {
        metadata.validate()?;

        let mut model_relationships = self.relationships.entry(metadata.source_model.clone()).or_default();

        if model_relationships.contains_key(&metadata.name) {
            return Err(ModelError::Relationship(format!(
                "Relationship '{}.{}' is already defined",
                metadata.source_model, metadata.name
            )));
        }

        tracing::trace!(
            source = %metadata.source_model,
            target = %metadata.target_model,
            kind = %metadata.kind,
            "Registered relationship"
        );
        model_relationships.insert(metadata.name.clone(), metadata);
        Ok(())
    }

    /// Get relationship metadata by model and relationship name
    pub fn get(&self, model_name: &str, relationship_name: &str) -> Option<RelationshipMetadata> {
        self.relationships.get(model_name)?.get(relationship_name).cloned()
    }

    pub fn has_relationship(&self, model_name: &str, relationship_name: &str) -> bool {
        self.relationships
            .get(model_name)
            .map(|relationships| relationships.contains_key(relationship_name))
            .unwrap_or(false)
    }

    /// All relationships of a model, sorted by name
    pub fn for_model(&self, model_name: &str) -> Vec<RelationshipMetadata> {
        let mut relationships: Vec<_> = self
            .relationships
            .get(model_name)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default();
        relationships.sort_by(|a, b| a.name.cmp(&b.name));
        relationships
    }

    /// Relationships on any model that point at `target_model`
    pub fn referencing(&self, target_model: &str) -> Vec<RelationshipMetadata> {
        let mut results: Vec<_> = self
            .relationships
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|metadata| metadata.target_model == target_model)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        results.sort_by(|a, b| (&a.source_model, &a.name).cmp(&(&b.source_model, &b.name)));
        results
    }

    /// Total number of recorded relationships
    pub fn len(&self) -> usize {
        self.relationships.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
