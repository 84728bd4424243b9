//! Model Registry
//!
//! Immutable map from canonical model names to handles. Deprecated aliases
//! still resolve, with a single warning per alias for the registry's
//! lifetime, but are never enumerated. The registry has no mutators: the
//! `try_*` methods exist only so misuse fails loudly.

pub mod entity;
pub mod model;
pub mod relationships;

pub use entity::{Entity, FieldDefinition, FieldType};
pub use model::{Model, ModelHandle};
pub use relationships::{RelationshipKind, RelationshipMetadata, RelationshipRegistry};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;

use crate::error::{ModelError, ModelResult};

/// Read view over the models of one registry build
pub struct ModelRegistry<M = ModelHandle> {
    /// Canonical name and handle, in input order
    models: Vec<(String, M)>,
    index: HashMap<String, usize>,
    /// Deprecated alias -> canonical name
    aliases: HashMap<String, String>,
    warned: DashSet<String>,
}

impl<M> ModelRegistry<M> {
    /// Build a registry.
    ///
    /// Names are checked for collisions before any handle is constructed,
    /// then `factory` runs once per entity in input order, and finally each
    /// entity wires its relationships against the complete registry.
    pub fn build<F>(entities: &[Arc<dyn Entity<M>>], mut factory: F) -> ModelResult<Self>
    where
        F: FnMut(&str, &dyn Entity<M>) -> ModelResult<M>,
    {
        let aliases = check_names(entities)?;

        let mut models = Vec::with_capacity(entities.len());
        let mut index = HashMap::with_capacity(entities.len());
        for entity in entities {
            let name = entity.name().to_string();
            let handle = factory(&name, entity.as_ref())?;
            index.insert(name.clone(), models.len());
            models.push((name, handle));
        }

        let registry = Self {
            models,
            index,
            aliases,
            warned: DashSet::new(),
        };

        for (entity, (_, handle)) in entities.iter().zip(registry.models.iter()) {
            entity.relationships(handle, &registry)?;
        }

        tracing::debug!(
            models = registry.models.len(),
            aliases = registry.aliases.len(),
            "Model registry built"
        );

        Ok(registry)
    }

    /// Resolve a name: canonical first, then deprecated alias
    pub fn get(&self, name: &str) -> Option<&M> {
        if let Some(&position) = self.index.get(name) {
            return Some(&self.models[position].1);
        }

        let canonical = self.aliases.get(name)?;
        self.warn_deprecated(name, canonical);
        self.index.get(canonical.as_str()).map(|&position| &self.models[position].1)
    }

    /// Whether a canonical name or alias resolves. Never warns.
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name) || self.aliases.contains_key(name)
    }

    /// Canonical names in input order; aliases are never listed
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.models.iter().map(|(name, _)| name.as_str())
    }

    /// Canonical names and handles in input order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &M)> + '_ {
        self.models.iter().map(|(name, handle)| (name.as_str(), handle))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Canonical name an alias points at
    pub fn canonical_name(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    /// Aliases that have already produced their deprecation warning
    pub fn warned_aliases(&self) -> Vec<String> {
        let mut warned: Vec<String> = self.warned.iter().map(|alias| alias.key().clone()).collect();
        warned.sort();
        warned
    }

    /// Always fails: models cannot be added or replaced after build
    pub fn try_insert(&self, name: &str, _model: M) -> ModelResult<()> {
        Err(ModelError::ImmutableRegistry(format!("cannot set '{}'", name)))
    }

    /// Always fails: models cannot be removed after build
    pub fn try_remove(&self, name: &str) -> ModelResult<M> {
        Err(ModelError::ImmutableRegistry(format!("cannot delete '{}'", name)))
    }

    fn warn_deprecated(&self, alias: &str, canonical: &str) {
        if self.warned.insert(alias.to_string()) {
            tracing::warn!(
                alias = %alias,
                canonical = %canonical,
                "Deprecated: db.{} has been replaced by db.{}",
                alias,
                canonical
            );
        }
    }
}

impl ModelRegistry<ModelHandle> {
    /// Build a registry of [`Model`] handles sharing one relationship store
    pub fn from_entities(entities: &[Arc<dyn Entity>]) -> ModelResult<Self> {
        let relationships = RelationshipRegistry::new();
        Self::build(entities, |_, entity| Ok(Model::from_entity(entity, relationships.clone())))
    }
}

impl<M> fmt::Debug for ModelRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.keys().collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .finish()
    }
}

/// Reject duplicate canonical names and aliases that collide with any name
/// or with another alias; returns the alias map
fn check_names<M>(entities: &[Arc<dyn Entity<M>>]) -> ModelResult<HashMap<String, String>> {
    let mut canonical = HashSet::with_capacity(entities.len());
    for entity in entities {
        if !canonical.insert(entity.name()) {
            return Err(ModelError::DuplicateName(entity.name().to_string()));
        }
    }

    let mut aliases = HashMap::new();
    for entity in entities {
        for alias in entity.deprecated_names() {
            if canonical.contains(alias.as_str()) || aliases.contains_key(&alias) {
                return Err(ModelError::DuplicateName(alias));
            }
            aliases.insert(alias, entity.name().to_string());
        }
    }

    Ok(aliases)
}
