//! Entity descriptors consumed by the model registry

use serde::{Deserialize, Serialize};

use super::model::ModelHandle;
use super::ModelRegistry;
use crate::error::ModelResult;

/// Descriptor for one data model.
///
/// `M` is the handle type the registry stores; the runtime uses
/// [`ModelHandle`]. Implementations must be self-sufficient in
/// [`Entity::relationships`]: wiring order between entities is unspecified.
pub trait Entity<M = ModelHandle>: Send + Sync {
    /// Canonical name, unique across one registry build
    fn name(&self) -> &str;

    /// Old names that still resolve to this entity
    fn deprecated_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Column definitions
    fn fields(&self) -> Vec<FieldDefinition> {
        Vec::new()
    }

    /// Wire relationships against the fully populated registry.
    /// Called exactly once per build, after every handle exists.
    fn relationships(&self, _model: &M, _models: &ModelRegistry<M>) -> ModelResult<()> {
        Ok(())
    }
}

/// Column type of a model field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    BigInteger,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Boolean,
    String(u32),
    Text,
    Date,
    DateTime,
    Json,
    Blob,
    Enum(Vec<String>),
}

/// One column of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
        }
    }

    /// Auto-incrementing integer primary key
    pub fn id(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer).primary_key().auto_increment()
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}
