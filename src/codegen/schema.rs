//! Schema descriptors
//!
//! The structural description of each persistable type handed to the
//! storage engine. Built from a `TypePlan`; never reads the module directly.

use serde::{Deserialize, Serialize};

use super::TypePlan;
use crate::graph::{StorageCategory, Variant};

/// One persisted property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Property name in the model
    pub name: String,
    /// Column name in storage
    pub mapped_name: String,
    #[serde(flatten)]
    pub category: StorageCategory,
    pub is_primary_key: bool,
    pub is_indexed: bool,
    pub is_nullable: bool,
}

/// Schema of one persistable type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub type_name: String,
    /// Table name in storage
    pub mapped_name: String,
    pub variant: Variant,
    /// Excluded from the default schema set
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub explicit: bool,
    pub fields: Vec<SchemaField>,
}

impl SchemaDescriptor {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key(&self) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.is_primary_key)
    }
}

pub struct SchemaBuilder;

impl SchemaBuilder {
    pub fn build(plan: &TypePlan) -> SchemaDescriptor {
        SchemaDescriptor {
            type_name: plan.type_name.clone(),
            mapped_name: plan.mapped_name.clone(),
            variant: plan.variant,
            explicit: plan.explicit,
            fields: plan
                .properties
                .iter()
                .map(|p| SchemaField {
                    name: p.name.clone(),
                    mapped_name: p.column.clone(),
                    category: p.category.clone(),
                    is_primary_key: p.is_primary_key,
                    is_indexed: p.is_indexed,
                    is_nullable: p.nullable,
                })
                .collect(),
        }
    }
}
