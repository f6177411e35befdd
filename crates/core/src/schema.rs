//! Collection schemas and field validation
//!
//! A schema declares, per collection:
//! - the type of every field a document may carry (`FieldType` table)
//! - the subset of fields that must be present
//! - the subset of fields the storage layer keeps a secondary index for
//!
//! Validation is a pure check against that table. There is no coercion: an
//! `Int` never satisfies a `Float` field and `Null` satisfies nothing. To
//! clear an optional field, remove it.

use crate::error::{Error, Result};
use crate::types::{Fields, ID_FIELD};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error as ThisError;

/// Declared type of a document field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// Int or Float
    Number,
    /// Boolean
    Bool,
    /// Raw bytes
    Bytes,
    /// Array of any values
    Array,
    /// Nested object
    Object,
    /// Any non-null value
    Any,
}

impl FieldType {
    /// Check whether a value satisfies this type
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (FieldType::Any, _) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            (FieldType::Number, Value::Int(_) | Value::Float(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Bytes, Value::Bytes(_)) => true,
            (FieldType::Array, Value::Array(_)) => true,
            (FieldType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Whether values of this type can back a secondary index
    pub fn is_indexable(&self) -> bool {
        !matches!(self, FieldType::Array | FieldType::Object | FieldType::Any)
    }

    /// Lowercase type name
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Bytes => "bytes",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a set of fields was rejected by a schema
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum SchemaViolation {
    /// A required field is absent
    #[error("missing required field '{field}'")]
    MissingField {
        /// Field name
        field: String,
    },

    /// A field is not declared by the schema
    #[error("unknown field '{field}'")]
    UnknownField {
        /// Field name
        field: String,
    },

    /// A field value has the wrong type
    #[error("field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Declared type
        expected: FieldType,
        /// Type name of the offending value
        found: &'static str,
    },
}

/// Schema of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    name: String,
    version: u32,
    field_types: BTreeMap<String, FieldType>,
    required: BTreeSet<String>,
    indexed: BTreeSet<String>,
}

impl CollectionSchema {
    /// Start declaring a schema for `name`
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            version: 0,
            field_types: BTreeMap::new(),
            required: BTreeSet::new(),
            indexed: BTreeSet::new(),
        }
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema version
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Declared type of a field
    pub fn field_type(&self, field: &str) -> Option<FieldType> {
        self.field_types.get(field).copied()
    }

    /// All declared fields and their types
    pub fn field_types(&self) -> &BTreeMap<String, FieldType> {
        &self.field_types
    }

    /// Required fields
    pub fn required_fields(&self) -> &BTreeSet<String> {
        &self.required
    }

    /// Indexed fields
    pub fn indexed_fields(&self) -> &BTreeSet<String> {
        &self.indexed
    }

    /// Check that `fields` form a valid document of this collection
    ///
    /// Reports the first problem found: undeclared or mistyped fields (in field
    /// name order) before missing required fields.
    pub fn validate(&self, fields: &Fields) -> std::result::Result<(), SchemaViolation> {
        for (field, value) in fields {
            let Some(expected) = self.field_types.get(field) else {
                return Err(SchemaViolation::UnknownField {
                    field: field.clone(),
                });
            };
            if !expected.matches(value) {
                return Err(SchemaViolation::TypeMismatch {
                    field: field.clone(),
                    expected: *expected,
                    found: value.type_name(),
                });
            }
        }

        if let Some(missing) = self.required.iter().find(|f| !fields.contains_key(*f)) {
            return Err(SchemaViolation::MissingField {
                field: missing.clone(),
            });
        }

        Ok(())
    }
}

/// Builder for [`CollectionSchema`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    version: u32,
    field_types: BTreeMap<String, FieldType>,
    required: BTreeSet<String>,
    indexed: BTreeSet<String>,
}

impl SchemaBuilder {
    /// Set the schema version
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Declare a required field
    pub fn required(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        let field = field.into();
        self.required.insert(field.clone());
        self.field_types.insert(field, ty);
        self
    }

    /// Declare an optional field
    pub fn optional(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        self.field_types.insert(field.into(), ty);
        self
    }

    /// Request a secondary index on a declared field
    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexed.insert(field.into());
        self
    }

    /// Finish the declaration
    ///
    /// # Errors
    ///
    /// `InvalidSchema` if the name is empty, a field is named `id`, or an
    /// indexed field is undeclared or not indexable.
    pub fn build(self) -> Result<CollectionSchema> {
        let invalid = |reason: String| Error::InvalidSchema {
            collection: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("collection name must not be empty".to_string()));
        }
        if self.field_types.contains_key(ID_FIELD) {
            return Err(invalid(format!(
                "'{}' is the primary key and cannot be declared as a field",
                ID_FIELD
            )));
        }
        for field in &self.indexed {
            match self.field_types.get(field) {
                None => return Err(invalid(format!("indexed field '{}' is not declared", field))),
                Some(ty) if !ty.is_indexable() => {
                    return Err(invalid(format!(
                        "indexed field '{}' has non-indexable type {}",
                        field, ty
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(CollectionSchema {
            name: self.name,
            version: self.version,
            field_types: self.field_types,
            required: self.required,
            indexed: self.indexed,
        })
    }
}
