//! Schema registry
//!
//! Holds the declared schema of every collection and validates field sets
//! against them. Registration is idempotent for an identical schema and
//! rejected for a conflicting one, so a second open path in the same process
//! cannot silently change a collection's shape.

use dashmap::DashMap;
use kipu_core::error::{Error, Result};
use kipu_core::{CollectionSchema, Fields};
use std::sync::Arc;
use tracing::info;

/// Registered collection schemas by name
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<CollectionSchema>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema`
    ///
    /// Returns the registered schema. Registering an identical schema again
    /// returns the existing one; a different schema under the same name is
    /// `SchemaConflict`.
    pub fn register(&self, schema: CollectionSchema) -> Result<Arc<CollectionSchema>> {
        let entry = self
            .schemas
            .entry(schema.name().to_string())
            .or_insert_with(|| {
                info!(
                    target: "kipu::db",
                    collection = schema.name(),
                    version = schema.version(),
                    fields = schema.field_types().len(),
                    "Collection registered"
                );
                Arc::new(schema.clone())
            });
        if **entry.value() != schema {
            return Err(Error::SchemaConflict(schema.name().to_string()));
        }
        Ok(Arc::clone(entry.value()))
    }

    /// Schema of `collection`
    pub fn get(&self, collection: &str) -> Result<Arc<CollectionSchema>> {
        self.schemas
            .get(collection)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::UnknownCollection(collection.to_string()))
    }

    /// Check if `collection` is registered
    pub fn contains(&self, collection: &str) -> bool {
        self.schemas.contains_key(collection)
    }

    /// Registered collection names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Validate `fields` against the schema of `collection`
    ///
    /// Required fields present, no undeclared fields, field types match.
    pub fn validate(&self, collection: &str, fields: &Fields) -> Result<()> {
        self.get(collection)?
            .validate(fields)
            .map_err(|violation| Error::schema(collection, violation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kipu_core::{FieldType, SchemaViolation, Value};

    fn notes() -> CollectionSchema {
        CollectionSchema::builder("notes")
            .required("title", FieldType::String)
            .optional("stars", FieldType::Int)
            .index("stars")
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SchemaRegistry::new();
        let first = registry.register(notes()).unwrap();
        let second = registry.register(notes()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.names(), vec!["notes".to_string()]);
    }

    #[test]
    fn test_conflicting_registration_rejected() {
        let registry = SchemaRegistry::new();
        registry.register(notes()).unwrap();
        let other = CollectionSchema::builder("notes")
            .required("title", FieldType::Int)
            .build()
            .unwrap();
        assert!(matches!(
            registry.register(other),
            Err(Error::SchemaConflict(name)) if name == "notes"
        ));
        // Original stays in place
        assert_eq!(
            registry.get("notes").unwrap().field_type("title"),
            Some(FieldType::String)
        );
    }

    #[test]
    fn test_unknown_collection() {
        let registry = SchemaRegistry::new();
        assert!(matches!(
            registry.validate("ghosts", &Fields::new()),
            Err(Error::UnknownCollection(_))
        ));
        assert!(!registry.contains("ghosts"));
    }

    #[test]
    fn test_validate_reports_violation() {
        let registry = SchemaRegistry::new();
        registry.register(notes()).unwrap();

        let mut fields = Fields::new();
        fields.insert("stars".to_string(), Value::Int(3));
        match registry.validate("notes", &fields) {
            Err(Error::SchemaViolation {
                collection,
                violation: SchemaViolation::MissingField { field },
            }) => {
                assert_eq!(collection, "notes");
                assert_eq!(field, "title");
            }
            other => panic!("expected missing field, got {:?}", other),
        }

        fields.insert("title".to_string(), Value::from("hello"));
        registry.validate("notes", &fields).unwrap();
    }
}
