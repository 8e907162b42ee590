//! The relationship catalog - immutable input data for graph construction.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use super::RelationDef;
use crate::error::Error;

/// An immutable collection of relationship definitions.
///
/// The catalog is validated once at construction and never mutated
/// afterward. It is the sole input to
/// [`RelationshipGraph::build`](crate::graph::RelationshipGraph::build).
#[derive(Debug, Clone, PartialEq)]
pub struct RelationCatalog {
    relations: Vec<RelationDef>,
    by_id: HashMap<String, usize>,
}

impl RelationCatalog {
    /// Build a catalog from relationship definitions.
    ///
    /// Fails if any id occurs twice or a definition has empty entity names
    /// or field lists.
    pub fn new(relations: Vec<RelationDef>) -> Result<Self, Error> {
        let mut by_id = HashMap::with_capacity(relations.len());
        for (index, rel) in relations.iter().enumerate() {
            validate_definition(rel)?;
            if by_id.insert(rel.id.clone(), index).is_some() {
                return Err(Error::DuplicateRelation(rel.id.clone()));
            }
        }
        Ok(Self { relations, by_id })
    }

    /// Load a catalog from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parse a catalog from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let relations: Vec<RelationDef> = serde_json::from_str(json)?;
        Self::new(relations)
    }

    /// Get a relationship by id.
    pub fn get(&self, id: &str) -> Option<&RelationDef> {
        self.by_id.get(id).map(|&i| &self.relations[i])
    }

    /// All relationships where the entity is the source.
    pub fn relations_from(&self, entity: &str) -> Vec<&RelationDef> {
        self.relations
            .iter()
            .filter(|r| r.source_entity == entity)
            .collect()
    }

    /// All relationships where the entity is the target.
    pub fn relations_to(&self, entity: &str) -> Vec<&RelationDef> {
        self.relations
            .iter()
            .filter(|r| r.target_entity == entity)
            .collect()
    }

    /// All distinct entity names mentioned by the catalog, sorted.
    pub fn entity_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for rel in &self.relations {
            names.insert(rel.source_entity.clone());
            names.insert(rel.target_entity.clone());
        }
        names.into_iter().collect()
    }

    /// Iterate over all relationship definitions.
    pub fn iter(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.iter()
    }

    /// Number of relationship definitions.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

fn validate_definition(rel: &RelationDef) -> Result<(), Error> {
    if rel.id.is_empty() {
        return Err(Error::InvalidDefinition {
            id: rel.name.clone(),
            reason: "empty relationship id".to_string(),
        });
    }
    if rel.source_entity.is_empty() || rel.target_entity.is_empty() {
        return Err(Error::InvalidDefinition {
            id: rel.id.clone(),
            reason: "empty entity name".to_string(),
        });
    }
    if rel.source_fields.is_empty() || rel.target_fields.is_empty() {
        return Err(Error::InvalidDefinition {
            id: rel.id.clone(),
            reason: "empty field list".to_string(),
        });
    }
    Ok(())
}
