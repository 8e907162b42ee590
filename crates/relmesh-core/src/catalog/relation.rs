//! Relationship definitions between entities.

use serde::{Deserialize, Serialize};

/// Shape of a relationship between two entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// One-to-one relationship (unique foreign key).
    OneToOne,
    /// One-to-many relationship (foreign key on the many side).
    OneToMany,
    /// Many-to-one relationship (foreign key on the source side).
    ManyToOne,
    /// Many-to-many relationship.
    ManyToMany,
    /// Relationship between records of the same entity.
    SelfReferencing,
    /// Parent/child tree relationship.
    Hierarchical,
    /// Target entity varies per record.
    Polymorphic,
}

/// Behavior applied to dependent records when the referenced record changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeAction {
    /// Propagate the operation to related records.
    Cascade,
    /// Set the referencing fields to null.
    SetNull,
    /// Refuse the operation while references exist.
    Restrict,
    /// Do nothing.
    NoAction,
    /// Reset the referencing fields to their default value.
    SetDefault,
}

/// How related records are materialized when the owning record is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStrategy {
    /// Always fetched together with the owner.
    Eager,
    /// Fetched on first access.
    Lazy,
    /// Fetched when explicitly selected.
    Selective,
    /// Fetched ahead of expected access.
    Prefetch,
    /// Fetched only on demand, never cached ahead.
    OnDemand,
}

/// How often a relationship is expected to be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryFrequency {
    Low,
    Medium,
    High,
}

/// Per-operation cascade behavior for a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeRules {
    /// Behavior when the source record is created with related payloads.
    pub on_create: CascadeAction,
    /// Behavior when the source record is updated.
    pub on_update: CascadeAction,
    /// Behavior when the source record is deleted.
    pub on_delete: CascadeAction,
}

impl Default for CascadeRules {
    fn default() -> Self {
        Self {
            on_create: CascadeAction::NoAction,
            on_update: CascadeAction::NoAction,
            on_delete: CascadeAction::Restrict,
        }
    }
}

/// Optional planner hints attached to a relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationMetadata {
    /// The referencing fields are backed by an index.
    pub indexed: bool,
    /// Expected number of related records per source record.
    pub expected_cardinality: Option<u64>,
    /// Expected query frequency.
    pub query_frequency: Option<QueryFrequency>,
}

impl RelationMetadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the referencing fields as indexed.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Set the expected per-record cardinality.
    pub fn with_cardinality(mut self, cardinality: u64) -> Self {
        self.expected_cardinality = Some(cardinality);
        self
    }

    /// Set the expected query frequency.
    pub fn with_frequency(mut self, frequency: QueryFrequency) -> Self {
        self.query_frequency = Some(frequency);
        self
    }
}

/// A typed, directed relationship definition between two entity kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Identifier, unique across the catalog.
    pub id: String,
    /// Human-readable relationship name.
    pub name: String,
    /// Name of the inverse relationship, if one is declared.
    pub inverse_name: Option<String>,
    /// Source entity name.
    pub source_entity: String,
    /// Target entity name.
    pub target_entity: String,
    /// Relationship kind.
    pub kind: RelationKind,
    /// Referenced fields on the source entity (usually the identity).
    pub source_fields: Vec<String>,
    /// Referencing (foreign-key) fields on the target entity.
    pub target_fields: Vec<String>,
    /// Related records must exist for the source record to be valid.
    pub required: bool,
    /// Per-operation cascade behavior.
    pub cascade: CascadeRules,
    /// Default loading strategy.
    pub load_strategy: LoadStrategy,
    /// Optional planner hints.
    pub metadata: Option<RelationMetadata>,
}

impl RelationDef {
    /// Create a relationship definition of an arbitrary kind.
    ///
    /// Source fields default to `["id"]`; the referencing field on the
    /// target defaults to the lowercased source entity name suffixed with
    /// `_id` and can be overridden with [`RelationDef::with_target_fields`].
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: RelationKind,
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
    ) -> Self {
        let source_entity = source_entity.into();
        let default_fk = format!("{}_id", source_entity.to_lowercase());
        Self {
            id: id.into(),
            name: name.into(),
            inverse_name: None,
            source_entity,
            target_entity: target_entity.into(),
            kind,
            source_fields: vec!["id".to_string()],
            target_fields: vec![default_fk],
            required: false,
            cascade: CascadeRules::default(),
            load_strategy: LoadStrategy::Lazy,
            metadata: None,
        }
    }

    /// Create a one-to-one relationship.
    pub fn one_to_one(
        id: impl Into<String>,
        name: impl Into<String>,
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self::new(id, name, RelationKind::OneToOne, source_entity, target_entity)
            .with_target_fields(vec![target_field.into()])
    }

    /// Create a one-to-many relationship.
    pub fn one_to_many(
        id: impl Into<String>,
        name: impl Into<String>,
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self::new(id, name, RelationKind::OneToMany, source_entity, target_entity)
            .with_target_fields(vec![target_field.into()])
    }

    /// Create a many-to-many relationship.
    pub fn many_to_many(
        id: impl Into<String>,
        name: impl Into<String>,
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        Self::new(id, name, RelationKind::ManyToMany, source_entity, target_entity)
            .with_target_fields(vec![target_field.into()])
    }

    /// Create a self-referencing relationship on a single entity.
    pub fn self_referencing(
        id: impl Into<String>,
        name: impl Into<String>,
        entity: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        let entity = entity.into();
        Self::new(id, name, RelationKind::SelfReferencing, entity.clone(), entity)
            .with_target_fields(vec![target_field.into()])
    }

    /// Set the referenced fields on the source entity.
    pub fn with_source_fields(mut self, fields: Vec<String>) -> Self {
        self.source_fields = fields;
        self
    }

    /// Set the referencing fields on the target entity.
    pub fn with_target_fields(mut self, fields: Vec<String>) -> Self {
        self.target_fields = fields;
        self
    }

    /// Declare the inverse relationship name.
    pub fn with_inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse_name = Some(name.into());
        self
    }

    /// Mark the relationship as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set create cascade behavior.
    pub fn with_on_create(mut self, action: CascadeAction) -> Self {
        self.cascade.on_create = action;
        self
    }

    /// Set update cascade behavior.
    pub fn with_on_update(mut self, action: CascadeAction) -> Self {
        self.cascade.on_update = action;
        self
    }

    /// Set delete cascade behavior.
    pub fn with_on_delete(mut self, action: CascadeAction) -> Self {
        self.cascade.on_delete = action;
        self
    }

    /// Set the loading strategy.
    pub fn with_load_strategy(mut self, strategy: LoadStrategy) -> Self {
        self.load_strategy = strategy;
        self
    }

    /// Attach planner metadata.
    pub fn with_metadata(mut self, metadata: RelationMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check if this is a many-to-many relationship.
    pub fn is_many_to_many(&self) -> bool {
        self.kind == RelationKind::ManyToMany
    }

    /// Check if both endpoints are the same entity.
    pub fn is_self_referencing(&self) -> bool {
        self.source_entity == self.target_entity
    }

    /// The first referencing field on the target entity.
    ///
    /// Cascade execution stamps the parent id into this field; multi-field
    /// references use [`RelationDef::target_fields`] directly.
    pub fn primary_target_field(&self) -> Option<&str> {
        self.target_fields.first().map(|s| s.as_str())
    }

    /// The first referenced field on the source entity.
    pub fn primary_source_field(&self) -> Option<&str> {
        self.source_fields.first().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_to_many_relation() {
        let rel = RelationDef::one_to_many("r1", "contacts", "Company", "Contact", "company_id")
            .with_on_delete(CascadeAction::Cascade);

        assert_eq!(rel.kind, RelationKind::OneToMany);
        assert_eq!(rel.source_entity, "Company");
        assert_eq!(rel.target_entity, "Contact");
        assert_eq!(rel.cascade.on_delete, CascadeAction::Cascade);
        assert_eq!(rel.primary_target_field(), Some("company_id"));
    }

    #[test]
    fn test_default_cascade_rules() {
        let rel = RelationDef::one_to_one("r1", "profile", "User", "Profile", "user_id");

        assert_eq!(rel.cascade.on_create, CascadeAction::NoAction);
        assert_eq!(rel.cascade.on_update, CascadeAction::NoAction);
        assert_eq!(rel.cascade.on_delete, CascadeAction::Restrict);
    }

    #[test]
    fn test_self_referencing_relation() {
        let rel = RelationDef::self_referencing("r1", "manager", "Employee", "manager_id");

        assert!(rel.is_self_referencing());
        assert_eq!(rel.source_entity, rel.target_entity);
        assert_eq!(rel.kind, RelationKind::SelfReferencing);
    }

    #[test]
    fn test_default_foreign_key_field() {
        let rel = RelationDef::new("r1", "orders", RelationKind::OneToMany, "Customer", "Order");

        assert_eq!(rel.primary_target_field(), Some("customer_id"));
        assert_eq!(rel.primary_source_field(), Some("id"));
    }

    #[test]
    fn test_metadata_builder() {
        let rel = RelationDef::many_to_many("r1", "tags", "Deal", "Tag", "deal_id")
            .with_metadata(
                RelationMetadata::new()
                    .indexed()
                    .with_cardinality(25)
                    .with_frequency(QueryFrequency::High),
            );

        let meta = rel.metadata.expect("metadata set");
        assert!(meta.indexed);
        assert_eq!(meta.expected_cardinality, Some(25));
        assert_eq!(meta.query_frequency, Some(QueryFrequency::High));
    }

    #[test]
    fn test_required_and_inverse() {
        let rel = RelationDef::one_to_many("r1", "tickets", "Company", "Ticket", "company_id")
            .required()
            .with_inverse("company");

        assert!(rel.required);
        assert_eq!(rel.inverse_name.as_deref(), Some("company"));
    }
}
