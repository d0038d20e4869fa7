//! Primitive identifiers shared across the engine.

/// Document identifier. Ids within one posting list strictly increase.
pub type DocId = u32;

/// Identifier of a document collection feeding the index.
pub type CollectionId = u32;

/// Dense per-index field identifier.
pub type FieldId = u32;

/// Position of a token inside a field.
pub type Position = u32;
