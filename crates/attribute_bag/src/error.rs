use attribute_reactive::LayerOverflow;
use attribute_types::{FieldId, ParseFieldTypeError, WireError};

use crate::entity::EntityHandle;

/// Result type alias
pub type Result<T> = std::result::Result<T, BagError>;

/// Errors raised by bags, schemas and schema config loading.
#[derive(Debug, thiserror::Error)]
pub enum BagError {
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Field already exists: {0}")]
    DuplicateField(String),

    #[error("Field index {index} out of bounds for {count} fields")]
    IndexOutOfBounds { index: usize, count: usize },

    #[error("Type mismatch on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Bit set of length {bits} does not match a schema of {fields} fields")]
    SchemaMismatch { bits: usize, fields: usize },

    #[error("No storage for entity {0}")]
    MissingStorage(EntityHandle),

    #[error("Bag storage has been dropped")]
    Detached,

    #[error("Field id {0} is used twice")]
    DuplicateFieldId(FieldId),

    #[error("Schema already registered: {0}")]
    DuplicateSchema(String),

    #[error("Schema not registered: {0}")]
    UnknownSchema(String),

    #[error("Failed to parse schema config: {0}")]
    Parse(String),

    #[error("Invalid field type: {0}")]
    InvalidFieldType(#[from] ParseFieldTypeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Too many fields to observe: {0}")]
    TooManyLayers(#[from] LayerOverflow),
}
