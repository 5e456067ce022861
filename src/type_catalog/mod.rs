//! Type registry: static knowledge of the document schema.
//!
//! Answers which fields are primitive, complex or polymorphic, which are
//! arrays, and which FHIR types belong to the FHIRPath type families. It
//! knows nothing about SQL.

pub mod config;
pub mod errors;
pub mod type_family;
pub mod type_registry;

pub use config::{TypeKind, TypeSchemaConfig};
pub use errors::TypeCatalogError;
pub use type_family::TypeFamily;
pub use type_registry::{
    FieldDefinition, FieldKind, MemberResolution, PolymorphicVariant, TypeDefinition,
    TypeRegistry, TypeTarget,
};
