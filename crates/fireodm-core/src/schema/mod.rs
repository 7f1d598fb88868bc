//! Model schemas and the schema registry.

pub mod field;
pub mod file;
pub mod model;
pub mod registry;
pub mod rule;

pub use field::{Capability, Cardinality, FieldDescriptor, FieldKind, RelationDescriptor};
pub use file::{load_registry, SchemaFile};
pub use model::{ModelBuilder, ModelDescriptor};
pub use registry::SchemaRegistry;
pub use rule::{CustomRule, ModelRule, Rule};
