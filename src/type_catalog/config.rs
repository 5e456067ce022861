//! YAML schema description the type registry is loaded from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Primitive,
    Complex,
    Resource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSchemaConfig {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub primitive_types: Vec<String>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeConfig {
    pub kind: TypeKind,
    #[serde(default)]
    pub base: Option<String>,
    /// Keys ending in `[x]` declare polymorphic fields.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
    /// Variant types of a polymorphic field, in resolution order.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub array: bool,
}

impl TypeSchemaConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_polymorphic_field() {
        let yaml = r#"
name: tiny
primitive_types: [string, decimal]
types:
  Quantity:
    kind: complex
    fields:
      value: { type: decimal }
  Observation:
    kind: resource
    fields:
      value[x]: { types: [Quantity, string] }
"#;
        let config = TypeSchemaConfig::from_yaml_str(yaml).unwrap();
        let observation = &config.types["Observation"];
        assert_eq!(observation.kind, TypeKind::Resource);
        assert_eq!(observation.fields["value[x]"].types, vec!["Quantity", "string"]);
        assert!(!observation.fields["value[x]"].array);
    }
}
