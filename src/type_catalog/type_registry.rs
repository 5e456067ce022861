use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::config::{FieldConfig, TypeConfig, TypeKind, TypeSchemaConfig};
use super::errors::TypeCatalogError;
use super::type_family::TypeFamily;

const BUNDLED_FHIR_R4: &str = include_str!("../../schemas/fhir_r4_core.yaml");

#[derive(Debug, Clone, PartialEq)]
pub struct PolymorphicVariant {
    /// Physical JSON key, e.g. `valueQuantity`.
    pub field_name: String,
    pub type_name: String,
    pub is_primitive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Primitive(String),
    Complex(String),
    Polymorphic(Vec<PolymorphicVariant>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub is_array: bool,
}

#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub base: Option<String>,
    pub fields: HashMap<String, FieldDefinition>,
}

/// Outcome of looking a member name up on a type.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberResolution {
    Field {
        type_name: String,
        is_array: bool,
        is_primitive: bool,
    },
    Polymorphic {
        variants: Vec<PolymorphicVariant>,
        is_array: bool,
    },
    /// Type unknown, or member not declared on it.
    Unknown,
}

/// What a type specifier in `is`/`as`/`ofType` refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeTarget {
    /// A System type such as `System.Integer`, covering every member of the family.
    Family(TypeFamily),
    /// A single FHIR primitive such as `code`.
    Primitive { family: TypeFamily, name: String },
    Complex(String),
    Resource(String),
}

/// Read-only schema knowledge: fields, cardinality, polymorphic groups
/// and type families. Built once, then shared.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    name: String,
    version: Option<String>,
    primitives: HashSet<String>,
    types: HashMap<String, TypeDefinition>,
}

impl TypeRegistry {
    /// The FHIR R4 core subset bundled with the crate.
    pub fn fhir_r4() -> Result<Self, TypeCatalogError> {
        Self::from_yaml_str(BUNDLED_FHIR_R4)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, TypeCatalogError> {
        let config = TypeSchemaConfig::from_yaml_str(content)?;
        Self::from_config(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, TypeCatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| TypeCatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_config(config: TypeSchemaConfig) -> Result<Self, TypeCatalogError> {
        let primitives: HashSet<String> = config.primitive_types.iter().cloned().collect();
        let mut types = HashMap::new();

        for (type_name, type_config) in &config.types {
            if let Some(base) = &type_config.base {
                if !config.types.contains_key(base) {
                    return Err(TypeCatalogError::UnknownBase {
                        type_name: type_name.clone(),
                        base: base.clone(),
                    });
                }
            }
            let definition = build_type(type_name, type_config, &primitives, &config)?;
            types.insert(type_name.clone(), definition);
        }

        let registry = TypeRegistry {
            name: config.name,
            version: config.version,
            primitives,
            types,
        };
        registry.check_inheritance()?;

        log::debug!(
            "Loaded type registry '{}' ({} types, {} primitives)",
            registry.name,
            registry.types.len(),
            registry.primitives.len()
        );
        Ok(registry)
    }

    fn check_inheritance(&self) -> Result<(), TypeCatalogError> {
        for start in self.types.keys() {
            let mut seen = HashSet::new();
            let mut current = Some(start.as_str());
            while let Some(name) = current {
                if !seen.insert(name) {
                    return Err(TypeCatalogError::InheritanceCycle(start.clone()));
                }
                current = self.types.get(name).and_then(|t| t.base.as_deref());
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn is_primitive(&self, name: &str) -> bool {
        self.primitives.contains(name)
    }

    pub fn is_resource_type(&self, name: &str) -> bool {
        self.types
            .get(name)
            .is_some_and(|t| t.kind == TypeKind::Resource)
    }

    /// `type_name` itself or one of its ancestors is `ancestor`.
    pub fn is_subtype(&self, type_name: &str, ancestor: &str) -> bool {
        self.ancestry(type_name).any(|t| t.name == ancestor)
    }

    fn ancestry<'a>(&'a self, type_name: &str) -> impl Iterator<Item = &'a TypeDefinition> + 'a {
        let mut current = self.types.get(type_name);
        std::iter::from_fn(move || {
            let definition = current?;
            current = definition
                .base
                .as_deref()
                .and_then(|base| self.types.get(base));
            Some(definition)
        })
    }

    /// Resolve `member` on `type_name`, following inheritance. Physical
    /// variant names (`valueQuantity`) resolve to the variant's type.
    pub fn resolve_member(&self, type_name: Option<&str>, member: &str) -> MemberResolution {
        let Some(type_name) = type_name else {
            return MemberResolution::Unknown;
        };
        if let Some(resolution) = self.lookup_member(type_name, member) {
            return resolution;
        }
        if self.types.contains_key(type_name) {
            log::warn!("'{}' is not a declared member of {}", member, type_name);
        }
        MemberResolution::Unknown
    }

    /// Whether `member` is declared on `type_name` or one of its ancestors.
    pub fn has_member(&self, type_name: Option<&str>, member: &str) -> bool {
        type_name.is_some_and(|t| self.lookup_member(t, member).is_some())
    }

    fn lookup_member(&self, type_name: &str, member: &str) -> Option<MemberResolution> {
        for definition in self.ancestry(type_name) {
            if let Some(field) = definition.fields.get(member) {
                return Some(match &field.kind {
                    FieldKind::Primitive(t) => MemberResolution::Field {
                        type_name: t.clone(),
                        is_array: field.is_array,
                        is_primitive: true,
                    },
                    FieldKind::Complex(t) => MemberResolution::Field {
                        type_name: t.clone(),
                        is_array: field.is_array,
                        is_primitive: false,
                    },
                    FieldKind::Polymorphic(variants) => MemberResolution::Polymorphic {
                        variants: variants.clone(),
                        is_array: field.is_array,
                    },
                });
            }

            let variant = definition.fields.values().find_map(|field| match &field.kind {
                FieldKind::Polymorphic(variants) => variants
                    .iter()
                    .find(|v| v.field_name == member)
                    .map(|v| (v, field.is_array)),
                _ => None,
            });
            if let Some((variant, is_array)) = variant {
                return Some(MemberResolution::Field {
                    type_name: variant.type_name.clone(),
                    is_array,
                    is_primitive: variant.is_primitive,
                });
            }
        }
        None
    }

    /// Resolve a type specifier (`Quantity`, `FHIR.string`, `System.Integer`).
    pub fn resolve_type(&self, specifier: &str) -> Option<TypeTarget> {
        if let Some(system) = specifier.strip_prefix("System.") {
            return TypeFamily::from_system_name(system).map(TypeTarget::Family);
        }
        let name = specifier.strip_prefix("FHIR.").unwrap_or(specifier);

        if self.primitives.contains(name) {
            let family = TypeFamily::of_member(name).unwrap_or(TypeFamily::String);
            return Some(TypeTarget::Primitive {
                family,
                name: name.to_string(),
            });
        }
        if let Some(definition) = self.types.get(name) {
            return Some(match definition.kind {
                TypeKind::Resource => TypeTarget::Resource(name.to_string()),
                TypeKind::Complex | TypeKind::Primitive => TypeTarget::Complex(name.to_string()),
            });
        }
        TypeFamily::from_system_name(name).map(TypeTarget::Family)
    }

    /// Family of a declared type, if it belongs to one.
    pub fn family_of(&self, type_name: &str) -> Option<TypeFamily> {
        if let Some(family) = TypeFamily::of_member(type_name) {
            return Some(family);
        }
        if self.is_subtype(type_name, "Quantity") {
            return Some(TypeFamily::Quantity);
        }
        None
    }
}

fn build_type(
    type_name: &str,
    config: &TypeConfig,
    primitives: &HashSet<String>,
    schema: &TypeSchemaConfig,
) -> Result<TypeDefinition, TypeCatalogError> {
    let known = |name: &str| primitives.contains(name) || schema.types.contains_key(name);
    let mut fields = HashMap::new();

    for (key, field_config) in &config.fields {
        let field = build_field(type_name, key, field_config, primitives)?;
        let referenced: Vec<&str> = match &field.kind {
            FieldKind::Primitive(t) | FieldKind::Complex(t) => vec![t.as_str()],
            FieldKind::Polymorphic(variants) => {
                variants.iter().map(|v| v.type_name.as_str()).collect()
            }
        };
        if let Some(missing) = referenced.into_iter().find(|t| !known(t)) {
            return Err(TypeCatalogError::UnknownFieldType {
                type_name: type_name.to_string(),
                field: field.name,
                referenced: missing.to_string(),
            });
        }
        fields.insert(field.name.clone(), field);
    }

    Ok(TypeDefinition {
        name: type_name.to_string(),
        kind: config.kind,
        base: config.base.clone(),
        fields,
    })
}

fn build_field(
    type_name: &str,
    key: &str,
    config: &FieldConfig,
    primitives: &HashSet<String>,
) -> Result<FieldDefinition, TypeCatalogError> {
    let (name, polymorphic) = match key.strip_suffix("[x]") {
        Some(logical) => (logical.to_string(), true),
        None => (key.to_string(), !config.types.is_empty()),
    };

    if polymorphic {
        let mut variant_types = config.types.clone();
        if variant_types.is_empty() {
            variant_types.extend(config.type_name.iter().cloned());
        }
        if variant_types.is_empty() {
            return Err(TypeCatalogError::EmptyPolymorphicField {
                type_name: type_name.to_string(),
                field: name,
            });
        }
        let variants = variant_types
            .into_iter()
            .map(|t| PolymorphicVariant {
                field_name: format!("{}{}", name, capitalize(&t)),
                is_primitive: primitives.contains(&t),
                type_name: t,
            })
            .collect();
        return Ok(FieldDefinition {
            name,
            kind: FieldKind::Polymorphic(variants),
            is_array: config.array,
        });
    }

    let Some(field_type) = config.type_name.clone() else {
        return Err(TypeCatalogError::MissingFieldType {
            type_name: type_name.to_string(),
            field: name,
        });
    };
    let kind = if primitives.contains(&field_type) {
        FieldKind::Primitive(field_type)
    } else {
        FieldKind::Complex(field_type)
    };
    Ok(FieldDefinition {
        name,
        kind,
        is_array: config.array,
    })
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::fhir_r4().expect("bundled schema must load")
    }

    #[test]
    fn test_array_and_primitive_fields() {
        let registry = registry();
        assert_eq!(
            registry.resolve_member(Some("Patient"), "name"),
            MemberResolution::Field {
                type_name: "HumanName".to_string(),
                is_array: true,
                is_primitive: false
            }
        );
        assert_eq!(
            registry.resolve_member(Some("HumanName"), "family"),
            MemberResolution::Field {
                type_name: "string".to_string(),
                is_array: false,
                is_primitive: true
            }
        );
    }

    #[test]
    fn test_inherited_fields() {
        let registry = registry();
        assert!(matches!(
            registry.resolve_member(Some("Patient"), "id"),
            MemberResolution::Field { ref type_name, .. } if type_name == "id"
        ));
        assert!(matches!(
            registry.resolve_member(Some("HumanName"), "extension"),
            MemberResolution::Field { is_array: true, .. }
        ));
    }

    #[test]
    fn test_polymorphic_variants_keep_declared_order() {
        let registry = registry();
        let MemberResolution::Polymorphic { variants, .. } =
            registry.resolve_member(Some("Observation"), "value")
        else {
            panic!("value should be polymorphic");
        };
        assert_eq!(variants[0].field_name, "valueQuantity");
        assert_eq!(variants[1].field_name, "valueCodeableConcept");
        assert_eq!(variants[2].field_name, "valueString");
        assert!(variants[2].is_primitive);
    }

    #[test]
    fn test_physical_variant_resolves_to_its_type() {
        let registry = registry();
        assert_eq!(
            registry.resolve_member(Some("Observation"), "valueQuantity"),
            MemberResolution::Field {
                type_name: "Quantity".to_string(),
                is_array: false,
                is_primitive: false
            }
        );
    }

    #[test]
    fn test_unknown_member_and_type() {
        let registry = registry();
        assert_eq!(
            registry.resolve_member(Some("Patient"), "nickname"),
            MemberResolution::Unknown
        );
        assert_eq!(registry.resolve_member(None, "name"), MemberResolution::Unknown);
    }

    #[test]
    fn test_has_member() {
        let registry = registry();
        assert!(registry.has_member(Some("Patient"), "name"));
        assert!(registry.has_member(Some("Patient"), "id"));
        assert!(registry.has_member(Some("Observation"), "valueQuantity"));
        assert!(!registry.has_member(Some("Patient"), "Patient"));
        assert!(!registry.has_member(None, "name"));
    }

    #[test]
    fn test_resolve_type_specifiers() {
        let registry = registry();
        assert_eq!(
            registry.resolve_type("Decimal"),
            Some(TypeTarget::Family(TypeFamily::Decimal))
        );
        assert_eq!(
            registry.resolve_type("FHIR.code"),
            Some(TypeTarget::Primitive {
                family: TypeFamily::String,
                name: "code".to_string()
            })
        );
        assert_eq!(
            registry.resolve_type("Patient"),
            Some(TypeTarget::Resource("Patient".to_string()))
        );
        assert_eq!(
            registry.resolve_type("Quantity"),
            Some(TypeTarget::Complex("Quantity".to_string()))
        );
        assert_eq!(registry.resolve_type("Banana"), None);
    }

    #[test]
    fn test_quantity_subtypes() {
        let registry = registry();
        assert!(registry.is_subtype("Age", "Quantity"));
        assert_eq!(registry.family_of("Duration"), Some(TypeFamily::Quantity));
        assert!(registry.is_resource_type("Observation"));
        assert!(!registry.is_resource_type("HumanName"));
    }

    #[test]
    fn test_unknown_base_is_rejected() {
        let yaml = "name: broken\ntypes:\n  A:\n    kind: complex\n    base: Missing\n";
        let err = TypeRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, TypeCatalogError::UnknownBase { .. }));
    }

    #[test]
    fn test_unknown_field_type_is_rejected() {
        let yaml = "name: broken\ntypes:\n  A:\n    kind: complex\n    fields:\n      b: { type: Nope }\n";
        let err = TypeRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, TypeCatalogError::UnknownFieldType { ref referenced, .. } if referenced == "Nope"));
    }

    #[test]
    fn test_inheritance_cycle_is_rejected() {
        let yaml = "name: loop\ntypes:\n  A: { kind: complex, base: B }\n  B: { kind: complex, base: A }\n";
        let err = TypeRegistry::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, TypeCatalogError::InheritanceCycle(_)));
    }
}
