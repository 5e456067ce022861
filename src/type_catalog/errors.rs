use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypeCatalogError {
    #[error("failed to read schema file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("type '{type_name}' extends unknown base type '{base}'")]
    UnknownBase { type_name: String, base: String },

    #[error("field '{type_name}.{field}' references unknown type '{referenced}'")]
    UnknownFieldType {
        type_name: String,
        field: String,
        referenced: String,
    },

    #[error("polymorphic field '{type_name}.{field}' declares no variant types")]
    EmptyPolymorphicField { type_name: String, field: String },

    #[error("field '{type_name}.{field}' must declare either 'type' or 'types'")]
    MissingFieldType { type_name: String, field: String },

    #[error("inheritance cycle involving type '{0}'")]
    InheritanceCycle(String),
}
