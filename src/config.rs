use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use thiserror::Error;
use validator::Validate;

use crate::cte_manager::BaseTable;
use crate::sql_dialect::{DialectKind, UnknownDialect};

lazy_static! {
    static ref SQL_IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    /// `table` or `schema.table`
    static ref QUALIFIED_IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap();
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Dialect(#[from] UnknownDialect),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Where documents are read from and which SQL is generated for them.
#[derive(Clone, Debug, Validate, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerConfig {
    pub dialect: DialectKind,

    /// Table holding one JSON document per row
    #[validate(regex(
        path = *QUALIFIED_IDENTIFIER,
        message = "table name must be a SQL identifier, optionally schema-qualified"
    ))]
    pub table_name: String,

    #[validate(regex(path = *SQL_IDENTIFIER, message = "table alias must be a SQL identifier"))]
    pub table_alias: String,

    #[validate(regex(path = *SQL_IDENTIFIER, message = "id column must be a SQL identifier"))]
    pub id_column: String,

    #[validate(regex(
        path = *SQL_IDENTIFIER,
        message = "resource column must be a SQL identifier"
    ))]
    pub resource_column: String,

    /// Type schema YAML; the bundled FHIR R4 schema when unset
    pub schema_path: Option<PathBuf>,

    /// Resource type assumed for expressions that do not name one
    #[validate(regex(path = *SQL_IDENTIFIER, message = "context type must be a type name"))]
    pub context_type: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        let base = BaseTable::default();
        Self {
            dialect: DialectKind::default(),
            table_name: base.table_name,
            table_alias: base.alias,
            id_column: base.id_column,
            resource_column: base.resource_column,
            schema_path: None,
            context_type: None,
        }
    }
}

impl CompilerConfig {
    /// Create configuration from `FHIRPATH_SQL_*` environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            dialect: env_or("FHIRPATH_SQL_DIALECT", &defaults.dialect.to_string()).parse()?,
            table_name: env_or("FHIRPATH_SQL_TABLE", &defaults.table_name),
            table_alias: env_or("FHIRPATH_SQL_TABLE_ALIAS", &defaults.table_alias),
            id_column: env_or("FHIRPATH_SQL_ID_COLUMN", &defaults.id_column),
            resource_column: env_or("FHIRPATH_SQL_RESOURCE_COLUMN", &defaults.resource_column),
            schema_path: env::var("FHIRPATH_SQL_SCHEMA").ok().map(PathBuf::from),
            context_type: env::var("FHIRPATH_SQL_CONTEXT_TYPE").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from CLI arguments with validation. The config
    /// file named on the command line (or the environment) supplies the
    /// starting point; explicit flags override it.
    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        let mut config = match &cli.config_file {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::from_env()?,
        };

        if let Some(dialect) = cli.dialect {
            config.dialect = dialect.parse()?;
        }
        if let Some(table_name) = cli.table_name {
            config.table_name = table_name;
        }
        if let Some(schema_path) = cli.schema_path {
            config.schema_path = Some(schema_path);
        }
        if let Some(context_type) = cli.context_type {
            config.context_type = Some(context_type);
        }

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// The document table described by this configuration.
    pub fn base_table(&self) -> BaseTable {
        BaseTable::new(
            &self.table_name,
            &self.table_alias,
            &self.id_column,
            &self.resource_column,
        )
    }
}

/// CLI configuration (parsed from command line arguments)
#[derive(Clone, Debug, Default)]
pub struct CliConfig {
    pub config_file: Option<PathBuf>,
    pub dialect: Option<String>,
    pub table_name: Option<String>,
    pub schema_path: Option<PathBuf>,
    pub context_type: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
