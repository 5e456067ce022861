//! fhirpath-sql - FHIRPath to SQL compiler
//!
//! Compiles FHIRPath expressions over JSON documents stored one per row into
//! a single SQL statement for DuckDB or PostgreSQL:
//! - Type registry describing the document schema
//! - AST walker producing SQL fragments
//! - CTE manager ordering and assembling the staged sub-queries
//! - Dialect objects for the target databases

use std::sync::Arc;

use thiserror::Error;

pub mod utils;

pub mod config;
pub mod cte_manager;
pub mod fhirpath_parser;
pub mod sql_dialect;
pub mod translator;
pub mod type_catalog;

use config::{CompilerConfig, ConfigError};
use cte_manager::{BaseTable, CteError};
use fhirpath_parser::{ast::Expression, ParseError};
use sql_dialect::{Dialect, DialectKind};
use translator::{Translation, TranslationError, Translator};
use type_catalog::{TypeCatalogError, TypeRegistry};

/// Any failure between expression text and SQL.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Cte(#[from] CteError),

    #[error(transparent)]
    TypeCatalog(#[from] TypeCatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reusable compiler: one type registry and dialect, any number of
/// expressions. Each expression gets a fresh [`Translator`].
#[derive(Debug, Clone)]
pub struct FhirPathCompiler {
    registry: Arc<TypeRegistry>,
    dialect: Arc<dyn Dialect>,
    base: BaseTable,
    context_type: Option<String>,
}

impl FhirPathCompiler {
    /// Compiler over the bundled FHIR R4 schema reading the default table.
    pub fn new(dialect: DialectKind) -> Result<Self, CompileError> {
        Ok(FhirPathCompiler {
            registry: Arc::new(TypeRegistry::fhir_r4()?),
            dialect: dialect.create(),
            base: BaseTable::default(),
            context_type: None,
        })
    }

    pub fn from_config(config: &CompilerConfig) -> Result<Self, CompileError> {
        let registry = match &config.schema_path {
            Some(path) => TypeRegistry::from_yaml_file(path)?,
            None => TypeRegistry::fhir_r4()?,
        };
        log::debug!(
            "compiler for {} over '{}' ({} schema)",
            config.dialect,
            config.table_name,
            registry.name()
        );
        Ok(FhirPathCompiler {
            registry: Arc::new(registry),
            dialect: config.dialect.create(),
            base: config.base_table(),
            context_type: config.context_type.clone(),
        })
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_context_type(mut self, context_type: impl Into<String>) -> Self {
        self.context_type = Some(context_type.into());
        self
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Compile expression text to a complete SQL statement.
    pub fn compile(&self, expression: &str) -> Result<String, CompileError> {
        let ast = fhirpath_parser::parse_expression(expression)?;
        let translation = self.translate(&ast)?;
        Ok(translation.to_sql()?)
    }

    /// Translate a parsed expression, keeping the fragments and stages.
    pub fn translate(&self, ast: &Expression) -> Result<Translation, CompileError> {
        let translator = Translator::new(self.registry.clone(), self.dialect.clone(), self.base.clone())
            .with_context_type(self.context_type.clone());
        Ok(translator.translate(ast)?)
    }

    /// Fragments of a translation, the result last.
    pub fn translate_fragments(
        &self,
        expression: &str,
    ) -> Result<Vec<translator::SqlFragment>, CompileError> {
        let ast = fhirpath_parser::parse_expression(expression)?;
        Ok(self.translate(&ast)?.fragments)
    }
}
