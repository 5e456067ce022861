//! The translator's intermediate representation.
//!
//! A [`SqlFragment`] is one translated sub-expression: SQL text plus the facts
//! later stages need about it. Fragments live on a LIFO [`FragmentStack`]
//! owned by a single translation.

use std::collections::BTreeSet;

use super::errors::TranslationError;
use crate::fhirpath_parser::ast::Span;
use crate::sql_dialect::SqlScalar;
use crate::type_catalog::PolymorphicVariant;

/// Collection-reducing functions whose results must be collapsed to one
/// row per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionFunction {
    Count,
    Exists,
    Empty,
    Sum,
    Avg,
    Min,
    Max,
}

impl CollectionFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(CollectionFunction::Count),
            "exists" => Some(CollectionFunction::Exists),
            "empty" => Some(CollectionFunction::Empty),
            "sum" => Some(CollectionFunction::Sum),
            "avg" => Some(CollectionFunction::Avg),
            "min" => Some(CollectionFunction::Min),
            "max" => Some(CollectionFunction::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CollectionFunction::Count => "count",
            CollectionFunction::Exists => "exists",
            CollectionFunction::Empty => "empty",
            CollectionFunction::Sum => "sum",
            CollectionFunction::Avg => "avg",
            CollectionFunction::Min => "min",
            CollectionFunction::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one value; NULL is the empty collection.
    Single,
    /// A JSON array.
    Array,
    /// A JSON value that may or may not be an array.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A native SQL scalar.
    Native(SqlScalar),
    /// A JSON document value.
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultType {
    pub kind: ValueKind,
    /// FHIR type of the value (element type for collections), when known.
    pub fhir_type: Option<String>,
    pub cardinality: Cardinality,
}

impl ResultType {
    pub fn native(scalar: SqlScalar, fhir_type: Option<&str>) -> Self {
        ResultType {
            kind: ValueKind::Native(scalar),
            fhir_type: fhir_type.map(str::to_string),
            cardinality: Cardinality::Single,
        }
    }

    pub fn json(fhir_type: Option<String>, cardinality: Cardinality) -> Self {
        ResultType {
            kind: ValueKind::Json,
            fhir_type,
            cardinality,
        }
    }

    pub fn native_scalar(&self) -> Option<SqlScalar> {
        match self.kind {
            ValueKind::Native(scalar) => Some(scalar),
            ValueKind::Json => None,
        }
    }

    pub fn is_json(&self) -> bool {
        self.kind == ValueKind::Json
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality != Cardinality::Single
    }
}

/// Where a fragment's SQL came from; lets later steps extend a document path
/// or pick a polymorphic variant instead of re-parsing SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentOrigin {
    Computed,
    Literal,
    /// `root` navigated by `path`.
    Document { root: String, path: Vec<String> },
    /// A logical polymorphic field below `root`/`path`.
    Polymorphic {
        root: String,
        path: Vec<String>,
        variants: Vec<PolymorphicVariant>,
    },
    QuantityLiteral { value: String, unit: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentMetadata {
    pub function: Option<CollectionFunction>,
    pub result_type: ResultType,
    pub origin: FragmentOrigin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub expression: String,
    /// Table, CTE or alias the expression's column references resolve against.
    pub source_table: String,
    /// Rows of `source_table` are flattened collection elements.
    pub requires_unnest: bool,
    /// Already reduced to one value per document; never wrapped again.
    pub is_aggregate: bool,
    pub dependencies: BTreeSet<String>,
    pub metadata: FragmentMetadata,
}

impl SqlFragment {
    pub fn new(expression: impl Into<String>, source_table: &str, result_type: ResultType) -> Self {
        SqlFragment {
            expression: expression.into(),
            source_table: source_table.to_string(),
            requires_unnest: false,
            is_aggregate: false,
            dependencies: BTreeSet::new(),
            metadata: FragmentMetadata {
                function: None,
                result_type,
                origin: FragmentOrigin::Computed,
            },
        }
    }

    /// A fragment computed from `self`: same source, row shape and dependencies.
    pub fn derive(&self, expression: impl Into<String>, result_type: ResultType) -> Self {
        SqlFragment {
            expression: expression.into(),
            source_table: self.source_table.clone(),
            requires_unnest: self.requires_unnest,
            is_aggregate: self.is_aggregate,
            dependencies: self.dependencies.clone(),
            metadata: FragmentMetadata {
                function: None,
                result_type,
                origin: FragmentOrigin::Computed,
            },
        }
    }

    pub fn with_origin(mut self, origin: FragmentOrigin) -> Self {
        self.metadata.origin = origin;
        self
    }

    pub fn with_function(mut self, function: CollectionFunction) -> Self {
        self.metadata.function = Some(function);
        self
    }

    pub fn with_dependency(mut self, dependency: &str) -> Self {
        self.dependencies.insert(dependency.to_string());
        self
    }

    pub fn merge_dependencies(&mut self, other: &SqlFragment) {
        self.dependencies.extend(other.dependencies.iter().cloned());
    }

    pub fn result_type(&self) -> &ResultType {
        &self.metadata.result_type
    }

    pub fn fhir_type(&self) -> Option<&str> {
        self.metadata.result_type.fhir_type.as_deref()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.metadata.result_type.cardinality
    }

    pub fn is_collection(&self) -> bool {
        self.metadata.result_type.is_collection()
    }

    pub fn native_scalar(&self) -> Option<SqlScalar> {
        self.metadata.result_type.native_scalar()
    }

    pub fn origin(&self) -> &FragmentOrigin {
        &self.metadata.origin
    }

    /// A reducing function over flattened rows that has not been grouped yet.
    pub fn is_pending_aggregate(&self) -> bool {
        self.metadata.function.is_some() && !self.is_aggregate && self.requires_unnest
    }
}

#[derive(Debug, Default)]
pub struct FragmentStack {
    fragments: Vec<SqlFragment>,
}

impl FragmentStack {
    pub fn new() -> Self {
        FragmentStack::default()
    }

    pub fn push(&mut self, fragment: SqlFragment) {
        self.fragments.push(fragment);
    }

    /// Take the most recent fragment as the implicit operand of the construct at `span`.
    pub fn pop_operand(&mut self, span: Span) -> Result<SqlFragment, TranslationError> {
        self.fragments
            .pop()
            .ok_or(TranslationError::EmptyFragmentStack { span })
    }

    pub fn peek(&self) -> Option<&SqlFragment> {
        self.fragments.last()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn into_vec(self) -> Vec<SqlFragment> {
        self.fragments
    }
}
