//! FHIRPath AST to SQL translation.
//!
//! The [`Translator`] walks one AST and produces [`SqlFragment`]s on a LIFO
//! stack. Two evaluation modes are used:
//!
//! - **Row mode** for the main navigation chain. Array fields are flattened
//!   into enumeration CTEs registered with the [`CteManager`], so each
//!   element becomes its own row and keeps its position in ordering columns.
//! - **Value mode** for function arguments, predicates and operator
//!   operands. Every fragment is one SQL value per row of its source; arrays
//!   stay JSON arrays and collection work is done in correlated subqueries.
//!
//! Iteration variables live in a [`VariableScope`]; each iteration construct
//! pushes a frame and pops it on every exit path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cte_manager::{BaseTable, CteManager};
use crate::fhirpath_parser::ast::{Expression, IdentifierNode, Span, VariableNode};
use crate::sql_dialect::{quote_literal, Dialect, SqlScalar};
use crate::type_catalog::{TypeFamily, TypeRegistry};

pub mod errors;
pub mod fragment;
pub mod function_registry;
pub mod variable_scope;

mod collection;
mod functions;
mod iteration;
mod literals;
mod operators;
mod path;
mod type_ops;
mod union;

pub use errors::{TranslationError, TranslationResult};
pub use fragment::{
    Cardinality, CollectionFunction, FragmentMetadata, FragmentOrigin, FragmentStack,
    ResultType, SqlFragment, ValueKind,
};
pub use variable_scope::{ScopeFrame, VariableBinding, VariableScope};

use variable_scope::{INDEX, THIS, TOTAL};

const UCUM_URL: &str = "http://unitsofmeasure.org";
const SNOMED_URL: &str = "http://snomed.info/sct";
const LOINC_URL: &str = "http://loinc.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Row,
    Value,
}

/// Output of one translation: the fragment stack (the last entry is the
/// result) and the CTE stages it references.
#[derive(Debug)]
pub struct Translation {
    pub fragments: Vec<SqlFragment>,
    pub ctes: CteManager,
}

impl Translation {
    pub fn result(&self) -> Option<&SqlFragment> {
        self.fragments.last()
    }

    /// The complete SQL statement.
    pub fn to_sql(&self) -> TranslationResult<String> {
        let result = self
            .result()
            .ok_or(TranslationError::EmptyFragmentStack { span: Span::default() })?;
        Ok(self.ctes.assemble(result)?)
    }
}

/// Single-use AST walker. All state is local to one `translate` call.
pub struct Translator {
    registry: Arc<TypeRegistry>,
    dialect: Arc<dyn Dialect>,
    ctes: CteManager,
    stack: FragmentStack,
    scope: VariableScope,
    mode: Mode,
    context_type: Option<String>,
    /// Element expression of each enumeration/projection stage.
    stage_elements: HashMap<String, String>,
}

impl Translator {
    pub fn new(registry: Arc<TypeRegistry>, dialect: Arc<dyn Dialect>, base: BaseTable) -> Self {
        Translator {
            registry,
            dialect,
            ctes: CteManager::new(base),
            stack: FragmentStack::new(),
            scope: VariableScope::new(),
            mode: Mode::Row,
            context_type: None,
            stage_elements: HashMap::new(),
        }
    }

    /// Resource type assumed when the expression does not start with one.
    pub fn with_context_type(mut self, context_type: Option<String>) -> Self {
        self.context_type = context_type;
        self
    }

    pub fn translate(mut self, ast: &Expression) -> TranslationResult<Translation> {
        let leading = leading_identifier(ast)
            .filter(|name| self.registry.is_resource_type(name))
            .map(str::to_string);
        let context_type = leading.or_else(|| self.context_type.clone());

        if let Some(resource_type) = &context_type {
            let base = self.ctes.base();
            let filter = format!(
                "{} = {}",
                self.dialect
                    .extract_string(&base.resource_expr(), &["resourceType".to_string()]),
                quote_literal(resource_type)
            );
            self.ctes.base_mut().add_filter(filter);
        }
        self.context_type = context_type;
        log::debug!(
            "translating for {} with context type {:?}",
            self.dialect.name(),
            self.context_type
        );

        let base_alias = self.ctes.base().alias.clone();
        let root = self.root_fragment(&base_alias);
        self.mode = Mode::Row;
        self.with_frame(ScopeFrame::new().bind(THIS, root), |t| t.visit(ast))?;

        let result = self.stack.pop_operand(ast.span())?;
        let result = self.finish(result);
        self.stack.push(result);

        Ok(Translation {
            fragments: self.stack.into_vec(),
            ctes: self.ctes,
        })
    }

    fn visit(&mut self, expr: &Expression) -> TranslationResult<()> {
        log::trace!("visit {:?} at {} in {:?} mode", std::mem::discriminant(expr), expr.span(), self.mode);
        let fragment = match expr {
            Expression::Literal(node) => self.literal(node)?,
            Expression::Identifier(node) => self.identifier(node)?,
            Expression::Variable(node) => self.variable(node)?,
            Expression::EnvironmentVariable(node) => self.environment_variable(node)?,
            Expression::Member(node) => {
                self.visit(&node.base)?;
                let receiver = self.pop_operand(node.span)?;
                self.member(receiver, &node.name, node.span)?
            }
            Expression::Invocation(call) => {
                match &call.base {
                    Some(base) => self.visit(base)?,
                    None => {
                        let this = self.this_fragment(call.span)?;
                        self.stack.push(this);
                    }
                }
                let receiver = self.pop_operand(call.span)?;
                self.invoke(receiver, call)?
            }
            Expression::Index(node) => {
                self.visit(&node.base)?;
                let receiver = self.pop_operand(node.span)?;
                self.index(receiver, &node.index, node.span)?
            }
            Expression::Unary(node) => self.unary(node)?,
            Expression::Binary(node) => self.binary(node)?,
            Expression::Union(node) => self.union(node)?,
            Expression::TypeOperation(node) => {
                self.visit(&node.operand)?;
                let operand = self.pop_operand(node.span)?;
                self.type_operation(operand, node.operator, &node.type_name, node.span)?
            }
        };
        self.stack.push(fragment);
        Ok(())
    }

    /// Pop the implicit operand of the construct at `span`. A pending
    /// reducing function is settled to one row per document first.
    fn pop_operand(&mut self, span: Span) -> TranslationResult<SqlFragment> {
        let fragment = self.stack.pop_operand(span)?;
        if fragment.is_pending_aggregate() {
            self.settle(fragment)
        } else {
            Ok(fragment)
        }
    }

    fn in_mode<T>(
        &mut self,
        mode: Mode,
        f: impl FnOnce(&mut Self) -> TranslationResult<T>,
    ) -> TranslationResult<T> {
        let saved = std::mem::replace(&mut self.mode, mode);
        let result = f(self);
        self.mode = saved;
        result
    }

    fn with_frame<T>(
        &mut self,
        frame: ScopeFrame,
        f: impl FnOnce(&mut Self) -> TranslationResult<T>,
    ) -> TranslationResult<T> {
        self.scope.push(frame);
        let result = f(self);
        self.scope.pop();
        result
    }

    /// Translate `expr` in value mode and take its fragment.
    fn evaluate(&mut self, expr: &Expression) -> TranslationResult<SqlFragment> {
        self.in_mode(Mode::Value, |t| {
            t.visit(expr)?;
            t.pop_operand(expr.span())
        })
    }

    fn evaluate_with(&mut self, frame: ScopeFrame, expr: &Expression) -> TranslationResult<SqlFragment> {
        self.with_frame(frame, |t| t.evaluate(expr))
    }

    /// Evaluate a non-iterating function argument. In row mode the receiver
    /// may live on a CTE, so the document root is re-bound relative to it.
    fn argument(&mut self, receiver: &SqlFragment, arg: &Expression) -> TranslationResult<SqlFragment> {
        if self.mode == Mode::Row {
            let root = self.root_for(receiver);
            self.evaluate_with(ScopeFrame::new().bind(THIS, root), arg)
        } else {
            self.evaluate(arg)
        }
    }

    fn this_fragment(&self, span: Span) -> TranslationResult<SqlFragment> {
        self.scope
            .resolve(THIS)
            .map(|binding| binding.fragment.clone())
            .ok_or_else(|| TranslationError::UnboundVariable {
                name: THIS.to_string(),
                span,
            })
    }

    fn root_fragment(&self, source: &str) -> SqlFragment {
        let expr = self.root_expression(source);
        SqlFragment::new(
            expr.clone(),
            source,
            ResultType::json(self.context_type.clone(), Cardinality::Single),
        )
        .with_origin(FragmentOrigin::Document {
            root: expr,
            path: Vec::new(),
        })
    }

    fn root_expression(&self, source: &str) -> String {
        let base = self.ctes.base();
        if self.ctes.is_external(source) {
            base.resource_expr()
        } else {
            format!(
                "(SELECT _r.{res} FROM {table} AS _r WHERE _r.{id} = {source}.id)",
                res = base.resource_column,
                table = base.table_name,
                id = base.id_column,
                source = source
            )
        }
    }

    /// The document being evaluated, as seen from the rows of `anchor`.
    fn root_for(&self, anchor: &SqlFragment) -> SqlFragment {
        let expr = self.root_expression(&anchor.source_table);
        anchor
            .derive(
                expr.clone(),
                ResultType::json(self.context_type.clone(), Cardinality::Single),
            )
            .with_origin(FragmentOrigin::Document {
                root: expr,
                path: Vec::new(),
            })
    }

    fn identifier(&mut self, node: &IdentifierNode) -> TranslationResult<SqlFragment> {
        let this = self.this_fragment(node.span)?;
        if self.registry.is_resource_type(&node.name)
            && !self.registry.has_member(this.fhir_type(), &node.name)
        {
            return Ok(self.resource_reference(&this, &node.name));
        }
        self.member(this, &node.name, node.span)
    }

    fn resource_reference(&self, this: &SqlFragment, resource_type: &str) -> SqlFragment {
        let root = self.root_for(this);
        if self.context_type.as_deref() == Some(resource_type) {
            return root;
        }
        let kind = self
            .dialect
            .extract_string(&root.expression, &["resourceType".to_string()]);
        root.derive(
            format!(
                "(CASE WHEN {} = {} THEN {} END)",
                kind,
                quote_literal(resource_type),
                root.expression
            ),
            ResultType::json(Some(resource_type.to_string()), Cardinality::Single),
        )
    }

    fn variable(&self, node: &VariableNode) -> TranslationResult<SqlFragment> {
        match node.name.as_str() {
            THIS | INDEX | TOTAL => self
                .scope
                .resolve(&node.name)
                .map(|binding| binding.fragment.clone())
                .ok_or_else(|| TranslationError::UnboundVariable {
                    name: node.name.clone(),
                    span: node.span,
                }),
            _ => Err(TranslationError::UnboundVariable {
                name: node.name.clone(),
                span: node.span,
            }),
        }
    }

    fn environment_variable(&self, node: &VariableNode) -> TranslationResult<SqlFragment> {
        let this = self.this_fragment(node.span)?;
        let url = match node.name.as_str() {
            "resource" | "rootResource" | "context" => return Ok(self.root_for(&this)),
            "ucum" => UCUM_URL,
            "sct" => SNOMED_URL,
            "loinc" => LOINC_URL,
            _ => {
                return Err(TranslationError::UnboundVariable {
                    name: format!("%{}", node.name),
                    span: node.span,
                })
            }
        };
        Ok(this
            .derive(
                self.dialect.string_literal(url),
                ResultType::native(SqlScalar::String, Some("uri")),
            )
            .with_origin(FragmentOrigin::Literal))
    }

    /// Render a JSON value of known primitive type as a native scalar.
    fn finish(&self, fragment: SqlFragment) -> SqlFragment {
        let primitive = fragment
            .fhir_type()
            .filter(|t| self.registry.is_primitive(t))
            .map(str::to_string);
        match (fragment.result_type().is_json(), fragment.cardinality(), primitive) {
            (true, Cardinality::Single, Some(type_name)) => {
                let scalar = scalar_for_type(&type_name);
                let expr = self.dialect.extract_scalar(&fragment.expression, &[], scalar);
                let mut native = fragment.derive(expr, ResultType::native(scalar, Some(&type_name)));
                native.metadata.function = fragment.metadata.function;
                native
            }
            _ => fragment,
        }
    }

    fn is_primitive_type(&self, type_name: Option<&str>) -> bool {
        type_name.is_some_and(|t| self.registry.is_primitive(t))
    }
}

/// Native representation used for values of a FHIR type read from a
/// document. Temporal values stay text so partial dates survive.
pub(crate) fn scalar_for_type(type_name: &str) -> SqlScalar {
    match TypeFamily::of_member(type_name) {
        Some(TypeFamily::Boolean) => SqlScalar::Boolean,
        Some(TypeFamily::Integer) => SqlScalar::Integer,
        Some(TypeFamily::Decimal) => SqlScalar::Decimal,
        _ => SqlScalar::String,
    }
}

/// First identifier of the navigation chain, e.g. `Patient` in
/// `Patient.name.where(...).count() > 1`.
fn leading_identifier(expr: &Expression) -> Option<&str> {
    let mut current = expr;
    loop {
        current = match current {
            Expression::Identifier(node) => return Some(node.name.as_str()),
            Expression::Member(node) => &node.base,
            Expression::Invocation(call) => call.base.as_deref()?,
            Expression::Index(node) => &node.base,
            Expression::Binary(node) => &node.left,
            Expression::Union(node) => &node.left,
            Expression::TypeOperation(node) => &node.operand,
            Expression::Unary(node) => &node.operand,
            _ => return None,
        };
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_leading_resource_type_filters_base() {
        let sql = sql("Patient.id");
        assert!(sql.contains("WHERE json_extract_string(base.resource, '$.resourceType') = 'Patient'"));
        assert!(sql.contains("json_extract_string(base.resource, '$.id.value')"));
    }

    #[test]
    fn test_translation_is_deterministic() {
        let text = "Patient.name.where(use = 'official').given.first()";
        assert_eq!(sql(text), sql(text));
    }

    #[test]
    fn test_unbound_variables() {
        assert!(matches!(error("$foo"), TranslationError::UnboundVariable { ref name, .. } if name == "$foo"));
        assert!(matches!(error("$index"), TranslationError::UnboundVariable { .. }));
        assert!(matches!(error("%unknown"), TranslationError::UnboundVariable { ref name, .. } if name == "%unknown"));
    }

    #[test]
    fn test_environment_urls() {
        let fragment = result("%ucum");
        assert_eq!(fragment.expression, "'http://unitsofmeasure.org'");
        assert_eq!(fragment.native_scalar(), Some(SqlScalar::String));
    }

    #[test]
    fn test_resource_variable_is_document_root() {
        let fragment = result("%resource");
        assert_eq!(fragment.expression, "base.resource");
    }

    #[test]
    fn test_scope_is_empty_after_failure() {
        // the failing predicate is translated inside a pushed frame
        assert!(matches!(
            error("Patient.name.where($nope)"),
            TranslationError::UnboundVariable { .. }
        ));
    }

    #[test]
    fn test_frame_is_popped_when_translation_fails() {
        let registry = Arc::new(TypeRegistry::fhir_r4().unwrap());
        let mut translator = Translator::new(
            registry,
            crate::sql_dialect::DialectKind::DuckDb.create(),
            BaseTable::default(),
        );
        let depth = translator.scope.depth();
        let outcome: TranslationResult<()> = translator.with_frame(ScopeFrame::new(), |t| {
            assert_eq!(t.scope.depth(), depth + 1);
            Err(TranslationError::EmptyFragmentStack { span: Span::default() })
        });
        assert!(outcome.is_err());
        assert_eq!(translator.scope.depth(), depth);
    }

    #[test]
    fn test_resource_type_identifier_is_document_root() {
        assert_eq!(result("Patient").expression, "base.resource");
    }

    #[test]
    fn test_leading_identifier_descends_chains() {
        let ast = crate::fhirpath_parser::parse_expression("Patient.name.count() > 1").unwrap();
        assert_eq!(leading_identifier(&ast), Some("Patient"));
        let ast = crate::fhirpath_parser::parse_expression("1 + 2").unwrap();
        assert_eq!(leading_identifier(&ast), None);
    }

    #[test]
    fn test_scalar_for_type() {
        assert_eq!(scalar_for_type("positiveInt"), SqlScalar::Integer);
        assert_eq!(scalar_for_type("date"), SqlScalar::String);
        assert_eq!(scalar_for_type("boolean"), SqlScalar::Boolean);
    }
}
