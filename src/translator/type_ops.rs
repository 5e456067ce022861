//! `is`, `as` and `ofType`.
//!
//! A value's type is decided statically whenever the registry knows it:
//! document members carry their declared type and polymorphic fields know
//! which physical key holds which type. Only values of unknown type (union
//! members, undeclared fields, native literals) are checked at runtime,
//! through the dialect's SQL or JSON type inspection.

use super::{
    scalar_for_type, Cardinality, FragmentOrigin, ResultType, SqlFragment, TranslationError, TranslationResult,
    Translator,
};
use crate::fhirpath_parser::ast::{Span, TypeOperator};
use crate::sql_dialect::{quote_literal, JsonKind, SqlScalar};
use crate::type_catalog::{TypeFamily, TypeTarget};

fn family_scalar(family: TypeFamily) -> Option<SqlScalar> {
    match family {
        TypeFamily::Boolean => Some(SqlScalar::Boolean),
        TypeFamily::Integer => Some(SqlScalar::Integer),
        TypeFamily::Decimal => Some(SqlScalar::Decimal),
        TypeFamily::String => Some(SqlScalar::String),
        TypeFamily::Date => Some(SqlScalar::Date),
        TypeFamily::DateTime => Some(SqlScalar::DateTime),
        TypeFamily::Time => Some(SqlScalar::Time),
        TypeFamily::Quantity => None,
    }
}

fn json_kind(family: TypeFamily) -> JsonKind {
    match family {
        TypeFamily::Boolean => JsonKind::Boolean,
        TypeFamily::Integer => JsonKind::Integer,
        TypeFamily::Decimal => JsonKind::Number,
        TypeFamily::String | TypeFamily::Date | TypeFamily::DateTime | TypeFamily::Time => {
            JsonKind::String
        }
        TypeFamily::Quantity => JsonKind::Object,
    }
}

/// FHIR type name values of `target` are reported as.
fn target_type_name(target: &TypeTarget) -> String {
    match target {
        TypeTarget::Family(family) => family.members()[0].to_string(),
        TypeTarget::Primitive { name, .. } => name.clone(),
        TypeTarget::Complex(name) | TypeTarget::Resource(name) => name.clone(),
    }
}

impl Translator {
    pub(super) fn type_operation(
        &mut self,
        operand: SqlFragment,
        operator: TypeOperator,
        type_name: &str,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        match operator {
            TypeOperator::Is => self.type_check(operand, type_name, span),
            TypeOperator::As => self.type_cast(operand, type_name, span),
        }
    }

    fn resolve_target(&self, spec: &str, span: Span) -> TranslationResult<TypeTarget> {
        self.registry
            .resolve_type(spec)
            .ok_or_else(|| TranslationError::UnknownType {
                name: spec.to_string(),
                span,
            })
    }

    /// Whether a value declared as `actual` is an instance of `target`.
    fn type_matches(&self, actual: &str, target: &TypeTarget) -> bool {
        match target {
            TypeTarget::Family(TypeFamily::Quantity) => self.registry.is_subtype(actual, "Quantity"),
            TypeTarget::Family(family) => family.contains(actual),
            TypeTarget::Primitive { name, .. } => actual == name,
            TypeTarget::Complex(name) | TypeTarget::Resource(name) => {
                self.registry.is_subtype(actual, name)
            }
        }
    }

    pub(super) fn type_check(
        &self,
        operand: SqlFragment,
        spec: &str,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        let target = self.resolve_target(spec, span)?;
        let single = self.singleton(&operand);
        let null_guarded = |condition: String| {
            format!(
                "(CASE WHEN {} IS NULL THEN NULL ELSE {} END)",
                single.expression, condition
            )
        };

        let expr = match single.origin() {
            FragmentOrigin::Polymorphic {
                root,
                path,
                variants,
            } => {
                let present: Vec<String> = variants
                    .iter()
                    .filter(|v| self.type_matches(&v.type_name, &target))
                    .map(|v| {
                        let mut variant_path = path.clone();
                        variant_path.push(v.field_name.clone());
                        format!("{} IS NOT NULL", self.dialect.extract_json(root, &variant_path))
                    })
                    .collect();
                if present.is_empty() {
                    null_guarded("FALSE".to_string())
                } else {
                    null_guarded(format!("({})", present.join(" OR ")))
                }
            }
            FragmentOrigin::QuantityLiteral { .. } => {
                if self.type_matches("Quantity", &target) { "TRUE" } else { "FALSE" }.to_string()
            }
            FragmentOrigin::Literal if !single.result_type().is_json() => self.native_check(&single, &target),
            _ => match single.fhir_type() {
                Some(actual) => {
                    let matched = self.type_matches(actual, &target);
                    null_guarded(if matched { "TRUE" } else { "FALSE" }.to_string())
                }
                None if !single.result_type().is_json() => self.native_check(&single, &target),
                None => self.json_check(&single, &target),
            },
        };
        Ok(operand.derive(expr, ResultType::native(SqlScalar::Boolean, Some("boolean"))))
    }

    /// Runtime check of a native SQL value against the scalar type of `target`.
    fn native_check(&self, single: &SqlFragment, target: &TypeTarget) -> String {
        let scalar = match target {
            TypeTarget::Family(family) | TypeTarget::Primitive { family, .. } => family_scalar(*family),
            TypeTarget::Complex(_) | TypeTarget::Resource(_) => None,
        };
        let Some(scalar) = scalar else {
            return "FALSE".to_string();
        };
        let names: Vec<String> = self
            .dialect
            .native_type_names(scalar)
            .iter()
            .map(|n| quote_literal(n))
            .collect();
        format!(
            "({} IN ({}))",
            self.dialect.type_of(&single.expression),
            names.join(", ")
        )
    }

    /// Runtime check of an untyped JSON value.
    fn json_check(&self, single: &SqlFragment, target: &TypeTarget) -> String {
        match target {
            TypeTarget::Family(family) | TypeTarget::Primitive { family, .. } => self
                .dialect
                .json_type_check(&single.expression, json_kind(*family)),
            TypeTarget::Complex(_) => self.dialect.json_type_check(&single.expression, JsonKind::Object),
            TypeTarget::Resource(name) => format!(
                "({} = {})",
                self.dialect
                    .extract_string(&single.expression, &["resourceType".to_string()]),
                quote_literal(name)
            ),
        }
    }

    pub(super) fn type_cast(
        &self,
        operand: SqlFragment,
        spec: &str,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        let target = self.resolve_target(spec, span)?;
        let single = self.singleton(&operand);
        let type_name = target_type_name(&target);
        // native for primitives; finish() only re-reads JSON values
        let empty = || {
            if self.registry.is_primitive(&type_name) {
                operand.derive("NULL", ResultType::native(scalar_for_type(&type_name), Some(&type_name)))
            } else {
                operand.derive(
                    self.dialect.empty_json(),
                    ResultType::json(Some(type_name.clone()), Cardinality::Single),
                )
            }
        };

        if let FragmentOrigin::Polymorphic {
            root,
            path,
            variants,
        } = single.origin()
        {
            let matching: Vec<_> = variants
                .iter()
                .filter(|v| self.type_matches(&v.type_name, &target))
                .collect();
            let Some(first) = matching.first() else {
                return Ok(empty());
            };
            let parts: Vec<String> = matching
                .iter()
                .map(|v| {
                    let mut variant_path = path.clone();
                    variant_path.push(v.field_name.clone());
                    self.dialect.extract_json(root, &variant_path)
                })
                .collect();
            let expr = if parts.len() == 1 {
                parts[0].clone()
            } else {
                format!("COALESCE({})", parts.join(", "))
            };
            let mut variant_path = path.clone();
            variant_path.push(first.field_name.clone());
            let cast = operand
                .derive(expr, ResultType::json(Some(first.type_name.clone()), Cardinality::Single))
                .with_origin(FragmentOrigin::Document {
                    root: root.clone(),
                    path: variant_path,
                });
            return Ok(self.finish(cast));
        }

        if let Some(actual) = single.fhir_type() {
            return Ok(if self.type_matches(actual, &target) { single } else { empty() });
        }

        let check = self.type_check(single.clone(), spec, span)?;
        let cast = operand.derive(
            format!("(CASE WHEN {} THEN {} END)", check.expression, single.expression),
            match single.native_scalar() {
                Some(scalar) => ResultType::native(scalar, Some(&type_name)),
                None => ResultType::json(Some(type_name.clone()), Cardinality::Single),
            },
        );
        Ok(self.finish(cast))
    }

    /// `ofType(T)` on a value-mode receiver.
    pub(super) fn of_type(
        &mut self,
        receiver: SqlFragment,
        spec: &str,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        if receiver.cardinality() == Cardinality::Single {
            return self.type_cast(receiver, spec, span);
        }
        let target = self.resolve_target(spec, span)?;
        let rows = self.collection_rows(&receiver);
        let check = self.type_check(rows.element.clone(), spec, span)?;
        let condition = self.boolean_value(&check);
        let expr = self.aggregate_rows(&rows, &rows.raw, Some(&condition));
        Ok(receiver.derive(
            expr,
            ResultType::json(Some(target_type_name(&target)), Cardinality::Array),
        ))
    }
}
