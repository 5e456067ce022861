//! Unary and binary operators.

use super::literals::is_empty_literal;
use super::{
    scalar_for_type, FragmentOrigin, ResultType, SqlFragment, TranslationError, TranslationResult,
    Translator,
};
use crate::fhirpath_parser::ast::{
    BinaryOperation, BinaryOperator, Span, UnaryOperation, UnaryOperator,
};
use crate::sql_dialect::{quote_literal, SqlScalar};
use crate::type_catalog::TypeFamily;

/// Common scalar type two operands are compared or combined as. A side
/// with no known type adopts the other's.
pub(super) fn unify_scalars(left: Option<SqlScalar>, right: Option<SqlScalar>) -> SqlScalar {
    use SqlScalar::*;
    match (left, right) {
        (None, None) => String,
        (Some(scalar), None) | (None, Some(scalar)) => scalar,
        (Some(a), Some(b)) if a == b => a,
        (Some(Integer), Some(Decimal)) | (Some(Decimal), Some(Integer)) => Decimal,
        (Some(String), Some(t @ (Date | DateTime | Time)))
        | (Some(t @ (Date | DateTime | Time)), Some(String)) => t,
        (Some(Date), Some(DateTime)) | (Some(DateTime), Some(Date)) => DateTime,
        _ => String,
    }
}

fn comparison_symbol(operator: BinaryOperator) -> Option<&'static str> {
    match operator {
        BinaryOperator::Equal => Some("="),
        BinaryOperator::NotEqual => Some("<>"),
        BinaryOperator::LessThan => Some("<"),
        BinaryOperator::LessOrEqual => Some("<="),
        BinaryOperator::GreaterThan => Some(">"),
        BinaryOperator::GreaterOrEqual => Some(">="),
        _ => None,
    }
}

/// `a < b` as `b > a`.
fn mirrored(symbol: &str) -> &str {
    match symbol {
        "<" => ">",
        "<=" => ">=",
        ">" => "<",
        ">=" => "<=",
        other => other,
    }
}

fn negated_text(value: &str) -> String {
    match value.strip_prefix('-') {
        Some(positive) => positive.to_string(),
        None => format!("-{}", value),
    }
}

/// SQL interval unit for a calendar keyword or UCUM time unit.
fn interval_unit(unit: &str) -> Option<&'static str> {
    Some(match unit {
        "year" | "years" | "a" => "year",
        "month" | "months" | "mo" => "month",
        "week" | "weeks" | "wk" => "week",
        "day" | "days" | "d" => "day",
        "hour" | "hours" | "h" => "hour",
        "minute" | "minutes" | "min" => "minute",
        "second" | "seconds" | "s" => "second",
        "millisecond" | "milliseconds" | "ms" => "millisecond",
        _ => return None,
    })
}

impl Translator {
    pub(super) fn unary(&mut self, node: &UnaryOperation) -> TranslationResult<SqlFragment> {
        let operand = self.evaluate(&node.operand)?;
        if node.operator == UnaryOperator::Plus {
            return Ok(operand);
        }
        if let FragmentOrigin::QuantityLiteral { value, unit } = operand.origin().clone() {
            let value = negated_text(&value);
            return Ok(operand
                .derive(
                    self.dialect.json_object(&[
                        ("value", value.clone()),
                        ("unit", self.dialect.string_literal(&unit)),
                    ]),
                    operand.result_type().clone(),
                )
                .with_origin(FragmentOrigin::QuantityLiteral { value, unit }));
        }
        let (number, scalar) = self.numeric_value(&operand);
        let fhir_type = if scalar == SqlScalar::Integer { "integer" } else { "decimal" };
        Ok(operand.derive(
            format!("(-{})", number),
            ResultType::native(scalar, Some(fhir_type)),
        ))
    }

    pub(super) fn binary(&mut self, node: &BinaryOperation) -> TranslationResult<SqlFragment> {
        let left = self.evaluate(&node.left)?;
        let right = self.evaluate(&node.right)?;
        log::trace!("binary '{}' at {}", node.operator.symbol(), node.span);

        let mut fragment = match node.operator {
            BinaryOperator::And
            | BinaryOperator::Or
            | BinaryOperator::Xor
            | BinaryOperator::Implies => self.logical(&left, &right, node.operator),
            BinaryOperator::Equivalent | BinaryOperator::NotEquivalent => {
                self.equivalence(&left, &right, node.operator == BinaryOperator::NotEquivalent)
            }
            BinaryOperator::In => self.membership(&right, &left),
            BinaryOperator::Contains => self.membership(&left, &right),
            BinaryOperator::Concatenate => {
                let l = self.text_or_empty(&left);
                let r = self.text_or_empty(&right);
                left.derive(
                    format!("({} || {})", l, r),
                    ResultType::native(SqlScalar::String, Some("string")),
                )
            }
            operator => match comparison_symbol(operator) {
                Some(symbol) => self.comparison(&left, &right, symbol),
                None => self.arithmetic(&left, &right, operator, node.span)?,
            },
        };
        fragment.merge_dependencies(&right);
        Ok(fragment)
    }

    /// Scalar type the fragment is known to carry, if any.
    fn scalar_hint(&self, fragment: &SqlFragment) -> Option<SqlScalar> {
        fragment.native_scalar().or_else(|| {
            fragment
                .fhir_type()
                .filter(|t| self.registry.is_primitive(t))
                .map(scalar_for_type)
        })
    }

    fn is_complex(&self, fragment: &SqlFragment) -> bool {
        fragment.result_type().is_json() && !self.is_primitive_type(fragment.fhir_type())
    }

    fn logical(&self, left: &SqlFragment, right: &SqlFragment, operator: BinaryOperator) -> SqlFragment {
        let l = self.boolean_value(left);
        let r = self.boolean_value(right);
        let expr = match operator {
            BinaryOperator::And => format!("({} AND {})", l, r),
            BinaryOperator::Or => format!("({} OR {})", l, r),
            BinaryOperator::Xor => format!("({} <> {})", l, r),
            _ => format!("((NOT {}) OR {})", l, r),
        };
        left.derive(expr, ResultType::native(SqlScalar::Boolean, Some("boolean")))
    }

    fn comparison(&self, left: &SqlFragment, right: &SqlFragment, symbol: &str) -> SqlFragment {
        let boolean = ResultType::native(SqlScalar::Boolean, Some("boolean"));
        if let Some(expr) = self.quantity_comparison(left, right, symbol) {
            return left.derive(expr, boolean);
        }
        let l = self.singleton(left);
        let r = self.singleton(right);
        let expr = if self.is_complex(&l) && self.is_complex(&r) {
            format!("({} {} {})", self.json_key(&l), symbol, self.json_key(&r))
        } else {
            let scalar = unify_scalars(self.scalar_hint(&l), self.scalar_hint(&r));
            format!(
                "({} {} {})",
                self.scalar_value(&l, scalar),
                symbol,
                self.scalar_value(&r, scalar)
            )
        };
        left.derive(expr, boolean)
    }

    /// Comparison against a quantity literal: the value is compared when the
    /// other side's code (or unit) matches the literal's unit.
    fn quantity_comparison(&self, left: &SqlFragment, right: &SqlFragment, symbol: &str) -> Option<String> {
        let (other, value, unit, symbol) = match (left.origin(), right.origin()) {
            (_, FragmentOrigin::QuantityLiteral { value, unit }) => (left, value, unit, symbol),
            (FragmentOrigin::QuantityLiteral { value, unit }, _) => {
                (right, value, unit, mirrored(symbol))
            }
            _ => return None,
        };

        if let FragmentOrigin::QuantityLiteral {
            value: other_value,
            unit: other_unit,
        } = other.origin()
        {
            if other_unit != unit {
                return Some("NULL".to_string());
            }
            return Some(format!("({} {} {})", other_value, symbol, value));
        }

        let quantity = match other.origin() {
            FragmentOrigin::Polymorphic {
                root,
                path,
                variants,
            } => {
                let variant = variants
                    .iter()
                    .find(|v| TypeFamily::Quantity.contains(&v.type_name))?;
                let mut full = path.clone();
                full.push(variant.field_name.clone());
                self.dialect.extract_json(root, &full)
            }
            _ if !other.result_type().is_json() => return Some("NULL".to_string()),
            _ => {
                if let Some(t) = other.fhir_type() {
                    if !self.registry.is_subtype(t, "Quantity") {
                        return Some("NULL".to_string());
                    }
                }
                self.singleton(other).expression
            }
        };

        let code = self.dialect.extract_string(&quantity, &["code".to_string()]);
        let unit_text = self.dialect.extract_string(&quantity, &["unit".to_string()]);
        let number =
            self.dialect
                .extract_scalar(&quantity, &["value".to_string()], SqlScalar::Decimal);
        Some(format!(
            "(CASE WHEN COALESCE({}, {}) = {} THEN {} {} {} END)",
            code,
            unit_text,
            quote_literal(unit),
            number,
            symbol,
            value
        ))
    }

    /// `~`: empty equals empty, strings ignore case and surrounding blanks.
    fn equivalence(&self, left: &SqlFragment, right: &SqlFragment, negate: bool) -> SqlFragment {
        let l = self.singleton(left);
        let r = self.singleton(right);
        let (a, b) = if self.is_complex(&l) && self.is_complex(&r) {
            (self.json_key(&l), self.json_key(&r))
        } else {
            match unify_scalars(self.scalar_hint(&l), self.scalar_hint(&r)) {
                SqlScalar::String => (
                    format!("lower(trim({}))", self.string_value(&l)),
                    format!("lower(trim({}))", self.string_value(&r)),
                ),
                scalar => (self.scalar_value(&l, scalar), self.scalar_value(&r, scalar)),
            }
        };
        let expr = format!("({} IS NOT DISTINCT FROM {})", a, b);
        let expr = if negate { format!("(NOT {})", expr) } else { expr };
        left.derive(expr, ResultType::native(SqlScalar::Boolean, Some("boolean")))
    }

    /// `item in collection`; an empty item gives empty.
    fn membership(&mut self, collection: &SqlFragment, item: &SqlFragment) -> SqlFragment {
        let item = self.singleton(item);
        let rows = self.collection_rows(collection);
        let condition = if self.is_complex(&item) && self.is_complex(&rows.element) {
            format!("{} = {}", self.json_key(&rows.element), self.json_key(&item))
        } else {
            let scalar = unify_scalars(self.scalar_hint(&rows.element), self.scalar_hint(&item));
            format!(
                "{} = {}",
                self.scalar_value(&rows.element, scalar),
                self.scalar_value(&item, scalar)
            )
        };
        let expr = format!(
            "(CASE WHEN {} IS NULL THEN NULL ELSE {} END)",
            item.expression,
            rows.exists(Some(&condition))
        );
        item.derive(expr, ResultType::native(SqlScalar::Boolean, Some("boolean")))
    }

    fn text_or_empty(&self, fragment: &SqlFragment) -> String {
        if is_empty_literal(fragment) {
            return self.dialect.string_literal("");
        }
        format!(
            "COALESCE({}, {})",
            self.string_value(fragment),
            self.dialect.string_literal("")
        )
    }

    fn arithmetic(
        &self,
        left: &SqlFragment,
        right: &SqlFragment,
        operator: BinaryOperator,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        if let (
            BinaryOperator::Add | BinaryOperator::Subtract,
            FragmentOrigin::QuantityLiteral { value, unit },
        ) = (operator, right.origin())
        {
            if let Some(temporal) = self.temporal_scalar(left) {
                return self.shift_temporal(left, temporal, value, unit, operator, span);
            }
        }

        let l = self.singleton(left);
        let r = self.singleton(right);
        let (l_hint, r_hint) = (self.scalar_hint(&l), self.scalar_hint(&r));
        if operator == BinaryOperator::Add
            && l_hint == Some(SqlScalar::String)
            && r_hint == Some(SqlScalar::String)
        {
            return Ok(left.derive(
                format!("({} || {})", l.expression, r.expression),
                ResultType::native(SqlScalar::String, Some("string")),
            ));
        }

        let (_, l_scalar) = self.numeric_value(&l);
        let (_, r_scalar) = self.numeric_value(&r);
        let scalar = if l_scalar == SqlScalar::Integer && r_scalar == SqlScalar::Integer {
            SqlScalar::Integer
        } else {
            SqlScalar::Decimal
        };
        let d = &self.dialect;
        let (expr, result) = match operator {
            BinaryOperator::Divide => (
                format!(
                    "({} / NULLIF({}, 0))",
                    self.scalar_value(&l, SqlScalar::Decimal),
                    self.scalar_value(&r, SqlScalar::Decimal)
                ),
                SqlScalar::Decimal,
            ),
            BinaryOperator::IntegerDivide if scalar == SqlScalar::Integer => (
                d.integer_divide(&self.scalar_value(&l, scalar), &self.scalar_value(&r, scalar)),
                SqlScalar::Integer,
            ),
            BinaryOperator::IntegerDivide => (
                d.cast(
                    &format!(
                        "trunc({} / NULLIF({}, 0))",
                        self.scalar_value(&l, scalar),
                        self.scalar_value(&r, scalar)
                    ),
                    SqlScalar::Integer,
                ),
                SqlScalar::Integer,
            ),
            BinaryOperator::Modulo => (
                d.modulo(&self.scalar_value(&l, scalar), &self.scalar_value(&r, scalar)),
                scalar,
            ),
            BinaryOperator::Multiply | BinaryOperator::Add | BinaryOperator::Subtract => (
                format!(
                    "({} {} {})",
                    self.scalar_value(&l, scalar),
                    operator.symbol(),
                    self.scalar_value(&r, scalar)
                ),
                scalar,
            ),
            other => {
                return Err(TranslationError::UnsupportedOperation {
                    message: format!("operator '{}' is not arithmetic", other.symbol()),
                    span,
                })
            }
        };
        let fhir_type = if result == SqlScalar::Integer { "integer" } else { "decimal" };
        Ok(left.derive(expr, ResultType::native(result, Some(fhir_type))))
    }

    /// Native temporal type of a date, dateTime or time value.
    fn temporal_scalar(&self, fragment: &SqlFragment) -> Option<SqlScalar> {
        match fragment.native_scalar() {
            Some(scalar @ (SqlScalar::Date | SqlScalar::DateTime | SqlScalar::Time)) => Some(scalar),
            _ => match fragment.fhir_type().and_then(TypeFamily::of_member) {
                Some(TypeFamily::Date) => Some(SqlScalar::Date),
                Some(TypeFamily::DateTime) => Some(SqlScalar::DateTime),
                Some(TypeFamily::Time) => Some(SqlScalar::Time),
                _ => None,
            },
        }
    }

    fn shift_temporal(
        &self,
        temporal: &SqlFragment,
        scalar: SqlScalar,
        amount: &str,
        unit: &str,
        operator: BinaryOperator,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        let unit = interval_unit(unit).ok_or_else(|| TranslationError::UnsupportedOperation {
            message: format!("'{}' is not a time unit", unit),
            span,
        })?;
        let amount = if operator == BinaryOperator::Subtract {
            negated_text(amount)
        } else {
            amount.to_string()
        };
        let value = self.scalar_value(temporal, scalar);
        let shifted = self.dialect.add_interval(&value, &amount, unit);
        let (expr, fhir_type) = match scalar {
            SqlScalar::Date => (self.dialect.cast(&shifted, SqlScalar::Date), "date"),
            SqlScalar::Time => (shifted, "time"),
            _ => (shifted, "dateTime"),
        };
        Ok(temporal.derive(expr, ResultType::native(scalar, Some(fhir_type))))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::sql_dialect::DialectKind;
    use test_case::test_case;

    #[test_case("1 + 2", "(1 + 2)" ; "integer addition")]
    #[test_case("5 / 2", "(CAST(5 AS DECIMAL(38, 10)) / NULLIF(CAST(2 AS DECIMAL(38, 10)), 0))" ; "division is decimal")]
    #[test_case("7 div 2", "(7 // NULLIF(2, 0))" ; "integer division")]
    #[test_case("7 mod 2", "(7 % NULLIF(2, 0))" ; "modulo")]
    #[test_case("'a' + 'b'", "('a' || 'b')" ; "string addition")]
    #[test_case("true implies false", "((NOT TRUE) OR FALSE)" ; "implies")]
    #[test_case("true xor false", "(TRUE <> FALSE)" ; "xor")]
    #[test_case("-5", "(-5)" ; "negation")]
    fn test_operator_sql(text: &str, expected: &str) {
        assert_eq!(result(text).expression, expected);
    }

    #[test]
    fn test_concatenation_treats_empty_as_blank() {
        assert_eq!(result("'a' & {}").expression, "(COALESCE('a', '') || '')");
    }

    #[test_case("{} + 1" ; "empty left operand")]
    #[test_case("1 + {}" ; "empty right operand")]
    #[test_case("{} = 1" ; "empty equality")]
    #[test_case("{}.abs()" ; "empty abs")]
    #[test_case("{}.not()" ; "empty not")]
    fn test_empty_literal_is_typed_json_on_postgres(text: &str) {
        let expression = translate(text, DialectKind::Postgres)
            .unwrap()
            .result()
            .cloned()
            .unwrap()
            .expression;
        assert!(!expression.contains("(NULL #>>"), "{}", expression);
        assert!(!expression.contains("(NULL ->"), "{}", expression);
    }

    #[test]
    fn test_mixed_numeric_comparison_is_decimal() {
        assert_eq!(
            result("1 < 1.5").expression,
            "(CAST(1 AS DECIMAL(38, 10)) < 1.5)"
        );
    }

    #[test]
    fn test_document_date_compares_as_date() {
        let fragment = result("Patient.birthDate > @2000-01-01");
        assert!(fragment.expression.contains("TRY_CAST("));
        assert!(fragment.expression.ends_with("> DATE '2000-01-01')"));
    }

    #[test]
    fn test_quantity_comparison_checks_unit() {
        let fragment = result("Observation.value > 5 'mg'");
        assert!(fragment.expression.starts_with("(CASE WHEN COALESCE(json_extract_string("));
        assert!(fragment.expression.contains("valueQuantity"));
        assert!(fragment.expression.contains("= 'mg' THEN "));
        assert!(fragment.expression.ends_with("> 5 END)"));
    }

    #[test]
    fn test_negated_quantity_literal() {
        let fragment = result("-5 'mg'");
        assert!(matches!(
            fragment.origin(),
            FragmentOrigin::QuantityLiteral { value, .. } if value == "-5"
        ));
    }

    #[test]
    fn test_date_arithmetic_uses_intervals() {
        assert_eq!(
            result("@2020-01-15 + 1 month").expression,
            "CAST((DATE '2020-01-15' + INTERVAL '1 month') AS DATE)"
        );
        assert_eq!(
            result("@2020-01-15 - 2 'wk'").expression,
            "CAST((DATE '2020-01-15' + INTERVAL '-2 week') AS DATE)"
        );
        assert!(matches!(
            error("@2020-01-15 + 1 'mg'"),
            TranslationError::UnsupportedOperation { .. }
        ));
    }

    #[test]
    fn test_equivalence_folds_case() {
        assert_eq!(
            result("'a' ~ 'A '").expression,
            "(lower(trim('a')) IS NOT DISTINCT FROM lower(trim('A ')))"
        );
    }

    #[test]
    fn test_membership_is_exists() {
        let fragment = result("2 in (1 | 2)");
        assert!(fragment.expression.starts_with("(CASE WHEN 2 IS NULL THEN NULL ELSE (EXISTS"));
        assert_eq!(fragment.native_scalar(), Some(SqlScalar::Boolean));
    }

    #[test]
    fn test_unify_scalars() {
        use SqlScalar::*;
        assert_eq!(unify_scalars(Some(Integer), Some(Decimal)), Decimal);
        assert_eq!(unify_scalars(None, Some(Date)), Date);
        assert_eq!(unify_scalars(Some(String), Some(DateTime)), DateTime);
        assert_eq!(unify_scalars(Some(Boolean), Some(Integer)), String);
    }
}
