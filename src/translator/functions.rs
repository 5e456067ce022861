//! Function invocation and the value-mode function library.

use super::function_registry::resolve_function;
use super::iteration::applies_to_rows;
use super::literals::is_empty_literal;
use super::operators::unify_scalars;
use super::{
    Cardinality, CollectionFunction, FragmentOrigin, Mode, ResultType, SqlFragment,
    TranslationError, TranslationResult, Translator,
};
use crate::fhirpath_parser::ast::{
    build, BinaryOperator, Expression, FunctionCall, Literal, LiteralNode, Span, TypeOperator,
};
use crate::sql_dialect::{bind_once, quote_literal, JsonKind, SqlScalar};
use crate::type_catalog::TypeTarget;

const INTEGER_TEXT: &str = "^[+-]?[0-9]+$";
const DECIMAL_TEXT: &str = "^[+-]?[0-9]+(\\.[0-9]+)?$";
const TRUE_WORDS: &str = "'true', 't', 'yes', 'y', '1', '1.0'";
const FALSE_WORDS: &str = "'false', 'f', 'no', 'n', '0', '0.0'";

fn typed(receiver: &SqlFragment, expr: String, scalar: SqlScalar, fhir_type: &str) -> SqlFragment {
    receiver.derive(expr, ResultType::native(scalar, Some(fhir_type)))
}

fn boolean(receiver: &SqlFragment, expr: String) -> SqlFragment {
    typed(receiver, expr, SqlScalar::Boolean, "boolean")
}

/// Mark a reducing function that is already one value per row.
fn stamped(fragment: SqlFragment, function: CollectionFunction) -> SqlFragment {
    let mut fragment = fragment.with_function(function);
    fragment.is_aggregate = true;
    fragment
}

impl Translator {
    pub(super) fn invoke(
        &mut self,
        receiver: SqlFragment,
        call: &FunctionCall,
    ) -> TranslationResult<SqlFragment> {
        let signature = resolve_function(&call.name, call.args.len(), call.span)?;
        log::trace!(
            "invoke '{}' ({:?}) at {} in {:?} mode",
            signature.name,
            signature.category,
            call.span,
            self.mode
        );

        if self.mode == Mode::Row && receiver.requires_unnest {
            if applies_to_rows(&call.name) {
                return self.invoke_on_rows(receiver, call);
            }
            let collected = self.collect(receiver)?;
            return self.invoke_value(collected, call);
        }
        self.invoke_value(receiver, call)
    }

    /// Apply `call` to a receiver that is one value (possibly a JSON
    /// array) per row of its source.
    pub(super) fn invoke_value(
        &mut self,
        receiver: SqlFragment,
        call: &FunctionCall,
    ) -> TranslationResult<SqlFragment> {
        let args = &call.args;
        let name = call.name.as_str();
        match name {
            "exists" => match args.first() {
                Some(criteria) => {
                    let filtered = self.where_value(receiver, criteria)?;
                    Ok(self.exists(&filtered))
                }
                None => Ok(self.exists(&receiver)),
            },
            "empty" => Ok(self.empty(&receiver)),
            "count" => Ok(self.count(&receiver)),
            "all" => self.all(receiver, &args[0]),
            "allTrue" | "anyTrue" | "allFalse" | "anyFalse" => {
                Ok(self.boolean_aggregate(&receiver, name))
            }
            "distinct" => Ok(self.distinct(receiver)),
            "isDistinct" => Ok(self.is_distinct(&receiver)),
            "hasValue" => Ok(self.has_value(&receiver)),
            "sum" | "avg" | "min" | "max" => {
                let function = CollectionFunction::from_name(name).ok_or_else(|| {
                    TranslationError::UnknownFunction {
                        name: name.to_string(),
                        span: call.span,
                    }
                })?;
                Ok(self.aggregate(&receiver, function))
            }
            "where" => self.where_value(receiver, &args[0]),
            "select" => self.select_value(receiver, &args[0]),
            "ofType" => {
                let type_name = self.type_argument(call)?;
                self.of_type(receiver, &type_name, call.span)
            }
            "extension" => self.extension(receiver, &args[0], call.span),
            "first" | "last" | "tail" | "single" => Ok(self.subset(&receiver, name)),
            "skip" | "take" => {
                let count = self.argument(&receiver, &args[0])?;
                let count = self.integer_value(&count);
                Ok(self.skip_take(&receiver, name, &count))
            }
            "intersect" | "exclude" | "subsetOf" | "supersetOf" => {
                let other = self.argument(&receiver, &args[0])?;
                Ok(self.set_operation(&receiver, &other, name))
            }
            "union" | "combine" => {
                let other = self.argument(&receiver, &args[0])?;
                self.combine_collections(vec![receiver, other], name == "union")
            }
            "not" => {
                let value = self.boolean_value(&receiver);
                Ok(boolean(&receiver, format!("(NOT {})", value)))
            }
            "iif" => self.iif(receiver, args),
            "toString" | "toInteger" | "toDecimal" | "toBoolean" | "toDate" | "toDateTime"
            | "toTime" | "convertsToString" | "convertsToInteger" | "convertsToDecimal"
            | "convertsToBoolean" => Ok(self.convert(&receiver, name)),
            "join" => self.join(receiver, args.first()),
            "length" | "upper" | "lower" | "trim" | "startsWith" | "endsWith" | "contains"
            | "substring" | "indexOf" | "replace" | "matches" | "replaceMatches" | "split" => {
                self.string_function(receiver, call)
            }
            "abs" | "ceiling" | "floor" | "truncate" | "round" | "sqrt" | "ln" | "exp" | "log"
            | "power" => self.math_function(receiver, call),
            "is" | "as" => {
                let type_name = self.type_argument(call)?;
                let operator = if name == "is" {
                    TypeOperator::Is
                } else {
                    TypeOperator::As
                };
                self.type_operation(receiver, operator, &type_name, call.span)
            }
            "today" => Ok(typed(&receiver, self.dialect.current_date(), SqlScalar::Date, "date")),
            "now" => Ok(typed(
                &receiver,
                self.dialect.current_timestamp(),
                SqlScalar::DateTime,
                "dateTime",
            )),
            "timeOfDay" => Ok(typed(&receiver, self.dialect.current_time(), SqlScalar::Time, "time")),
            "getResourceKey" => Ok(self.resource_key(&receiver)),
            "getReferenceKey" => self.reference_key(&receiver, call),
            "trace" => {
                let label = match &args[0] {
                    Expression::Literal(LiteralNode {
                        value: Literal::String(label),
                        ..
                    }) => label.clone(),
                    other => format!("at {}", other.span()),
                };
                log::debug!("trace '{}': {}", label, receiver.expression);
                Ok(receiver)
            }
            other => Err(TranslationError::UnknownFunction {
                name: other.to_string(),
                span: call.span,
            }),
        }
    }

    /// Indexer `[n]`, zero-based.
    pub(super) fn index(
        &mut self,
        receiver: SqlFragment,
        index: &Expression,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        log::trace!("index at {}", span);
        if self.mode == Mode::Row && receiver.requires_unnest {
            return self.row_index(receiver, index);
        }
        let position = self.argument(&receiver, index)?;
        let position = self.integer_value(&position);
        match receiver.cardinality() {
            Cardinality::Single => Ok(receiver.derive(
                format!("(CASE WHEN {} = 0 THEN {} END)", position, receiver.expression),
                receiver.result_type().clone(),
            )),
            Cardinality::Array | Cardinality::Unknown => Ok(self.element_at(&receiver, &position)),
        }
    }

    /// The type specifier passed to `is`, `as` or `ofType`.
    pub(super) fn type_argument(&self, call: &FunctionCall) -> TranslationResult<String> {
        call.args
            .first()
            .and_then(Expression::as_type_specifier)
            .ok_or_else(|| TranslationError::InvalidArgument {
                function: call.name.clone(),
                message: "expected a type name".to_string(),
                span: call.span,
            })
    }

    // ---- existence ------------------------------------------------------

    fn exists(&mut self, receiver: &SqlFragment) -> SqlFragment {
        let expr = match receiver.cardinality() {
            Cardinality::Single => format!("({} IS NOT NULL)", receiver.expression),
            _ => self.collection_rows(receiver).exists(None),
        };
        stamped(boolean(receiver, expr), CollectionFunction::Exists)
    }

    fn empty(&mut self, receiver: &SqlFragment) -> SqlFragment {
        let expr = match receiver.cardinality() {
            Cardinality::Single => format!("({} IS NULL)", receiver.expression),
            _ => self.collection_rows(receiver).not_exists(None),
        };
        stamped(boolean(receiver, expr), CollectionFunction::Empty)
    }

    fn count(&mut self, receiver: &SqlFragment) -> SqlFragment {
        let expr = match receiver.cardinality() {
            Cardinality::Single => format!(
                "(CASE WHEN {} IS NULL THEN 0 ELSE 1 END)",
                receiver.expression
            ),
            _ => self.collection_rows(receiver).subquery("COUNT(*)", None),
        };
        stamped(
            typed(receiver, expr, SqlScalar::Integer, "integer"),
            CollectionFunction::Count,
        )
    }

    fn all(&mut self, receiver: SqlFragment, criteria: &Expression) -> TranslationResult<SqlFragment> {
        let rows = self.collection_rows(&receiver);
        let frame = self.element_frame(&receiver, &rows);
        let condition = self.evaluate_with(frame, criteria)?;
        let condition = self.boolean_value(&condition);
        let expr = rows.not_exists(Some(&format!("NOT COALESCE({}, FALSE)", condition)));
        Ok(boolean(&receiver, expr))
    }

    fn boolean_aggregate(&mut self, receiver: &SqlFragment, name: &str) -> SqlFragment {
        let rows = self.collection_rows(receiver);
        let value = self.boolean_value(&rows.element);
        let expr = match name {
            "allTrue" => rows.not_exists(Some(&format!("NOT COALESCE({}, FALSE)", value))),
            "anyTrue" => rows.exists(Some(&value)),
            "allFalse" => rows.not_exists(Some(&format!("COALESCE({}, TRUE)", value))),
            _ => rows.exists(Some(&format!("NOT {}", value))),
        };
        boolean(receiver, expr)
    }

    fn distinct(&mut self, receiver: SqlFragment) -> SqlFragment {
        if receiver.cardinality() == Cardinality::Single {
            return receiver;
        }
        let rows = self.collection_rows(&receiver);
        let expr = self.first_occurrences(&rows, None);
        receiver.derive(
            expr,
            ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Array),
        )
    }

    /// JSON array of the first occurrence of every distinct element of
    /// `rows` satisfying `condition`, in collection order.
    fn first_occurrences(&mut self, rows: &super::collection::CollectionRows, condition: Option<&str>) -> String {
        let key = self.json_key(&rows.element);
        let alias = self.ctes.next_alias("d");
        let mut inner = format!(
            "SELECT {raw} AS value, {ord} AS ordinality, ROW_NUMBER() OVER (PARTITION BY {key} ORDER BY {ord}) AS _dup FROM {from}",
            raw = rows.raw,
            ord = rows.ordinal,
            key = key,
            from = rows.from_item
        );
        if let Some(condition) = condition {
            inner.push_str(&format!(" WHERE {}", condition));
        }
        format!(
            "(SELECT {} FROM ({}) AS {a} WHERE {a}._dup = 1)",
            self.dialect.aggregate_to_array(
                &format!("{}.value", alias),
                &format!("{}.ordinality", alias)
            ),
            inner,
            a = alias
        )
    }

    fn is_distinct(&mut self, receiver: &SqlFragment) -> SqlFragment {
        let expr = match receiver.cardinality() {
            Cardinality::Single => "TRUE".to_string(),
            _ => {
                let rows = self.collection_rows(receiver);
                let key = self.json_key(&rows.element);
                rows.subquery(&format!("COUNT(*) = COUNT(DISTINCT {})", key), None)
            }
        };
        boolean(receiver, expr)
    }

    fn has_value(&self, receiver: &SqlFragment) -> SqlFragment {
        let single = self.singleton(receiver);
        let value = &single.expression;
        let expr = if single.native_scalar().is_some() || self.is_primitive_type(single.fhir_type()) {
            format!("({} IS NOT NULL)", value)
        } else if single.fhir_type().is_some() {
            "FALSE".to_string()
        } else {
            format!(
                "({} IS NOT NULL AND NOT {})",
                value,
                self.dialect.json_type_check(value, JsonKind::Object)
            )
        };
        boolean(receiver, expr)
    }

    fn aggregate(&mut self, receiver: &SqlFragment, function: CollectionFunction) -> SqlFragment {
        let rows = self.collection_rows(receiver);
        let element = rows.element.clone();
        let (select, result_type) = match function {
            CollectionFunction::Sum => {
                let (number, scalar) = self.numeric_value(&element);
                (
                    format!("COALESCE(SUM({}), 0)", number),
                    ResultType::native(scalar, element.fhir_type()),
                )
            }
            CollectionFunction::Avg => (
                format!("AVG({})", self.scalar_value(&element, SqlScalar::Decimal)),
                ResultType::native(SqlScalar::Decimal, Some("decimal")),
            ),
            _ => {
                let scalar = self.value_scalar(&element);
                let sql = if function == CollectionFunction::Min { "MIN" } else { "MAX" };
                (
                    format!("{}({})", sql, self.scalar_value(&element, scalar)),
                    ResultType::native(scalar, element.fhir_type()),
                )
            }
        };
        stamped(receiver.derive(rows.subquery(&select, None), result_type), function)
    }

    // ---- filtering and projection ---------------------------------------

    pub(super) fn where_value(
        &mut self,
        receiver: SqlFragment,
        criteria: &Expression,
    ) -> TranslationResult<SqlFragment> {
        match receiver.cardinality() {
            Cardinality::Single => {
                // the receiver is bound once in a one-row subquery
                let rows = self.collection_rows(&receiver);
                let frame = self.element_frame(&receiver, &rows);
                let condition = self.evaluate_with(frame, criteria)?;
                let condition = self.boolean_value(&condition);
                Ok(receiver.derive(
                    rows.subquery(&rows.raw, Some(&condition)),
                    receiver.result_type().clone(),
                ))
            }
            Cardinality::Array | Cardinality::Unknown => {
                let rows = self.collection_rows(&receiver);
                let frame = self.element_frame(&receiver, &rows);
                let condition = self.evaluate_with(frame, criteria)?;
                let condition = self.boolean_value(&condition);
                let expr = self.aggregate_rows(&rows, &rows.raw, Some(&condition));
                Ok(receiver.derive(
                    expr,
                    ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Array),
                ))
            }
        }
    }

    fn select_value(
        &mut self,
        receiver: SqlFragment,
        projection: &Expression,
    ) -> TranslationResult<SqlFragment> {
        match receiver.cardinality() {
            Cardinality::Single => {
                let rows = self.collection_rows(&receiver);
                let frame = self.element_frame(&receiver, &rows);
                let projected = self.evaluate_with(frame, projection)?;
                Ok(projected.derive(
                    rows.subquery(&projected.expression, None),
                    projected.result_type().clone(),
                ))
            }
            Cardinality::Array | Cardinality::Unknown => {
                let rows = self.collection_rows(&receiver);
                let frame = self.element_frame(&receiver, &rows);
                let projected = self.evaluate_with(frame, projection)?;
                let expr = self.aggregate_mapped(&rows, &projected, None);
                Ok(receiver.derive(
                    expr,
                    ResultType::json(projected.fhir_type().map(str::to_string), Cardinality::Array),
                ))
            }
        }
    }

    /// `extension(url)`: the receiver's extensions whose `url` matches.
    fn extension(
        &mut self,
        receiver: SqlFragment,
        url: &Expression,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        let extensions = match receiver.origin().clone() {
            // a primitive read from its `{value, extension}` form
            FragmentOrigin::Document { root, mut path } if !receiver.result_type().is_json() => {
                path.push("extension".to_string());
                let array = receiver.derive(
                    self.dialect.extract_json(&root, &path),
                    ResultType::json(Some("Extension".to_string()), Cardinality::Array),
                );
                self.array_in_mode(array, "extension")?
            }
            _ => self.member(receiver, "extension", span)?,
        };
        let predicate = build::binary(BinaryOperator::Equal, build::identifier("url"), url.clone());
        if self.mode == Mode::Row && extensions.requires_unnest {
            self.row_where(extensions, &predicate)
        } else {
            self.where_value(extensions, &predicate)
        }
    }

    // ---- subsetting -----------------------------------------------------

    fn element_at(&self, receiver: &SqlFragment, position: &str) -> SqlFragment {
        let array = self.array_expression(receiver);
        let element = receiver.derive(
            self.dialect.json_array_element(&array, position),
            ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Single),
        );
        self.finish(element)
    }

    fn subset(&mut self, receiver: &SqlFragment, name: &str) -> SqlFragment {
        if receiver.cardinality() == Cardinality::Single {
            return match name {
                "tail" => receiver.derive(
                    "NULL",
                    ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Array),
                ),
                _ => receiver.clone(),
            };
        }
        match name {
            "first" => self.element_at(receiver, "0"),
            "last" => {
                let array = self.array_expression(receiver);
                let expr = bind_once(&array, |a| {
                    let last = format!("{} - 1", self.dialect.json_array_length(a));
                    self.dialect.json_array_element(a, &last)
                });
                let element = receiver.derive(
                    expr,
                    ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Single),
                );
                self.finish(element)
            }
            "single" => self.singleton(receiver),
            _ => {
                let rows = self.collection_rows(receiver);
                let condition = format!("{} > 1", rows.ordinal);
                let expr = self.aggregate_rows(&rows, &rows.raw, Some(&condition));
                receiver.derive(
                    expr,
                    ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Array),
                )
            }
        }
    }

    fn skip_take(&mut self, receiver: &SqlFragment, name: &str, count: &str) -> SqlFragment {
        let skip = name == "skip";
        if receiver.cardinality() == Cardinality::Single {
            let keep = if skip {
                format!("{} <= 0", count)
            } else {
                format!("{} >= 1", count)
            };
            return receiver.derive(
                format!("(CASE WHEN {} THEN {} END)", keep, receiver.expression),
                receiver.result_type().clone(),
            );
        }
        let rows = self.collection_rows(receiver);
        let condition = if skip {
            format!("{} > {}", rows.ordinal, count)
        } else {
            format!("{} <= {}", rows.ordinal, count)
        };
        let expr = self.aggregate_rows(&rows, &rows.raw, Some(&condition));
        receiver.derive(
            expr,
            ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Array),
        )
    }

    /// Set functions compare elements by their JSON encoding.
    fn set_operation(&mut self, receiver: &SqlFragment, other: &SqlFragment, name: &str) -> SqlFragment {
        let left = self.collection_rows(receiver);
        let right = self.collection_rows(other);
        let left_key = self.json_key(&left.element);
        let right_key = self.json_key(&right.element);
        let in_right = right.exists(Some(&format!("{} = {}", right_key, left_key)));

        let array_type = ResultType::json(receiver.fhir_type().map(str::to_string), Cardinality::Array);
        match name {
            "intersect" => {
                let expr = self.first_occurrences(&left, Some(&in_right));
                receiver.derive(expr, array_type)
            }
            "exclude" => {
                let condition = format!("NOT {}", in_right);
                let expr = self.aggregate_rows(&left, &left.raw, Some(&condition));
                receiver.derive(expr, array_type)
            }
            "subsetOf" => {
                let expr = left.not_exists(Some(&format!("NOT {}", in_right)));
                boolean(receiver, expr)
            }
            _ => {
                let in_left = left.exists(Some(&format!("{} = {}", left_key, right_key)));
                let expr = right.not_exists(Some(&format!("NOT {}", in_left)));
                boolean(receiver, expr)
            }
        }
    }

    // ---- control --------------------------------------------------------

    fn iif(&mut self, receiver: SqlFragment, args: &[Expression]) -> TranslationResult<SqlFragment> {
        let criterion = self.argument(&receiver, &args[0])?;
        let criterion = self.boolean_value(&criterion);
        let then = self.argument(&receiver, &args[1])?;
        let otherwise = match args.get(2) {
            Some(arg) => Some(self.argument(&receiver, arg)?),
            None => None,
        };

        let (then_sql, otherwise_sql, result_type) = self.unify_branches(&then, otherwise.as_ref());
        let expr = match otherwise_sql {
            Some(otherwise_sql) => format!(
                "(CASE WHEN {} THEN {} ELSE {} END)",
                criterion, then_sql, otherwise_sql
            ),
            None => format!("(CASE WHEN {} THEN {} END)", criterion, then_sql),
        };
        Ok(receiver.derive(expr, result_type))
    }

    /// Bring both branches of `iif` to one SQL type.
    fn unify_branches(
        &self,
        then: &SqlFragment,
        otherwise: Option<&SqlFragment>,
    ) -> (String, Option<String>, ResultType) {
        let Some(otherwise) = otherwise.filter(|o| !is_empty_literal(o)) else {
            return (then.expression.clone(), None, then.result_type().clone());
        };
        if is_empty_literal(then) {
            return (
                "NULL".to_string(),
                Some(otherwise.expression.clone()),
                otherwise.result_type().clone(),
            );
        }

        let same_type = (then.fhir_type() == otherwise.fhir_type())
            .then(|| then.fhir_type())
            .flatten();
        match (then.native_scalar(), otherwise.native_scalar()) {
            (Some(a), Some(b)) => {
                let scalar = unify_scalars(Some(a), Some(b));
                (
                    self.scalar_value(then, scalar),
                    Some(self.scalar_value(otherwise, scalar)),
                    ResultType::native(scalar, same_type),
                )
            }
            _ => {
                let cardinality = if then.is_collection() || otherwise.is_collection() {
                    Cardinality::Unknown
                } else {
                    Cardinality::Single
                };
                (
                    self.json_value(then),
                    Some(self.json_value(otherwise)),
                    ResultType::json(same_type.map(str::to_string), cardinality),
                )
            }
        }
    }

    // ---- conversion -----------------------------------------------------

    fn convert(&self, receiver: &SqlFragment, name: &str) -> SqlFragment {
        let single = self.singleton(receiver);
        let (target, fhir_type) = match name.trim_start_matches("convertsTo").trim_start_matches("to") {
            "String" => (SqlScalar::String, "string"),
            "Integer" => (SqlScalar::Integer, "integer"),
            "Decimal" => (SqlScalar::Decimal, "decimal"),
            "Boolean" => (SqlScalar::Boolean, "boolean"),
            "Date" => (SqlScalar::Date, "date"),
            "DateTime" => (SqlScalar::DateTime, "dateTime"),
            _ => (SqlScalar::Time, "time"),
        };
        let converted = self.converted(&single, target);
        if name.starts_with("convertsTo") {
            boolean(
                receiver,
                format!(
                    "(CASE WHEN {} IS NULL THEN NULL ELSE ({}) IS NOT NULL END)",
                    single.expression, converted
                ),
            )
        } else {
            typed(receiver, converted, target, fhir_type)
        }
    }

    /// `single` converted to `target`; NULL when it does not convert.
    fn converted(&self, single: &SqlFragment, target: SqlScalar) -> String {
        let source = self.value_scalar(single);
        let guarded = |pattern: &str| {
            let text = self.string_value(single);
            format!(
                "(CASE WHEN {} THEN {} END)",
                self.dialect.regex_match(&text, &quote_literal(pattern)),
                self.dialect.try_cast(&text, target)
            )
        };
        let from_boolean = |yes: &str, no: &str| {
            let value = self.boolean_value(single);
            format!("(CASE WHEN {v} THEN {} WHEN NOT {v} THEN {} END)", yes, no, v = value)
        };

        match (target, source) {
            (target, source) if target == source => self.scalar_value(single, target),
            (SqlScalar::String, _) => self.string_value(single),
            (SqlScalar::Integer, SqlScalar::Boolean) => from_boolean("1", "0"),
            (SqlScalar::Integer, SqlScalar::String) => guarded(INTEGER_TEXT),
            (SqlScalar::Decimal, SqlScalar::Integer) => self.scalar_value(single, SqlScalar::Decimal),
            (SqlScalar::Decimal, SqlScalar::Boolean) => from_boolean("1.0", "0.0"),
            (SqlScalar::Decimal, SqlScalar::String) => guarded(DECIMAL_TEXT),
            (SqlScalar::Boolean, SqlScalar::Integer | SqlScalar::Decimal) => {
                let number = self.scalar_value(single, source);
                format!(
                    "(CASE WHEN {n} = 1 THEN TRUE WHEN {n} = 0 THEN FALSE END)",
                    n = number
                )
            }
            (SqlScalar::Boolean, SqlScalar::String) => {
                let text = format!("lower({})", self.string_value(single));
                format!(
                    "(CASE WHEN {t} IN ({}) THEN TRUE WHEN {t} IN ({}) THEN FALSE END)",
                    TRUE_WORDS,
                    FALSE_WORDS,
                    t = text
                )
            }
            (SqlScalar::Date | SqlScalar::DateTime | SqlScalar::Time, SqlScalar::String) => {
                self.dialect.try_cast(&self.string_value(single), target)
            }
            (SqlScalar::Date, SqlScalar::DateTime) | (SqlScalar::DateTime, SqlScalar::Date) => {
                self.dialect.cast(&self.scalar_value(single, source), target)
            }
            _ => "NULL".to_string(),
        }
    }

    // ---- strings --------------------------------------------------------

    fn string_function(
        &mut self,
        receiver: SqlFragment,
        call: &FunctionCall,
    ) -> TranslationResult<SqlFragment> {
        let single = self.singleton(&receiver);
        let text = self.string_value(&single);
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.argument(&receiver, arg)?);
        }
        let string_arg = |t: &Self, i: usize| t.string_value(&args[i]);
        let d = &self.dialect;

        let fragment = match call.name.as_str() {
            "length" => typed(&receiver, d.string_length(&text), SqlScalar::Integer, "integer"),
            "upper" | "lower" | "trim" => typed(
                &receiver,
                format!("{}({})", call.name, text),
                SqlScalar::String,
                "string",
            ),
            "startsWith" => boolean(&receiver, d.starts_with(&text, &string_arg(self, 0))),
            "endsWith" => boolean(&receiver, d.ends_with(&text, &string_arg(self, 0))),
            "contains" => boolean(&receiver, d.string_contains(&text, &string_arg(self, 0))),
            "matches" => boolean(&receiver, d.regex_match(&text, &string_arg(self, 0))),
            "indexOf" => typed(
                &receiver,
                format!("({} - 1)", d.string_position(&text, &string_arg(self, 0))),
                SqlScalar::Integer,
                "integer",
            ),
            "substring" => {
                let start = self.integer_value(&args[0]);
                let length = args.get(1).map(|a| self.integer_value(a));
                typed(
                    &receiver,
                    format!(
                        "(CASE WHEN {s} >= 0 AND {s} < {len} THEN {} END)",
                        d.substring(&text, &format!("{} + 1", start), length.as_deref()),
                        s = start,
                        len = d.string_length(&text)
                    ),
                    SqlScalar::String,
                    "string",
                )
            }
            "replace" => typed(
                &receiver,
                format!(
                    "replace({}, {}, {})",
                    text,
                    string_arg(self, 0),
                    string_arg(self, 1)
                ),
                SqlScalar::String,
                "string",
            ),
            "replaceMatches" => typed(
                &receiver,
                d.regex_replace(&text, &string_arg(self, 0), &string_arg(self, 1)),
                SqlScalar::String,
                "string",
            ),
            "split" => receiver.derive(
                d.split_to_array(&text, &string_arg(self, 0)),
                ResultType::json(Some("string".to_string()), Cardinality::Array),
            ),
            other => {
                return Err(TranslationError::UnknownFunction {
                    name: other.to_string(),
                    span: call.span,
                })
            }
        };
        Ok(fragment)
    }

    /// `join([separator])` concatenates every element in order.
    fn join(&mut self, receiver: SqlFragment, separator: Option<&Expression>) -> TranslationResult<SqlFragment> {
        let separator = match separator {
            Some(arg) => {
                let separator = self.argument(&receiver, arg)?;
                self.string_value(&separator)
            }
            None => self.dialect.string_literal(""),
        };
        let rows = self.collection_rows(&receiver);
        let value = self.string_value(&rows.element);
        let aggregate = self.dialect.string_agg(&value, &separator, &rows.ordinal);
        Ok(typed(
            &receiver,
            rows.subquery(&aggregate, None),
            SqlScalar::String,
            "string",
        ))
    }

    // ---- math -----------------------------------------------------------

    fn math_function(
        &mut self,
        receiver: SqlFragment,
        call: &FunctionCall,
    ) -> TranslationResult<SqlFragment> {
        let single = self.singleton(&receiver);
        let (number, scalar) = self.numeric_value(&single);
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.argument(&receiver, arg)?);
        }
        let d = &self.dialect;
        let decimal = |expr: String| (expr, SqlScalar::Decimal);

        let (expr, result) = match call.name.as_str() {
            "abs" => (format!("abs({})", number), scalar),
            "ceiling" => (d.cast(&format!("ceil({})", number), SqlScalar::Integer), SqlScalar::Integer),
            "floor" => (d.cast(&format!("floor({})", number), SqlScalar::Integer), SqlScalar::Integer),
            "truncate" => (d.cast(&format!("trunc({})", number), SqlScalar::Integer), SqlScalar::Integer),
            "round" => {
                let precision = args
                    .first()
                    .map(|a| self.integer_value(a))
                    .unwrap_or_else(|| "0".to_string());
                decimal(format!(
                    "round({}, {})",
                    d.cast(&number, SqlScalar::Decimal),
                    precision
                ))
            }
            "sqrt" => decimal(format!("(CASE WHEN {n} >= 0 THEN sqrt({n}) END)", n = number)),
            "ln" => decimal(format!("(CASE WHEN {n} > 0 THEN ln({n}) END)", n = number)),
            "exp" => decimal(format!("exp({})", number)),
            "log" => {
                let (base, _) = self.numeric_value(&args[0]);
                decimal(format!(
                    "(CASE WHEN {n} > 0 AND {b} > 0 AND {b} <> 1 THEN (ln({n}) / ln({b})) END)",
                    n = number,
                    b = base
                ))
            }
            "power" => {
                let (exponent, exponent_scalar) = self.numeric_value(&args[0]);
                if scalar == SqlScalar::Integer && exponent_scalar == SqlScalar::Integer {
                    (
                        format!(
                            "(CASE WHEN {e} >= 0 THEN {} END)",
                            d.cast(&format!("power({}, {})", number, exponent), SqlScalar::Integer),
                            e = exponent
                        ),
                        SqlScalar::Integer,
                    )
                } else {
                    decimal(format!(
                        "(CASE WHEN {n} < 0 AND {e} <> trunc({e}) THEN NULL ELSE power({n}, {e}) END)",
                        n = number,
                        e = exponent
                    ))
                }
            }
            other => {
                return Err(TranslationError::UnknownFunction {
                    name: other.to_string(),
                    span: call.span,
                })
            }
        };
        let fhir_type = match result {
            SqlScalar::Integer => "integer",
            _ => "decimal",
        };
        Ok(typed(&receiver, expr, result, fhir_type))
    }

    // ---- resource keys --------------------------------------------------

    fn resource_key(&self, receiver: &SqlFragment) -> SqlFragment {
        let single = self.singleton(receiver);
        let expr = if single.result_type().is_json() {
            self.dialect
                .extract_string(&single.expression, &["id".to_string()])
        } else {
            "NULL".to_string()
        };
        typed(receiver, expr, SqlScalar::String, "id")
    }

    /// Last segment of `reference`, optionally only for references to one
    /// resource type.
    fn reference_key(&self, receiver: &SqlFragment, call: &FunctionCall) -> TranslationResult<SqlFragment> {
        let single = self.singleton(receiver);
        if !single.result_type().is_json() {
            return Ok(typed(receiver, "NULL".to_string(), SqlScalar::String, "id"));
        }
        let reference = self
            .dialect
            .extract_string(&single.expression, &["reference".to_string()]);
        let key = self
            .dialect
            .regex_extract(&reference, &quote_literal("([^/]+)$"));

        let expr = match call.args.first() {
            None => key,
            Some(_) => {
                let type_name = self.type_argument(call)?;
                match self.registry.resolve_type(&type_name) {
                    Some(TypeTarget::Resource(resource_type)) => format!(
                        "(CASE WHEN {} THEN {} END)",
                        self.dialect.regex_match(
                            &reference,
                            &quote_literal(&format!("(^|/){}/[^/]+$", resource_type))
                        ),
                        key
                    ),
                    _ => {
                        return Err(TranslationError::UnknownType {
                            name: type_name,
                            span: call.span,
                        })
                    }
                }
            }
        };
        Ok(typed(receiver, expr, SqlScalar::String, "id"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::sql_dialect::DialectKind;
    use test_case::test_case;

    #[test]
    fn test_unknown_function_and_arity() {
        assert!(matches!(
            error("Patient.name.frobnicate()"),
            TranslationError::UnknownFunction { ref name, .. } if name == "frobnicate"
        ));
        match error("Patient.name.where()") {
            TranslationError::InvalidArgumentCount {
                function, expected, actual, ..
            } => {
                assert_eq!(function, "where");
                assert_eq!(expected, "1".to_string());
                assert_eq!(actual, 0);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_value_mode_count_is_stamped() {
        let fragment = result("Patient.name.given.count() > 1");
        assert!(fragment.expression.contains("(SELECT COUNT(*) FROM"));
    }

    #[test]
    fn test_not_negates_type_check() {
        let fragment = result("1.is(Decimal).not()");
        assert!(fragment.expression.starts_with("(NOT (upper(regexp_replace(typeof(1)"));
        assert_eq!(fragment.native_scalar(), Some(SqlScalar::Boolean));
    }

    #[test_case("'5'.toInteger()", "^[+-]?[0-9]+$" ; "guarded integer parse")]
    #[test_case("'yes'.toBoolean()", "'true', 't', 'yes'" ; "boolean words")]
    #[test_case("'1.5'.convertsToDecimal()", "IS NOT NULL END" ; "converts to")]
    fn test_conversions(text: &str, expected: &str) {
        assert!(result(text).expression.contains(expected), "{}", text);
    }

    #[test]
    fn test_substring_is_zero_based_and_guarded() {
        let fragment = result("'abcdef'.substring(1, 2)");
        assert_eq!(
            fragment.expression,
            "(CASE WHEN 1 >= 0 AND 1 < length('abcdef') THEN substr('abcdef', 1 + 1, 2) END)"
        );
    }

    #[test]
    fn test_division_guards_in_math() {
        let fragment = result("(-4).sqrt()");
        assert!(fragment.expression.starts_with("(CASE WHEN (-4) >= 0 THEN sqrt"));
        assert_eq!(result("2.5.ceiling()").native_scalar(), Some(SqlScalar::Integer));
    }

    #[test]
    fn test_iif_unifies_numeric_branches() {
        let fragment = result("iif(true, 1, 2.5)");
        assert_eq!(fragment.native_scalar(), Some(SqlScalar::Decimal));
        assert!(fragment.expression.starts_with("(CASE WHEN TRUE THEN CAST(1 AS DECIMAL(38, 10)) ELSE 2.5 END)"));
    }

    #[test]
    fn test_reference_key_with_type() {
        let fragment = result("Observation.subject.getReferenceKey(Patient)");
        assert!(fragment.expression.contains("(^|/)Patient/[^/]+$"));
        assert!(matches!(
            error("Observation.subject.getReferenceKey(HumanName)"),
            TranslationError::UnknownType { .. }
        ));
    }

    #[test]
    fn test_extension_filters_by_url() {
        let sql = sql("Patient.extension('http://example.org/race')");
        assert!(sql.contains("'http://example.org/race'"));
        assert!(sql.contains("extension_cte_2"));
    }

    #[test]
    fn test_set_functions_compare_json_text() {
        let fragment = result("(1 | 2 | 3).intersect(2 | 3)");
        assert!(fragment.expression.contains("_dup = 1"));
        assert_eq!(fragment.cardinality(), Cardinality::Array);
        let subset = result("(1 | 2).subsetOf(1 | 2 | 3)");
        assert!(subset.expression.starts_with("(NOT EXISTS"));
    }

    #[test]
    fn test_join_on_postgres() {
        let translation = translate("Patient.name.given.join(' ')", DialectKind::Postgres).unwrap();
        let sql = translation.to_sql().unwrap();
        assert!(sql.contains("string_agg("));
        assert!(sql.contains("jsonb_agg("));
    }
}
