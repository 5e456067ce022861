//! Row-mode collection functions.
//!
//! When the receiver is an element row of an enumeration stage, filters are
//! appended to that stage instead of re-enumerating the array, subsetting
//! uses the stage's `_index`/`_total` window columns, and reducing functions
//! are left pending until something consumes them (see [`Translator::settle`]).

use super::collection::CollectionRows;
use super::{
    Cardinality, CollectionFunction, ResultType, ScopeFrame, SqlFragment,
    TranslationError, TranslationResult, Translator, INDEX, TOTAL,
};
use crate::cte_manager::{Cte, CteError, Granularity, WindowSpec};
use crate::fhirpath_parser::ast::{Expression, FunctionCall};
use crate::sql_dialect::SqlScalar;

/// Functions with a dedicated element-row form.
pub(super) fn applies_to_rows(name: &str) -> bool {
    matches!(
        name,
        "where"
            | "select"
            | "exists"
            | "empty"
            | "count"
            | "sum"
            | "avg"
            | "min"
            | "max"
            | "first"
            | "last"
            | "tail"
            | "skip"
            | "take"
            | "single"
            | "ofType"
            | "is"
            | "as"
            | "extension"
            | "getResourceKey"
            | "getReferenceKey"
            | "trace"
    )
}

impl Translator {
    /// Apply `call` to the element rows held by `element`.
    pub(super) fn invoke_on_rows(
        &mut self,
        element: SqlFragment,
        call: &FunctionCall,
    ) -> TranslationResult<SqlFragment> {
        log::trace!("'{}' on rows of {}", call.name, element.source_table);
        match call.name.as_str() {
            "where" => self.row_where(element, &call.args[0]),
            "select" => self.row_select(element, &call.args[0]),
            "exists" => {
                let element = match call.args.first() {
                    Some(criteria) => self.row_where(element, criteria)?,
                    None => element,
                };
                Ok(self.pending(&element, CollectionFunction::Exists))
            }
            "empty" => Ok(self.pending(&element, CollectionFunction::Empty)),
            "count" => Ok(self.pending(&element, CollectionFunction::Count)),
            "sum" => Ok(self.pending(&element, CollectionFunction::Sum)),
            "avg" => Ok(self.pending(&element, CollectionFunction::Avg)),
            "min" => Ok(self.pending(&element, CollectionFunction::Min)),
            "max" => Ok(self.pending(&element, CollectionFunction::Max)),
            "first" | "last" | "tail" | "skip" | "take" | "single" => {
                self.row_subset(element, call)
            }
            "ofType" => {
                let type_name = self.type_argument(call)?;
                let check = self.type_check(element.clone(), &type_name, call.span)?;
                let condition = self.boolean_value(&check);
                self.ctes
                    .get_mut(&element.source_table)?
                    .add_filter(condition);
                self.type_cast(element, &type_name, call.span)
            }
            // per-element functions
            _ => self.invoke_value(element, call),
        }
    }

    /// Filter the stage the element rows come from.
    pub(super) fn row_where(
        &mut self,
        element: SqlFragment,
        predicate: &Expression,
    ) -> TranslationResult<SqlFragment> {
        let positional = predicate.mentions_variable(&[INDEX, TOTAL]);
        let element = if positional {
            self.windowed(element, "where")?
        } else {
            element
        };
        let frame = self.row_frame(&element, positional);
        let condition = self.evaluate_with(frame, predicate)?;
        let condition = self.boolean_value(&condition);
        self.ctes.get_mut(&element.source_table)?.add_filter(condition);
        Ok(element)
    }

    fn row_select(
        &mut self,
        element: SqlFragment,
        projection: &Expression,
    ) -> TranslationResult<SqlFragment> {
        let positional = projection.mentions_variable(&[INDEX, TOTAL]);
        let element = if positional {
            self.windowed(element, "select")?
        } else {
            element
        };
        let frame = self.row_frame(&element, positional);
        let projected = self.evaluate_with(frame, projection)?;
        match projected.cardinality() {
            Cardinality::Single => Ok(projected),
            Cardinality::Array | Cardinality::Unknown => self.enumerate_stage(&projected, "select"),
        }
    }

    fn row_subset(&mut self, element: SqlFragment, call: &FunctionCall) -> TranslationResult<SqlFragment> {
        let element = self.windowed(element, &call.name)?;
        let stage = element.source_table.clone();
        let condition = match call.name.as_str() {
            "first" => format!("{}._index = 0", stage),
            "last" => format!("{s}._index = {s}._total - 1", s = stage),
            "tail" => format!("{}._index > 0", stage),
            "single" => format!("{}._total = 1", stage),
            "skip" | "take" => {
                let count = self.argument(&element, &call.args[0])?;
                let count = self.integer_value(&count);
                let op = if call.name == "skip" { ">=" } else { "<" };
                format!("{}._index {} {}", stage, op, count)
            }
            other => {
                return Err(TranslationError::UnsupportedOperation {
                    message: format!("'{}' is not a subsetting function", other),
                    span: call.span,
                })
            }
        };
        self.ctes.get_mut(&stage)?.add_filter(condition);
        Ok(element)
    }

    /// `[n]` on element rows.
    pub(super) fn row_index(
        &mut self,
        element: SqlFragment,
        index: &Expression,
    ) -> TranslationResult<SqlFragment> {
        let element = self.windowed(element, "index")?;
        let position = self.argument(&element, index)?;
        let position = self.integer_value(&position);
        let stage = element.source_table.clone();
        self.ctes
            .get_mut(&stage)?
            .add_filter(format!("{}._index = {}", stage, position));
        Ok(element)
    }

    /// Element rows on a stage whose `_index`/`_total` describe exactly this
    /// collection. A bare, unfiltered enumeration stage qualifies as is;
    /// anything else gets a projection stage first.
    fn windowed(&mut self, element: SqlFragment, label: &str) -> TranslationResult<SqlFragment> {
        let stage_name = element.source_table.clone();
        let bare = self.stage_elements.get(&stage_name) == Some(&element.expression);
        let stage = self.ctes.get_mut(&stage_name)?;
        if bare && stage.filters.is_empty() && stage.enable_window() {
            return Ok(element);
        }
        self.materialize(element, label)
    }

    /// Project the element rows into a stage of their own, numbering the
    /// non-null values in collection order.
    fn materialize(&mut self, element: SqlFragment, label: &str) -> TranslationResult<SqlFragment> {
        let source = element.source_table.clone();
        let inherited = self
            .ctes
            .get(&source)
            .ok_or_else(|| CteError::UnknownStage(source.clone()))?
            .ordering_columns
            .clone();
        let value = self.element_json(&element);

        let name = self.ctes.next_cte_name(label);
        let mut cte = Cte::new(&name, &source, Granularity::Element)
            .with_column(format!("{}.id AS id", source))
            .with_column(format!("{} AS value", value));
        for column in &inherited {
            cte = cte.with_column(format!("{}.{c} AS {c}", source, c = column));
        }
        cte.window = Some(WindowSpec {
            partition_by: format!("{}.id", source),
            order_by: inherited.iter().map(|c| format!("{}.{}", source, c)).collect(),
        });
        cte.window_enabled = true;
        cte.ordering_columns = inherited;
        cte.source_filters.push(format!("{} IS NOT NULL", value));
        cte = cte.with_dependency(&source);
        for dependency in &element.dependencies {
            cte = cte.with_dependency(dependency);
        }
        self.ctes.register(cte)?;

        let raw = format!("{}.value", name);
        let mut stage_rows = SqlFragment::new(
            raw.clone(),
            &name,
            ResultType::json(element.fhir_type().map(str::to_string), Cardinality::Array),
        )
        .with_dependency(&name);
        stage_rows.requires_unnest = true;
        let materialized = self.element_fragment(&stage_rows, &raw);
        self.stage_elements
            .insert(name, materialized.expression.clone());
        Ok(materialized)
    }

    fn row_frame(&self, element: &SqlFragment, positional: bool) -> ScopeFrame {
        let column = |name: &str| {
            element.derive(
                format!("{}.{}", element.source_table, name),
                ResultType::native(SqlScalar::Integer, Some("integer")),
            )
        };
        if positional {
            ScopeFrame::iteration(element.clone(), Some(column("_index")), Some(column("_total")))
        } else {
            ScopeFrame::iteration(element.clone(), None, None)
        }
    }

    /// JSON form of an element; the stage column itself when the element is
    /// the stage's own value.
    fn element_json(&self, element: &SqlFragment) -> String {
        let stage = &element.source_table;
        if self.stage_elements.get(stage) == Some(&element.expression) {
            format!("{}.value", stage)
        } else {
            self.json_value(element)
        }
    }

    /// A reducing function over element rows, left for the final query or
    /// a later [`Translator::settle`] to group.
    fn pending(&self, element: &SqlFragment, function: CollectionFunction) -> SqlFragment {
        let value = &element.expression;
        let (expr, result_type) = match function {
            CollectionFunction::Count => (
                format!("COUNT({})", value),
                ResultType::native(SqlScalar::Integer, Some("integer")),
            ),
            CollectionFunction::Exists => (
                format!("(COUNT({}) > 0)", value),
                ResultType::native(SqlScalar::Boolean, Some("boolean")),
            ),
            CollectionFunction::Empty => (
                format!("(COUNT({}) = 0)", value),
                ResultType::native(SqlScalar::Boolean, Some("boolean")),
            ),
            CollectionFunction::Sum => {
                let (number, scalar) = self.numeric_value(element);
                (
                    format!("COALESCE(SUM({}), 0)", number),
                    ResultType::native(scalar, element.fhir_type()),
                )
            }
            CollectionFunction::Avg => {
                let number = self.scalar_value(element, SqlScalar::Decimal);
                (
                    format!("AVG({})", number),
                    ResultType::native(SqlScalar::Decimal, Some("decimal")),
                )
            }
            CollectionFunction::Min | CollectionFunction::Max => {
                let scalar = self.value_scalar(element);
                let operand = self.scalar_value(element, scalar);
                let sql = if function == CollectionFunction::Min { "MIN" } else { "MAX" };
                (
                    format!("{}({})", sql, operand),
                    ResultType::native(scalar, element.fhir_type()),
                )
            }
        };
        element.derive(expr, result_type).with_function(function)
    }

    /// Group a pending reducing function to one row per document so a later
    /// step can consume it. Documents without element rows still get a row.
    pub(super) fn settle(&mut self, fragment: SqlFragment) -> TranslationResult<SqlFragment> {
        let label = fragment
            .metadata
            .function
            .map(|f| f.name())
            .unwrap_or("aggregate");
        let name = self.document_stage(&fragment, label, fragment.expression.clone())?;
        log::debug!("settled '{}' over {} into {}", label, fragment.source_table, name);

        let mut settled = SqlFragment::new(
            format!("{}.value", name),
            &name,
            fragment.result_type().clone(),
        )
        .with_dependency(&name);
        settled.metadata.function = fragment.metadata.function;
        settled.is_aggregate = true;
        Ok(settled)
    }

    /// Gather the element rows back into one JSON array per document, in
    /// collection order.
    pub(super) fn collect(&mut self, element: SqlFragment) -> TranslationResult<SqlFragment> {
        let stage = element.source_table.clone();
        let order = self
            .ctes
            .get(&stage)
            .map(|cte| cte.qualified_ordering())
            .filter(|columns| !columns.is_empty())
            .map(|columns| columns.join(", "))
            .unwrap_or_else(|| format!("{}.id", stage));
        let value = self.element_json(&element);
        let aggregate = self.dialect.aggregate_to_array(&value, &order);
        let name = self.document_stage(&element, "collect", aggregate)?;

        let mut collected = SqlFragment::new(
            format!("{}.value", name),
            &name,
            ResultType::json(element.fhir_type().map(str::to_string), Cardinality::Array),
        )
        .with_dependency(&name);
        collected.is_aggregate = true;
        Ok(collected)
    }

    /// Register `base LEFT JOIN stage GROUP BY id` computing `value`.
    fn document_stage(
        &mut self,
        fragment: &SqlFragment,
        label: &str,
        value: String,
    ) -> TranslationResult<String> {
        let stage = fragment.source_table.clone();
        let base = self.ctes.base().clone();
        let id = base.id_expr();
        let name = self.ctes.next_cte_name(label);

        let mut cte = Cte::new(
            &name,
            &format!(
                "{} LEFT JOIN {s} ON {s}.id = {id}",
                base.from_clause(),
                s = stage,
                id = id
            ),
            Granularity::Document,
        )
        .with_column(format!("{} AS id", id))
        .with_column(format!("{} AS value", value))
        .with_dependency(&stage);
        for dependency in &fragment.dependencies {
            cte = cte.with_dependency(dependency);
        }
        cte.group_by = Some(id);
        cte.reads_base = true;
        self.ctes.register(cte)?;
        Ok(name)
    }

    /// Frame for value-mode iteration over `rows`.
    pub(super) fn element_frame(&self, receiver: &SqlFragment, rows: &CollectionRows) -> ScopeFrame {
        let integer = ResultType::native(SqlScalar::Integer, Some("integer"));
        ScopeFrame::iteration(
            rows.element.clone(),
            Some(receiver.derive(format!("({} - 1)", rows.ordinal), integer.clone())),
            Some(receiver.derive(rows.total.clone(), integer)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_where_filters_the_existing_stage() {
        let sql = sql("Patient.name.given.where($this = 'Peter')");
        // one enumeration per array, the filter wraps the given stage
        assert_eq!(sql.matches("json_extract(base.resource, '$.name')").count(), 1);
        assert!(sql.contains(") AS given_cte_4 WHERE (json_extract_string(given_cte_4.value, '$') = 'Peter')"));
    }

    #[test]
    fn test_first_uses_window_on_bare_stage() {
        let sql = sql("Patient.name.first()");
        assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY base.id ORDER BY e1.ordinality) - 1 AS _index"));
        assert!(sql.contains("WHERE name_cte_2._index = 0"));
    }

    #[test]
    fn test_positional_filter_after_where_materializes() {
        let sql = sql("Patient.name.where(use = 'official').first()");
        assert!(sql.contains("first_cte_3 AS (SELECT * FROM (SELECT name_cte_2.id AS id, name_cte_2.value AS value, name_cte_2.ord_1 AS ord_1"));
        assert!(sql.contains("WHERE first_cte_3._index = 0"));
    }

    #[test]
    fn test_count_is_pending_until_the_end() {
        let fragment = result("Patient.name.given.count()");
        assert_eq!(fragment.metadata.function, Some(CollectionFunction::Count));
        assert!(!fragment.is_aggregate);
        let sql = sql("Patient.name.given.count()");
        assert!(sql.contains("LEFT JOIN given_cte_4 ON given_cte_4.id = base.id"));
        assert!(sql.ends_with("GROUP BY base.id ORDER BY base.id"));
    }

    #[test]
    fn test_consumed_count_is_settled() {
        let fragment = result("Patient.name.count().toString()");
        assert!(fragment.source_table.starts_with("count_cte_"));
        assert_eq!(fragment.native_scalar(), Some(SqlScalar::String));
    }

    #[test]
    fn test_index_variable_uses_window_columns() {
        let sql = sql("Patient.name.given.where($index > 0)");
        assert!(sql.contains("(given_cte_4._index > 0)"));
        assert!(sql.contains("COUNT(*) OVER (PARTITION BY name_cte_2.id) AS _total"));
    }

    #[test]
    fn test_multi_valued_select_is_enumerated() {
        let fragment = result("Patient.name.select(given)");
        assert!(fragment.requires_unnest);
        assert!(fragment.source_table.starts_with("select_cte_"));
    }
}
