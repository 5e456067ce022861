//! Collection shapes and scalar coercion.
//!
//! Value-mode functions see a collection as a set of rows produced by
//! [`CollectionRows`]: a FROM item with `value` and 1-based `ordinality`
//! columns, correlated to the row the collection belongs to.

use super::{
    scalar_for_type, Cardinality, FragmentOrigin, ResultType, SqlFragment, Translator,
};
use crate::sql_dialect::{bind_once, SqlScalar};

pub(super) struct CollectionRows {
    pub from_item: String,
    /// Raw element value (`alias.value`).
    pub raw: String,
    /// The element typed for further navigation.
    pub element: SqlFragment,
    /// 1-based position column.
    pub ordinal: String,
    /// Number of elements in the collection.
    pub total: String,
}

impl CollectionRows {
    /// `(SELECT {select} FROM rows [WHERE ...])`
    pub fn subquery(&self, select: &str, condition: Option<&str>) -> String {
        match condition {
            Some(condition) => format!(
                "(SELECT {} FROM {} WHERE {})",
                select, self.from_item, condition
            ),
            None => format!("(SELECT {} FROM {})", select, self.from_item),
        }
    }

    pub fn exists(&self, condition: Option<&str>) -> String {
        format!("(EXISTS {})", self.subquery("1", condition))
    }

    pub fn not_exists(&self, condition: Option<&str>) -> String {
        format!("(NOT EXISTS {})", self.subquery("1", condition))
    }
}

impl Translator {
    /// Rows of the collection held by `fragment`. A single value yields one
    /// row, or none when it is NULL.
    pub(super) fn collection_rows(&mut self, fragment: &SqlFragment) -> CollectionRows {
        let alias = self.ctes.next_alias("r");
        let raw = format!("{}.value", alias);
        let ordinal = format!("{}.ordinality", alias);

        match fragment.cardinality() {
            Cardinality::Single => {
                let from_item = format!(
                    "(SELECT s.value AS value, 1 AS ordinality FROM (SELECT {} AS value) AS s WHERE s.value IS NOT NULL) AS {}",
                    fragment.expression, alias
                );
                let mut element = fragment.derive(raw.clone(), fragment.result_type().clone());
                if fragment.result_type().is_json() {
                    element = element.with_origin(FragmentOrigin::Document {
                        root: raw.clone(),
                        path: Vec::new(),
                    });
                }
                CollectionRows {
                    from_item,
                    raw,
                    element,
                    ordinal,
                    // rows exist only for a present value
                    total: "1".to_string(),
                }
            }
            Cardinality::Array | Cardinality::Unknown => {
                let array = self.array_expression(fragment);
                let element = self.element_fragment(fragment, &raw);
                CollectionRows {
                    from_item: self.dialect.enumerate_array(&array, &alias),
                    raw,
                    element,
                    ordinal,
                    total: self.dialect.json_array_length(&array),
                }
            }
        }
    }

    /// The fragment as a JSON array expression.
    pub(super) fn array_expression(&self, fragment: &SqlFragment) -> String {
        match fragment.cardinality() {
            Cardinality::Array => fragment.expression.clone(),
            Cardinality::Unknown => self.dialect.ensure_array(&fragment.expression),
            Cardinality::Single => {
                let json = self.json_value(fragment);
                self.dialect.ensure_array(&json)
            }
        }
    }

    /// One element of `collection` held in the JSON expression `raw`.
    /// Primitive elements are read as native scalars.
    pub(super) fn element_fragment(&self, collection: &SqlFragment, raw: &str) -> SqlFragment {
        let element_type = collection.fhir_type().map(str::to_string);
        match element_type.as_deref() {
            Some(type_name) if self.registry.is_primitive(type_name) => {
                let scalar = scalar_for_type(type_name);
                collection.derive(
                    self.dialect.extract_scalar(raw, &[], scalar),
                    ResultType::native(scalar, Some(type_name)),
                )
            }
            _ => collection
                .derive(raw.to_string(), ResultType::json(element_type, Cardinality::Single))
                .with_origin(FragmentOrigin::Document {
                    root: raw.to_string(),
                    path: Vec::new(),
                }),
        }
    }

    /// Reduce a collection to its only element; more than one is empty.
    pub(super) fn singleton(&self, fragment: &SqlFragment) -> SqlFragment {
        if fragment.cardinality() == Cardinality::Single {
            return fragment.clone();
        }
        let array = self.array_expression(fragment);
        let expr = bind_once(&array, |a| {
            format!(
                "CASE WHEN {} = 1 THEN {} END",
                self.dialect.json_array_length(a),
                self.dialect.json_array_element(a, "0")
            )
        });
        let single = fragment.derive(
            expr,
            ResultType::json(fragment.fhir_type().map(str::to_string), Cardinality::Single),
        );
        self.finish(single)
    }

    /// Scalar category the fragment's values naturally have.
    pub(super) fn value_scalar(&self, fragment: &SqlFragment) -> SqlScalar {
        fragment
            .native_scalar()
            .or_else(|| fragment.fhir_type().map(scalar_for_type))
            .unwrap_or(SqlScalar::String)
    }

    /// SQL for the (singleton) value of `fragment` as `scalar`.
    pub(super) fn scalar_value(&self, fragment: &SqlFragment, scalar: SqlScalar) -> String {
        let single = self.singleton(fragment);
        match single.native_scalar() {
            Some(native) if native == scalar => single.expression,
            Some(SqlScalar::Integer) if scalar == SqlScalar::Decimal => {
                self.dialect.cast(&single.expression, SqlScalar::Decimal)
            }
            Some(_) if scalar == SqlScalar::String => self.dialect.to_text(&single.expression),
            Some(_) => self.dialect.try_cast(&single.expression, scalar),
            None => self.dialect.extract_scalar(&single.expression, &[], scalar),
        }
    }

    pub(super) fn boolean_value(&self, fragment: &SqlFragment) -> String {
        self.scalar_value(fragment, SqlScalar::Boolean)
    }

    pub(super) fn string_value(&self, fragment: &SqlFragment) -> String {
        self.scalar_value(fragment, SqlScalar::String)
    }

    /// Numeric value; integers stay integers, anything else reads as decimal.
    pub(super) fn numeric_value(&self, fragment: &SqlFragment) -> (String, SqlScalar) {
        let scalar = match self.value_scalar(fragment) {
            SqlScalar::Integer => SqlScalar::Integer,
            _ => SqlScalar::Decimal,
        };
        (self.scalar_value(fragment, scalar), scalar)
    }

    pub(super) fn integer_value(&self, fragment: &SqlFragment) -> String {
        self.scalar_value(fragment, SqlScalar::Integer)
    }

    /// The value as JSON, for mixing values of different kinds.
    pub(super) fn json_value(&self, fragment: &SqlFragment) -> String {
        if fragment.result_type().is_json() {
            fragment.expression.clone()
        } else {
            self.dialect.to_json(&fragment.expression)
        }
    }

    /// Text form of an element's JSON encoding; used as an equality key.
    pub(super) fn json_key(&self, fragment: &SqlFragment) -> String {
        self.dialect.to_text(&self.json_value(fragment))
    }

    /// Aggregate `value` over `rows` into a JSON array in element order.
    pub(super) fn aggregate_rows(
        &self,
        rows: &CollectionRows,
        value: &str,
        condition: Option<&str>,
    ) -> String {
        rows.subquery(
            &self.dialect.aggregate_to_array(value, &rows.ordinal),
            condition,
        )
    }

    /// Aggregate a per-element result into a JSON array, flattening
    /// per-element collections.
    pub(super) fn aggregate_mapped(
        &mut self,
        rows: &CollectionRows,
        mapped: &SqlFragment,
        condition: Option<&str>,
    ) -> String {
        match mapped.cardinality() {
            Cardinality::Single => {
                // project first so the mapped expression appears once
                let alias = self.ctes.next_alias("m");
                let mut projected = format!(
                    "SELECT {} AS value, {} AS ordinality FROM {}",
                    mapped.expression, rows.ordinal, rows.from_item
                );
                if let Some(condition) = condition {
                    projected.push_str(&format!(" WHERE {}", condition));
                }
                format!(
                    "(SELECT {} FROM ({}) AS {a})",
                    self.dialect.aggregate_to_array(
                        &format!("{}.value", alias),
                        &format!("{}.ordinality", alias)
                    ),
                    projected,
                    a = alias
                )
            }
            Cardinality::Array | Cardinality::Unknown => {
                let inner = self.ctes.next_alias("r");
                let array = self.array_expression(mapped);
                let from = format!(
                    "{} {}",
                    rows.from_item,
                    self.dialect
                        .lateral_join(&self.dialect.enumerate_array(&array, &inner))
                );
                let aggregate = self.dialect.aggregate_to_array(
                    &format!("{}.value", inner),
                    &format!("{}, {}.ordinality", rows.ordinal, inner),
                );
                match condition {
                    Some(condition) => {
                        format!("(SELECT {} FROM {} WHERE {})", aggregate, from, condition)
                    }
                    None => format!("(SELECT {} FROM {})", aggregate, from),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_singleton_of_array_checks_length() {
        let fragment = result("Patient.name.given.first() | Patient.name.family");
        assert_eq!(fragment.cardinality(), Cardinality::Array);
    }

    #[test]
    fn test_array_elements_of_primitive_type_are_native() {
        // join reads every element as text
        let fragment = result("Patient.name.given.join(',')");
        assert!(fragment.expression.contains("string_agg(json_extract_string("));
        assert_eq!(fragment.native_scalar(), Some(SqlScalar::String));
    }
}
