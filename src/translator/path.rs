//! Member navigation.
//!
//! Field semantics come from the type registry: primitives are read through
//! both their bare and `{value, extension}` forms, polymorphic fields try
//! each physical variant in declared order, and array fields either become
//! an enumeration CTE (row mode) or stay a JSON array (value mode).

use super::{
    scalar_for_type, Cardinality, FragmentOrigin, Mode, ResultType, SqlFragment,
    TranslationResult, Translator,
};
use crate::cte_manager::{CteError, Cte, Granularity, WindowSpec};
use crate::fhirpath_parser::ast::Span;
use crate::type_catalog::{MemberResolution, PolymorphicVariant};
use crate::utils::cte_naming::ordinal_column;

impl Translator {
    pub(super) fn member(
        &mut self,
        receiver: SqlFragment,
        name: &str,
        span: Span,
    ) -> TranslationResult<SqlFragment> {
        log::trace!("member '{}' on {:?} at {}", name, receiver.fhir_type(), span);

        if !receiver.result_type().is_json() {
            log::warn!(
                "'{}' navigated on a {:?} value at {}; result is always empty",
                name,
                receiver.native_scalar(),
                span
            );
            return Ok(receiver.derive(
                self.dialect.empty_json(),
                ResultType::json(None, Cardinality::Single),
            ));
        }

        match (self.mode, receiver.is_collection()) {
            (Mode::Row, true) => {
                let element = self.enumerate_stage(&receiver, name)?;
                self.step_single(element, name)
            }
            (Mode::Row, false) | (Mode::Value, false) => self.step_single(receiver, name),
            (Mode::Value, true) => self.step_collection(receiver, name),
        }
    }

    /// Step into `name` on a single JSON value.
    fn step_single(&mut self, receiver: SqlFragment, name: &str) -> TranslationResult<SqlFragment> {
        if let FragmentOrigin::Polymorphic {
            root,
            path,
            variants,
        } = receiver.origin().clone()
        {
            if let Some(stepped) = self.step_through_variants(&receiver, &root, &path, &variants, name)? {
                return Ok(stepped);
            }
        }

        let (root, path) = match receiver.origin() {
            FragmentOrigin::Document { root, path } => (root.clone(), path.clone()),
            _ => (receiver.expression.clone(), Vec::new()),
        };
        let resolution = self.registry.resolve_member(receiver.fhir_type(), name);
        self.step_resolved(&receiver, root, path, name, resolution)
    }

    fn step_resolved(
        &mut self,
        receiver: &SqlFragment,
        root: String,
        path: Vec<String>,
        name: &str,
        resolution: MemberResolution,
    ) -> TranslationResult<SqlFragment> {
        let mut full = path.clone();
        full.push(name.to_string());

        match resolution {
            MemberResolution::Field {
                type_name,
                is_array: false,
                is_primitive: true,
            } => {
                let scalar = scalar_for_type(&type_name);
                let expr = self.dialect.extract_primitive_value(&root, &full, scalar);
                Ok(receiver
                    .derive(expr, ResultType::native(scalar, Some(&type_name)))
                    .with_origin(FragmentOrigin::Document { root, path: full }))
            }
            MemberResolution::Field {
                type_name,
                is_array: false,
                ..
            } => Ok(receiver
                .derive(
                    self.dialect.extract_json(&root, &full),
                    ResultType::json(Some(type_name), Cardinality::Single),
                )
                .with_origin(FragmentOrigin::Document { root, path: full })),
            MemberResolution::Field { type_name, .. } => {
                let array = receiver
                    .derive(
                        self.dialect.extract_json(&root, &full),
                        ResultType::json(Some(type_name), Cardinality::Array),
                    )
                    .with_origin(FragmentOrigin::Document { root, path: full });
                self.array_in_mode(array, name)
            }
            MemberResolution::Polymorphic { variants, is_array } => {
                let parts: Vec<String> = variants
                    .iter()
                    .map(|v| {
                        let mut variant_path = path.clone();
                        variant_path.push(v.field_name.clone());
                        self.dialect.extract_json(&root, &variant_path)
                    })
                    .collect();
                let expr = coalesce(parts);
                let cardinality = if is_array {
                    Cardinality::Array
                } else {
                    Cardinality::Single
                };
                let fragment = receiver
                    .derive(expr, ResultType::json(None, cardinality))
                    .with_origin(FragmentOrigin::Polymorphic {
                        root,
                        path,
                        variants,
                    });
                if is_array {
                    self.array_in_mode(fragment, name)
                } else {
                    Ok(fragment)
                }
            }
            MemberResolution::Unknown => {
                let fragment = receiver
                    .derive(
                        self.dialect.extract_json(&root, &full),
                        ResultType::json(None, Cardinality::Unknown),
                    )
                    .with_origin(FragmentOrigin::Document { root, path: full });
                self.array_in_mode(fragment, name)
            }
        }
    }

    pub(super) fn array_in_mode(&mut self, array: SqlFragment, label: &str) -> TranslationResult<SqlFragment> {
        match self.mode {
            Mode::Row => self.enumerate_stage(&array, label),
            Mode::Value => Ok(array),
        }
    }

    /// Member access below a polymorphic value steps through the variants
    /// whose type declares the member. `None` if no variant does.
    fn step_through_variants(
        &mut self,
        receiver: &SqlFragment,
        root: &str,
        path: &[String],
        variants: &[PolymorphicVariant],
        name: &str,
    ) -> TranslationResult<Option<SqlFragment>> {
        let mut stepped = Vec::new();
        for variant in variants.iter().filter(|v| !v.is_primitive) {
            let resolution = self.registry.resolve_member(Some(&variant.type_name), name);
            if resolution == MemberResolution::Unknown {
                continue;
            }
            let mut variant_path = path.to_vec();
            variant_path.push(variant.field_name.clone());
            let typed = receiver.derive(
                receiver.expression.clone(),
                ResultType::json(Some(variant.type_name.clone()), Cardinality::Single),
            );
            stepped.push(self.in_mode(Mode::Value, |t| {
                t.step_resolved(&typed, root.to_string(), variant_path, name, resolution)
            })?);
        }

        match stepped.len() {
            0 => Ok(None),
            1 => {
                let only = stepped.remove(0);
                if only.is_collection() {
                    Ok(Some(self.array_in_mode(only, name)?))
                } else {
                    Ok(Some(only))
                }
            }
            _ => {
                let first_type = stepped[0].fhir_type().map(str::to_string);
                let same_type = stepped.iter().all(|s| s.fhir_type() == first_type.as_deref());
                let any_array = stepped.iter().any(|s| s.is_collection());
                let parts: Vec<String> = stepped.iter().map(|s| self.json_value(s)).collect();
                let cardinality = if any_array {
                    Cardinality::Unknown
                } else {
                    Cardinality::Single
                };
                let merged = receiver.derive(
                    coalesce(parts),
                    ResultType::json(if same_type { first_type } else { None }, cardinality),
                );
                if any_array {
                    Ok(Some(self.array_in_mode(merged, name)?))
                } else {
                    Ok(Some(merged))
                }
            }
        }
    }

    /// Value-mode member access on every element of a JSON array.
    fn step_collection(&mut self, receiver: SqlFragment, name: &str) -> TranslationResult<SqlFragment> {
        let rows = self.collection_rows(&receiver);
        let element = rows.element.clone();
        let stepped = self.step_single(element, name)?;
        let expr = self.aggregate_mapped(&rows, &stepped, None);
        Ok(receiver.derive(
            expr,
            ResultType::json(stepped.fhir_type().map(str::to_string), Cardinality::Array),
        ))
    }

    /// Flatten the array held by `array` into an element stage: one row per
    /// element, carrying the ordering columns of every enclosing stage.
    pub(super) fn enumerate_stage(
        &mut self,
        array: &SqlFragment,
        label: &str,
    ) -> TranslationResult<SqlFragment> {
        let source = array.source_table.clone();
        let from_base = self.ctes.is_external(&source);
        let base = self.ctes.base().clone();

        let (id_expr, inherited, from) = if from_base {
            (base.id_expr(), Vec::new(), base.from_clause())
        } else {
            let stage = self
                .ctes
                .get(&source)
                .ok_or_else(|| CteError::UnknownStage(source.clone()))?;
            (
                format!("{}.id", source),
                stage.ordering_columns.clone(),
                source.clone(),
            )
        };

        let alias = self.ctes.next_alias("e");
        let name = self.ctes.next_cte_name(label);
        let array_expr = self.array_expression(array);
        let from_clause = format!(
            "{} {}",
            from,
            self.dialect
                .lateral_join(&self.dialect.enumerate_array(&array_expr, &alias))
        );
        let ordinal = ordinal_column(inherited.len() + 1);

        let mut cte = Cte::new(&name, &from_clause, Granularity::Element)
            .with_column(format!("{} AS id", id_expr))
            .with_column(format!("{}.value AS value", alias));
        for column in &inherited {
            cte = cte.with_column(format!("{}.{c} AS {c}", source, c = column));
        }
        cte = cte.with_column(format!("{}.ordinality AS {}", alias, ordinal));

        let mut window_order: Vec<String> = inherited
            .iter()
            .map(|c| format!("{}.{}", source, c))
            .collect();
        window_order.push(format!("{}.ordinality", alias));
        cte.window = Some(WindowSpec {
            partition_by: id_expr,
            order_by: window_order,
        });
        cte.ordering_columns = inherited;
        cte.ordering_columns.push(ordinal);
        cte.reads_base = from_base;
        cte = cte.with_dependency(if from_base { &base.table_name } else { &source });
        for dependency in &array.dependencies {
            cte = cte.with_dependency(dependency);
        }
        self.ctes.register(cte)?;

        let raw = format!("{}.value", name);
        let mut stage_rows = SqlFragment::new(
            raw.clone(),
            &name,
            ResultType::json(array.fhir_type().map(str::to_string), Cardinality::Array),
        )
        .with_dependency(&name);
        stage_rows.requires_unnest = true;
        let element = self.element_fragment(&stage_rows, &raw);
        self.stage_elements.insert(name, element.expression.clone());
        Ok(element)
    }
}

fn coalesce(parts: Vec<String>) -> String {
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("COALESCE({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::sql_dialect::{DialectKind, SqlScalar};

    #[test]
    fn test_array_field_becomes_element_stage() {
        let fragment = result("Patient.name");
        assert!(fragment.requires_unnest);
        assert_eq!(fragment.source_table, "name_cte_2");
        assert_eq!(fragment.expression, "name_cte_2.value");
    }

    #[test]
    fn test_nested_arrays_carry_ordering() {
        let sql = sql("Patient.name.given");
        assert!(sql.contains("name_cte_2.ord_1 AS ord_1"));
        assert!(sql.contains("AS ord_2"));
        assert!(sql.ends_with("ORDER BY given_cte_4.id, given_cte_4.ord_1, given_cte_4.ord_2"));
    }

    #[test]
    fn test_primitive_reads_both_forms() {
        let fragment = result("Patient.birthDate");
        assert_eq!(
            fragment.expression,
            "COALESCE(json_extract_string(base.resource, '$.birthDate.value'), json_extract_string(base.resource, '$.birthDate'))"
        );
        assert_eq!(fragment.native_scalar(), Some(SqlScalar::String));
        assert_eq!(fragment.fhir_type(), Some("date"));
    }

    #[test]
    fn test_polymorphic_field_tries_variants_in_order() {
        let fragment = result("Observation.value");
        assert!(fragment.expression.starts_with(
            "COALESCE(json_extract(base.resource, '$.valueQuantity'), json_extract(base.resource, '$.valueCodeableConcept'), json_extract(base.resource, '$.valueString')"
        ));
    }

    #[test]
    fn test_member_below_polymorphic_uses_matching_variants() {
        let fragment = result("Observation.value.unit");
        assert!(fragment.expression.contains("'$.valueQuantity.unit.value'"));
        assert!(!fragment.expression.contains("valueString"));
    }

    #[test]
    fn test_value_mode_keeps_arrays_as_json() {
        let fragment = result("Patient.name.given.count() > 0");
        assert!(!fragment.requires_unnest);
        assert!(fragment.expression.contains("json_extract(base.resource, '$.name')"));
    }

    #[test]
    fn test_postgres_navigation() {
        let translation = translate("Patient.name.family", DialectKind::Postgres).unwrap();
        let sql = translation.to_sql().unwrap();
        assert!(sql.contains("jsonb_array_elements("));
        assert!(sql.contains("(name_cte_2.value -> 'family' ->> 'value')"));
    }
}
