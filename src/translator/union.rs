//! `|`, `union()` and `combine()`.

use super::literals::is_empty_literal;
use super::{Cardinality, FragmentOrigin, ResultType, SqlFragment, TranslationResult, Translator};
use crate::fhirpath_parser::ast::{Expression, UnionOperation};

impl Translator {
    /// A chain `a | b | c` is flattened and translated as one combination,
    /// each operand evaluated once. Order and duplicates are kept.
    pub(super) fn union(&mut self, node: &UnionOperation) -> TranslationResult<SqlFragment> {
        let mut operands = Vec::new();
        let mut pending: Vec<&Expression> = vec![&node.right, &node.left];
        while let Some(expr) = pending.pop() {
            match expr {
                Expression::Union(inner) => {
                    pending.push(&inner.right);
                    pending.push(&inner.left);
                }
                other => operands.push(self.evaluate(other)?),
            }
        }
        log::trace!("union of {} operands at {}", operands.len(), node.span);
        self.combine_collections(operands, false)
    }

    /// Concatenate collections in operand order into one JSON array.
    /// With `distinct`, only the first occurrence of each value is kept.
    pub(super) fn combine_collections(
        &mut self,
        fragments: Vec<SqlFragment>,
        distinct: bool,
    ) -> TranslationResult<SqlFragment> {
        let Some(first) = fragments.first().cloned() else {
            return Ok(SqlFragment::new(
                self.dialect.empty_json(),
                &self.ctes.base().table_name.clone(),
                ResultType::json(None, Cardinality::Array),
            ));
        };

        let mut branches = Vec::new();
        for (position, fragment) in fragments.iter().enumerate() {
            if is_empty_literal(fragment) {
                continue;
            }
            let branch = position + 1;
            let sql = match (fragment.cardinality(), fragment.origin()) {
                (Cardinality::Single, FragmentOrigin::Literal)
                | (Cardinality::Single, FragmentOrigin::QuantityLiteral { .. }) => format!(
                    "SELECT {} AS branch, {} AS value, 1 AS ordinality",
                    branch,
                    self.json_value(fragment)
                ),
                (Cardinality::Single, _) => {
                    let alias = self.ctes.next_alias("a");
                    format!(
                        "SELECT {b} AS branch, {a}.v AS value, 1 AS ordinality FROM (SELECT {} AS v) AS {a} WHERE {a}.v IS NOT NULL",
                        self.json_value(fragment),
                        b = branch,
                        a = alias
                    )
                }
                _ => {
                    let alias = self.ctes.next_alias("a");
                    let array = self.array_expression(fragment);
                    format!(
                        "SELECT {b} AS branch, {a}.value AS value, {a}.ordinality AS ordinality FROM {}",
                        self.dialect.enumerate_array(&array, &alias),
                        b = branch,
                        a = alias
                    )
                }
            };
            branches.push(sql);
        }

        let first_type = fragments
            .iter()
            .find(|f| !is_empty_literal(f))
            .and_then(|f| f.fhir_type())
            .map(str::to_string);
        let same_type = fragments
            .iter()
            .filter(|f| !is_empty_literal(f))
            .all(|f| f.fhir_type() == first_type.as_deref());
        let result_type = ResultType::json(if same_type { first_type } else { None }, Cardinality::Array);

        if branches.is_empty() {
            return Ok(first.derive(self.dialect.empty_json(), result_type));
        }

        let alias = self.ctes.next_alias("u");
        let combined = branches.join(" UNION ALL ");
        let ordered = format!("{a}.branch, {a}.ordinality", a = alias);
        let aggregate = self
            .dialect
            .aggregate_to_array(&format!("{}.value", alias), &ordered);
        let expr = if distinct {
            let key = self.dialect.to_text(&format!("{}_b.value", alias));
            format!(
                "(SELECT {agg} FROM (SELECT {a}_b.branch, {a}_b.value, {a}_b.ordinality, \
                 ROW_NUMBER() OVER (PARTITION BY {key} ORDER BY {a}_b.branch, {a}_b.ordinality) AS _dup \
                 FROM ({combined}) AS {a}_b) AS {a} WHERE {a}._dup = 1)",
                agg = aggregate,
                a = alias,
                key = key,
                combined = combined
            )
        } else {
            format!("(SELECT {} FROM ({}) AS {})", aggregate, combined, alias)
        };

        let mut fragment = first.derive(expr, result_type);
        for other in fragments.iter().skip(1) {
            fragment.merge_dependencies(other);
        }
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::sql_dialect::DialectKind;

    #[test]
    fn test_union_of_literals_is_flat() {
        let fragment = result("1 | 2 | 3 | 4 | 5");
        assert_eq!(fragment.cardinality(), Cardinality::Array);
        assert_eq!(fragment.expression.matches("UNION ALL").count(), 4);
        assert!(fragment.expression.len() < 2048);
    }

    #[test]
    fn test_union_operator_keeps_duplicates() {
        let fragment = result("(1 | 2 | 2 | 3)");
        assert_eq!(fragment.expression.matches("AS branch").count(), 4);
        assert!(!fragment.expression.contains("_dup"));
        assert!(fragment.expression.contains("ORDER BY u"));
        assert_eq!(fragment.fhir_type(), Some("integer"));
    }

    #[test]
    fn test_union_function_removes_duplicates() {
        let fragment = result("1.union(1)");
        assert!(fragment.expression.contains("ROW_NUMBER() OVER (PARTITION BY CAST(u"));
        assert!(fragment.expression.ends_with("._dup = 1)"));
        assert!(!result("1.combine(1)").expression.contains("_dup"));
    }

    #[test]
    fn test_empty_operands_are_skipped() {
        let fragment = result("{} | 1");
        assert_eq!(fragment.expression.matches("AS branch").count(), 1);
        assert_eq!(result("{} | {}").expression, "CAST(NULL AS JSON)");
    }

    #[test]
    fn test_document_values_filter_nulls() {
        let sql = translate("Patient.gender | Patient.birthDate", DialectKind::Postgres)
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(sql.contains(".v IS NOT NULL"));
        assert!(sql.contains("jsonb_agg("));
    }
}
