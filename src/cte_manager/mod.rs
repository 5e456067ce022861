//! CTE Manager: owns the staged sub-queries of one translation, orders them
//! by dependency and assembles the final statement.
//!
//! Stages are registered by the translator while it walks the AST. At
//! assembly time only the stages reachable from the final fragment are
//! emitted, in an order where every stage follows the stages it reads.
//! The base document table is external: it may be referenced freely and is
//! never counted as a missing dependency.

use std::collections::{BTreeSet, HashSet};

pub mod cte;
pub mod errors;

pub use cte::{BaseTable, Cte, Granularity, WindowSpec};
pub use errors::CteError;

use crate::translator::fragment::SqlFragment;
use crate::utils::cte_naming::{generate_cte_name, subquery_alias};

#[derive(Debug, Clone)]
pub struct CteManager {
    base: BaseTable,
    external_tables: BTreeSet<String>,
    /// Registration order; stages are only ever appended.
    ctes: Vec<Cte>,
    counter: usize,
}

impl CteManager {
    pub fn new(base: BaseTable) -> Self {
        let mut external_tables = BTreeSet::new();
        external_tables.insert(base.table_name.clone());
        external_tables.insert(base.alias.clone());
        CteManager {
            base,
            external_tables,
            ctes: Vec::new(),
            counter: 0,
        }
    }

    pub fn base(&self) -> &BaseTable {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseTable {
        &mut self.base
    }

    pub fn add_external_table(&mut self, name: &str) {
        self.external_tables.insert(name.to_string());
    }

    pub fn is_external(&self, name: &str) -> bool {
        self.external_tables.contains(name)
    }

    /// Fresh stage name derived from `label`, e.g. `given_cte_3`.
    pub fn next_cte_name(&mut self, label: &str) -> String {
        self.counter += 1;
        generate_cte_name(label, self.counter)
    }

    /// Fresh subquery alias such as `e4`. Shares the stage counter so aliases
    /// never collide with each other within one statement.
    pub fn next_alias(&mut self, prefix: &str) -> String {
        self.counter += 1;
        subquery_alias(prefix, self.counter)
    }

    pub fn register(&mut self, cte: Cte) -> Result<(), CteError> {
        if self.get(&cte.name).is_some() {
            return Err(CteError::DuplicateStage(cte.name));
        }
        log::debug!(
            "registering CTE '{}' ({:?}) depending on {:?}",
            cte.name,
            cte.granularity,
            cte.dependencies
        );
        self.ctes.push(cte);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Cte> {
        self.ctes.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Cte, CteError> {
        self.ctes
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| CteError::UnknownStage(name.to_string()))
    }

    pub fn ctes(&self) -> &[Cte] {
        &self.ctes
    }

    pub fn is_empty(&self) -> bool {
        self.ctes.is_empty()
    }

    /// All registered stages in dependency order.
    ///
    /// Greedy: repeatedly emit every stage whose dependencies are already
    /// available, starting from the external tables. A pass that emits
    /// nothing means the remaining stages form a cycle.
    pub fn ordered(&self) -> Result<Vec<&Cte>, CteError> {
        let registered: HashSet<&str> = self.ctes.iter().map(|c| c.name.as_str()).collect();
        for cte in &self.ctes {
            if let Some(missing) = cte
                .dependencies
                .iter()
                .find(|d| !registered.contains(d.as_str()) && !self.is_external(d))
            {
                return Err(CteError::MissingDependency {
                    cte: cte.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let mut available: HashSet<&str> =
            self.external_tables.iter().map(String::as_str).collect();
        let mut ordered: Vec<&Cte> = Vec::with_capacity(self.ctes.len());
        let mut remaining: Vec<&Cte> = self.ctes.iter().collect();

        while !remaining.is_empty() {
            let before = remaining.len();
            let mut next_remaining = Vec::new();

            for cte in remaining {
                if cte.dependencies.iter().all(|d| available.contains(d.as_str())) {
                    available.insert(cte.name.as_str());
                    ordered.push(cte);
                } else {
                    next_remaining.push(cte);
                }
            }

            if next_remaining.len() == before {
                return Err(CteError::CyclicDependency {
                    members: Self::cycle_members(&next_remaining, &available),
                });
            }
            remaining = next_remaining;
        }

        log::debug!(
            "CTE order: {:?}",
            ordered.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
        );
        Ok(ordered)
    }

    // Walk unresolved dependencies from the first stuck stage until a name repeats.
    fn cycle_members(stuck: &[&Cte], available: &HashSet<&str>) -> Vec<String> {
        let Some(first) = stuck.first() else {
            return Vec::new();
        };
        let mut path: Vec<String> = Vec::new();
        let mut current = *first;
        loop {
            if let Some(pos) = path.iter().position(|n| n == &current.name) {
                let mut members = path.split_off(pos);
                members.push(current.name.clone());
                return members;
            }
            path.push(current.name.clone());
            let next = current
                .dependencies
                .iter()
                .filter(|d| !available.contains(d.as_str()))
                .find_map(|d| stuck.iter().find(|c| &c.name == d));
            match next {
                Some(next) => current = next,
                None => return path,
            }
        }
    }

    /// Stage names reachable from `roots` through dependency edges.
    fn reachable(&self, roots: impl IntoIterator<Item = String>) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut pending: Vec<String> = roots.into_iter().collect();
        while let Some(name) = pending.pop() {
            if seen.contains(&name) {
                continue;
            }
            if let Some(cte) = self.get(&name) {
                pending.extend(cte.dependencies.iter().cloned());
                seen.insert(name);
            }
        }
        seen
    }

    /// `WITH a AS (...), b AS (...) ` for the stages `fragment` needs.
    pub fn with_clause(&self, fragment: &SqlFragment) -> Result<String, CteError> {
        let mut roots: Vec<String> = fragment.dependencies.iter().cloned().collect();
        roots.push(fragment.source_table.clone());
        let needed = self.reachable(roots);

        let stages: Vec<String> = self
            .ordered()?
            .into_iter()
            .filter(|c| needed.contains(&c.name))
            .map(|c| format!("{} AS ({})", c.name, c.render(&self.base.filters)))
            .collect();

        if stages.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("WITH {} ", stages.join(", ")))
        }
    }

    /// Assemble the complete statement returning `fragment` as column `result`.
    ///
    /// Results are one row per document, or one row per element ordered by
    /// document and then by every carried ordering column. A reducing
    /// function over element rows is collapsed to one row per document.
    pub fn assemble(&self, fragment: &SqlFragment) -> Result<String, CteError> {
        let prefix = self.with_clause(fragment)?;
        let source = fragment.source_table.as_str();
        let expr = &fragment.expression;

        let body = if self.is_external(source) {
            self.select_from_base(expr, None)
        } else {
            let cte = self
                .get(source)
                .ok_or_else(|| CteError::UnknownStage(source.to_string()))?;

            let collapse = fragment.metadata.function.is_some()
                && !fragment.is_aggregate
                && cte.granularity == Granularity::Element;

            if collapse {
                log::debug!(
                    "collapsing '{}' over element stage '{}' to one row per document",
                    fragment.metadata.function.map(|f| f.name()).unwrap_or_default(),
                    cte.name
                );
                self.select_from_base(expr, Some(&cte.name))
            } else {
                match cte.granularity {
                    Granularity::Element => {
                        let mut order = vec![format!("{}.id", cte.name)];
                        order.extend(cte.qualified_ordering());
                        format!(
                            "SELECT {n}.id AS id, {e} AS result FROM {n} WHERE {e} IS NOT NULL ORDER BY {o}",
                            n = cte.name,
                            e = expr,
                            o = order.join(", ")
                        )
                    }
                    Granularity::Document => format!(
                        "SELECT {n}.id AS id, {e} AS result FROM {n} ORDER BY {n}.id",
                        n = cte.name,
                        e = expr
                    ),
                }
            }
        };

        Ok(format!("{}{}", prefix, body))
    }

    fn select_from_base(&self, expr: &str, grouped_stage: Option<&str>) -> String {
        let id = self.base.id_expr();
        let mut sql = format!(
            "SELECT {} AS id, {} AS result FROM {}",
            id,
            expr,
            self.base.from_clause()
        );
        if let Some(stage) = grouped_stage {
            sql.push_str(&format!(" LEFT JOIN {s} ON {s}.id = {id}", s = stage, id = id));
        }
        if !self.base.filters.is_empty() {
            sql.push_str(&format!(" WHERE {}", self.base.filters.join(" AND ")));
        }
        if grouped_stage.is_some() {
            sql.push_str(&format!(" GROUP BY {}", id));
        }
        sql.push_str(&format!(" ORDER BY {}", id));
        sql
    }
}
