//! One named stage of the final statement.

use std::collections::BTreeSet;

/// The document table every pipeline starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseTable {
    pub table_name: String,
    pub alias: String,
    pub id_column: String,
    pub resource_column: String,
    /// Row restrictions (resource type) applied wherever the base table is read.
    pub filters: Vec<String>,
}

impl BaseTable {
    pub fn new(table_name: &str, alias: &str, id_column: &str, resource_column: &str) -> Self {
        BaseTable {
            table_name: table_name.to_string(),
            alias: alias.to_string(),
            id_column: id_column.to_string(),
            resource_column: resource_column.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn from_clause(&self) -> String {
        format!("{} AS {}", self.table_name, self.alias)
    }

    pub fn id_expr(&self) -> String {
        format!("{}.{}", self.alias, self.id_column)
    }

    pub fn resource_expr(&self) -> String {
        format!("{}.{}", self.alias, self.resource_column)
    }

    pub fn add_filter(&mut self, filter: String) {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
    }
}

impl Default for BaseTable {
    fn default() -> Self {
        BaseTable::new("fhir_resources", "base", "id", "resource")
    }
}

/// Row granularity of a stage's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One row per collection element, ordered by the ordering columns.
    Element,
    /// One row per document.
    Document,
}

/// Window used to expose `_index` and `_total` for element stages.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub partition_by: String,
    pub order_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    /// Select list of the inner query, e.g. `base.id AS id`.
    pub columns: Vec<String>,
    pub from_clause: String,
    /// Conditions evaluated in the inner query against the source rows.
    pub source_filters: Vec<String>,
    /// Whether base table filters apply to the inner query.
    pub reads_base: bool,
    pub group_by: Option<String>,
    pub window: Option<WindowSpec>,
    pub window_enabled: bool,
    /// Conditions on this stage's own columns (`{name}.value`, `{name}._index`).
    pub filters: Vec<String>,
    pub dependencies: BTreeSet<String>,
    pub ordering_columns: Vec<String>,
    pub granularity: Granularity,
}

impl Cte {
    pub fn new(name: &str, from_clause: &str, granularity: Granularity) -> Self {
        Cte {
            name: name.to_string(),
            columns: Vec::new(),
            from_clause: from_clause.to_string(),
            source_filters: Vec::new(),
            reads_base: false,
            group_by: None,
            window: None,
            window_enabled: false,
            filters: Vec::new(),
            dependencies: BTreeSet::new(),
            ordering_columns: Vec::new(),
            granularity,
        }
    }

    pub fn with_column(mut self, column: String) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_dependency(mut self, dependency: &str) -> Self {
        self.dependencies.insert(dependency.to_string());
        self
    }

    pub fn add_filter(&mut self, filter: String) {
        self.filters.push(filter);
    }

    /// Turn on `_index`/`_total`. Returns false for stages without a window.
    pub fn enable_window(&mut self) -> bool {
        if self.window.is_some() {
            self.window_enabled = true;
        }
        self.window_enabled
    }

    /// `{name}.{column}` for every ordering column.
    pub fn qualified_ordering(&self) -> Vec<String> {
        self.ordering_columns
            .iter()
            .map(|c| format!("{}.{}", self.name, c))
            .collect()
    }

    pub fn render(&self, base_filters: &[String]) -> String {
        let mut select_list = self.columns.clone();
        if let (true, Some(window)) = (self.window_enabled, &self.window) {
            let order = if window.order_by.is_empty() {
                String::new()
            } else {
                format!(" ORDER BY {}", window.order_by.join(", "))
            };
            select_list.push(format!(
                "ROW_NUMBER() OVER (PARTITION BY {}{}) - 1 AS _index",
                window.partition_by, order
            ));
            select_list.push(format!(
                "COUNT(*) OVER (PARTITION BY {}) AS _total",
                window.partition_by
            ));
        }

        let mut conditions: Vec<&str> = Vec::new();
        if self.reads_base {
            conditions.extend(base_filters.iter().map(String::as_str));
        }
        conditions.extend(self.source_filters.iter().map(String::as_str));

        let mut inner = format!("SELECT {} FROM {}", select_list.join(", "), self.from_clause);
        if !conditions.is_empty() {
            inner.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }
        if let Some(group_by) = &self.group_by {
            inner.push_str(&format!(" GROUP BY {}", group_by));
        }

        if self.filters.is_empty() {
            inner
        } else {
            format!(
                "SELECT * FROM ({}) AS {} WHERE {}",
                inner,
                self.name,
                self.filters.join(" AND ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_stage() -> Cte {
        let mut cte = Cte::new("name_cte_1", "fhir_resources AS base", Granularity::Element)
            .with_column("base.id AS id".to_string())
            .with_column("e1.value AS value".to_string())
            .with_column("e1.ordinality AS ord_1".to_string());
        cte.reads_base = true;
        cte.ordering_columns = vec!["ord_1".to_string()];
        cte.window = Some(WindowSpec {
            partition_by: "base.id".to_string(),
            order_by: vec!["e1.ordinality".to_string()],
        });
        cte
    }

    #[test]
    fn test_render_plain_stage() {
        let sql = element_stage().render(&["base.kind = 'x'".to_string()]);
        assert_eq!(
            sql,
            "SELECT base.id AS id, e1.value AS value, e1.ordinality AS ord_1 \
             FROM fhir_resources AS base WHERE base.kind = 'x'"
        );
    }

    #[test]
    fn test_filters_wrap_the_stage() {
        let mut cte = element_stage();
        assert!(cte.enable_window());
        cte.add_filter("name_cte_1._index = 0".to_string());
        let sql = cte.render(&[]);
        assert!(sql.starts_with("SELECT * FROM (SELECT base.id AS id"));
        assert!(sql.contains("ROW_NUMBER() OVER (PARTITION BY base.id ORDER BY e1.ordinality) - 1 AS _index"));
        assert!(sql.ends_with(") AS name_cte_1 WHERE name_cte_1._index = 0"));
    }

    #[test]
    fn test_document_stage_has_no_window() {
        let mut cte = Cte::new("agg_cte_2", "fhir_resources AS base", Granularity::Document);
        assert!(!cte.enable_window());
    }

    #[test]
    fn test_base_filters_deduplicate() {
        let mut base = BaseTable::default();
        base.add_filter("a".to_string());
        base.add_filter("a".to_string());
        assert_eq!(base.filters.len(), 1);
        assert_eq!(base.from_clause(), "fhir_resources AS base");
        assert_eq!(base.id_expr(), "base.id");
    }
}
