//! Lexical scopes for iteration variables.
//!
//! `VariableScope` is the single source of truth for `$this`, `$index` and
//! `$total` during one translation. Each iteration construct pushes a frame
//! and pops it on exit; lookups walk from the innermost frame outwards, so
//! an inner binding shadows an outer one only while its frame is live.

use std::collections::HashMap;

use super::fragment::SqlFragment;

pub const THIS: &str = "$this";
pub const INDEX: &str = "$index";
pub const TOTAL: &str = "$total";

#[derive(Debug, Clone, PartialEq)]
pub struct VariableBinding {
    pub name: String,
    /// SQL for the value, valid against `fragment.source_table`.
    pub fragment: SqlFragment,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFrame {
    bindings: HashMap<String, VariableBinding>,
}

impl ScopeFrame {
    pub fn new() -> Self {
        ScopeFrame::default()
    }

    /// Frame for one iteration: `$this` plus optional `$index`/`$total`.
    pub fn iteration(
        this: SqlFragment,
        index: Option<SqlFragment>,
        total: Option<SqlFragment>,
    ) -> Self {
        let mut frame = ScopeFrame::new().bind(THIS, this);
        if let Some(index) = index {
            frame = frame.bind(INDEX, index);
        }
        if let Some(total) = total {
            frame = frame.bind(TOTAL, total);
        }
        frame
    }

    pub fn bind(mut self, name: &str, fragment: SqlFragment) -> Self {
        self.bindings.insert(
            name.to_string(),
            VariableBinding {
                name: name.to_string(),
                fragment,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&VariableBinding> {
        self.bindings.get(name)
    }
}

#[derive(Debug, Default)]
pub struct VariableScope {
    frames: Vec<ScopeFrame>,
}

impl VariableScope {
    pub fn new() -> Self {
        VariableScope::default()
    }

    pub fn push(&mut self, frame: ScopeFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<ScopeFrame> {
        self.frames.pop()
    }

    /// Innermost binding for `name`.
    pub fn resolve(&self, name: &str) -> Option<&VariableBinding> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_dialect::SqlScalar;
    use crate::translator::fragment::ResultType;

    fn value(expr: &str) -> SqlFragment {
        SqlFragment::new(expr, "base", ResultType::native(SqlScalar::Integer, None))
    }

    #[test]
    fn test_inner_binding_shadows_outer() {
        let mut scope = VariableScope::new();
        scope.push(ScopeFrame::iteration(value("b.value"), Some(value("b._index")), None));
        scope.push(ScopeFrame::iteration(value("a.value"), None, None));

        assert_eq!(scope.resolve(THIS).unwrap().fragment.expression, "a.value");
        // $index is only bound by the outer frame
        assert_eq!(scope.resolve(INDEX).unwrap().fragment.expression, "b._index");

        scope.pop();
        assert_eq!(scope.resolve(THIS).unwrap().fragment.expression, "b.value");
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn test_unbound_after_pop() {
        let mut scope = VariableScope::new();
        scope.push(ScopeFrame::new().bind(TOTAL, value("3")));
        scope.pop();
        assert!(scope.resolve(TOTAL).is_none());
    }
}
