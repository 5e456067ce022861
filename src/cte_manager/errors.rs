use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CteError {
    #[error("CTE '{cte}' depends on '{dependency}', which is neither a registered CTE nor an external table")]
    MissingDependency { cte: String, dependency: String },

    #[error("Cyclic CTE dependency between: {}", members.join(" -> "))]
    CyclicDependency { members: Vec<String> },

    #[error("Unknown CTE stage '{0}'")]
    UnknownStage(String),

    #[error("CTE '{0}' is already registered")]
    DuplicateStage(String),
}
