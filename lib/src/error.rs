use thiserror::Error;

use crate::op::OpId;

/// Raised by an operator's inference rule. The offending node is never created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inference failed for {op}: {reason}")]
pub struct InferenceError {
  pub op: String,
  pub reason: String,
}

impl InferenceError {
  pub fn new(op: OpId, reason: impl Into<String>) -> Self {
    Self {
      op: op.to_string(),
      reason: reason.into(),
    }
  }

  /// Used by the type system when no single operator is to blame.
  pub fn types(reason: impl Into<String>) -> Self {
    Self {
      op: "<types>".to_string(),
      reason: reason.into(),
    }
  }

  /// Rebinds an error raised by a shared helper to the calling operator.
  pub fn at(self, op: OpId) -> Self {
    Self {
      op: op.to_string(),
      reason: self.reason,
    }
  }
}

/// Failures of graph shape rather than of types. Fatal to emission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
  #[error("{var} is reachable from the results but is neither a graph argument nor defined in an enclosing scope")]
  DanglingCapture { var: String },
  #[error("{var} reads an argument of subgraph {scope} but is needed outside of it")]
  ScopeEscape { var: String, scope: String },
  #[error("name `{0}` is bound more than once")]
  DuplicateName(String),
  #[error("{0} is not an argument placeholder")]
  NotAnArgument(String),
  #[error("invalid reconstruction: {0}")]
  InvalidReconstruction(String),
  #[error("graph has no constructor to replay")]
  MissingConstructor,
  #[error("dependency cycle between nodes")]
  Cycle,
  #[error("validation failed: {0}")]
  Validation(String),
}

/// Failures of the evaluator behind value propagation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
  #[error("no kernel for {0}")]
  Unsupported(String),
  #[error("missing input `{0}`")]
  MissingInput(String),
  #[error("graph has no input `{0}`")]
  UnknownInput(String),
  #[error("input `{0}` holds fewer or more elements than its shape")]
  MalformedInput(String),
  #[error("undefined value `{0}`")]
  UndefinedValue(String),
  #[error("{op}: {reason}")]
  Kernel { op: String, reason: String },
  #[error("loop exceeded {0} iterations")]
  IterationLimit(usize),
  #[error(transparent)]
  InvalidModel(#[from] StructuralError),
}

impl EvalError {
  pub fn kernel(op: &str, reason: impl Into<String>) -> Self {
    EvalError::Kernel {
      op: op.to_string(),
      reason: reason.into(),
    }
  }
}

/// Mismatch between a value and the type it is decoded or checked against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value does not fit {expected}: {reason}")]
pub struct ValueError {
  pub expected: String,
  pub reason: String,
}

/// Why a node carries no propagated value. Logged, never returned to callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropagationMiss {
  #[error("propagation is disabled")]
  Disabled,
  #[error("input {0} has no known value")]
  MissingInput(usize),
  #[error("captured {0} has no known value")]
  MissingCapture(String),
  #[error("minimal graph could not be built: {0}")]
  Structure(#[from] StructuralError),
  #[error("evaluator rejected the node: {0}")]
  Evaluator(#[from] EvalError),
  #[error("evaluator output `{0}` is missing")]
  MissingOutput(String),
  #[error(transparent)]
  Decode(#[from] ValueError),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Inference(#[from] InferenceError),
  #[error(transparent)]
  Structural(#[from] StructuralError),
  #[error(transparent)]
  Evaluation(#[from] EvalError),
  #[error(transparent)]
  Value(#[from] ValueError),
}

pub type Result<T> = std::result::Result<T, Error>;
