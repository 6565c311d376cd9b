use std::{
  collections::{BTreeMap, HashMap},
  fmt,
  sync::Arc,
};

use tracing::{instrument, trace};

use crate::{
  error::{EvalError, PropagationMiss},
  graph::Graph,
  model::{Model, ValidationLevel},
  node::Node,
  value::{NativeValue, Value},
  var::Var,
};

/// Runs a finished model on concrete inputs given in the evaluator's native
/// representation, keyed by graph input name. Outputs are keyed by result name.
pub trait Evaluator: Send + Sync {
  fn name(&self) -> &str;

  fn run(
    &self,
    model: &Model,
    inputs: &BTreeMap<String, NativeValue>,
    validation: ValidationLevel,
  ) -> Result<BTreeMap<String, NativeValue>, EvalError>;
}

/// Enables value propagation for a `Context`.
#[derive(Clone)]
pub struct PropagationConfig {
  pub evaluator: Arc<dyn Evaluator>,
  /// Strictness passed to the evaluator for every minimal graph.
  pub validation: ValidationLevel,
}

impl PropagationConfig {
  pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
    PropagationConfig {
      evaluator,
      validation: ValidationLevel::None,
    }
  }

  pub fn with_validation(self, validation: ValidationLevel) -> Self {
    Self { validation, ..self }
  }
}

impl fmt::Debug for PropagationConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PropagationConfig")
      .field("evaluator", &self.evaluator.name())
      .field("validation", &self.validation)
      .finish()
  }
}

/// Folds one freshly created node by running it in isolation: its inputs and
/// the values its bodies capture become the arguments of a minimal graph.
#[instrument(level = "debug", skip_all, fields(node = ?node, evaluator = config.evaluator.name()))]
pub(crate) fn evaluate_node(config: &PropagationConfig, node: &Arc<Node>) -> Result<Vec<Value>, PropagationMiss> {
  let mut boundary: Vec<(String, Var)> = Vec::new();
  let mut feeds = BTreeMap::new();
  let mut bound = HashMap::new();

  for (i, input) in node.inputs().iter().enumerate() {
    let Some(var) = input else { continue };
    let value = var.value().ok_or(PropagationMiss::MissingInput(i))?;
    if bound.contains_key(&var.key()) {
      continue;
    }
    let name = format!("input_{}", i);
    bound.insert(var.key(), name.clone());
    feeds.insert(name.clone(), value.to_native());
    boundary.push((name, var.clone()));
  }
  for (j, var) in node.free_vars().into_iter().enumerate() {
    if bound.contains_key(&var.key()) {
      continue;
    }
    let value = var
      .value()
      .ok_or_else(|| PropagationMiss::MissingCapture(var.to_string()))?;
    let name = format!("capture_{}", j);
    bound.insert(var.key(), name.clone());
    feeds.insert(name.clone(), value.to_native());
    boundary.push((name, var));
  }

  let results = node
    .output_vars()
    .into_iter()
    .enumerate()
    .map(|(k, var)| (format!("output_{}", k), var))
    .collect::<Vec<_>>();
  let graph = Graph::from_parts(format!("fold_{}", node.id().0), Some(boundary), results.clone());
  let model = graph.emit(ValidationLevel::None)?;
  trace!("minimal graph: {:?}", model);

  let mut outputs = config.evaluator.run(&model, &feeds, config.validation)?;
  results
    .iter()
    .map(|(name, var)| -> Result<Value, PropagationMiss> {
      let native = outputs
        .remove(name)
        .ok_or_else(|| PropagationMiss::MissingOutput(name.clone()))?;
      Ok(Value::from_native(var.ty(), native)?)
    })
    .collect()
}
