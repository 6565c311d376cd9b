use std::{collections::BTreeMap, fmt, sync::Arc};

use itertools::Itertools;
use tracing::{info, instrument};

use crate::{
  build::{emit, Builder},
  context::Context,
  error::{EvalError, Result, StructuralError, ValueError},
  model::{Model, ValidationLevel},
  propagate::Evaluator,
  value::Value,
  var::Var,
};

pub type Constructor = Arc<dyn Fn(&Context, &[Var]) -> Result<Vec<Var>> + Send + Sync>;

/// Named results of a computation, optionally with a fixed argument list and
/// the function that built it.
#[derive(Clone)]
pub struct Graph {
  name: String,
  arguments: Option<Vec<(String, Var)>>,
  results: Vec<(String, Var)>,
  constructor: Option<Constructor>,
}

/// Shorthand for `Graph::new`.
pub fn results<S: Into<String>>(results: impl IntoIterator<Item = (S, Var)>) -> Result<Graph> {
  Graph::new(results)
}

fn check_unique<'a>(names: impl Iterator<Item = &'a String>) -> std::result::Result<(), StructuralError> {
  match names.duplicates().next() {
    Some(name) => Err(StructuralError::DuplicateName(name.clone())),
    None => Ok(()),
  }
}

impl Graph {
  pub fn new<S: Into<String>>(results: impl IntoIterator<Item = (S, Var)>) -> Result<Graph> {
    let results: Vec<(String, Var)> = results.into_iter().map(|(n, v)| (n.into(), v)).collect();
    check_unique(results.iter().map(|(n, _)| n))?;
    Ok(Graph::from_parts("graph".to_string(), None, results))
  }

  pub(crate) fn from_parts(
    name: String,
    arguments: Option<Vec<(String, Var)>>,
    results: Vec<(String, Var)>,
  ) -> Graph {
    Graph {
      name,
      arguments,
      results,
      constructor: None,
    }
  }

  pub fn named(self, name: impl Into<String>) -> Self {
    Graph {
      name: name.into(),
      ..self
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Fixes the graph inputs and their order. Only argument placeholders are accepted.
  pub fn with_arguments(self, arguments: &[Var]) -> Result<Self> {
    let named = arguments
      .iter()
      .map(|var| match var.name() {
        Some(name) => Ok((name.to_string(), var.clone())),
        None => Err(StructuralError::NotAnArgument(var.to_string())),
      })
      .collect::<std::result::Result<Vec<_>, _>>()?;
    check_unique(named.iter().map(|(n, _)| n))?;
    Ok(Graph {
      arguments: Some(named),
      ..self
    })
  }

  /// Remembers how the results were built, for `reconstruct`.
  pub fn with_constructor<F>(self, constructor: F) -> Self
  where
    F: Fn(&Context, &[Var]) -> Result<Vec<Var>> + Send + Sync + 'static,
  {
    Graph {
      constructor: Some(Arc::new(constructor)),
      ..self
    }
  }

  pub fn results(&self) -> &[(String, Var)] {
    &self.results
  }

  pub fn result(&self, name: &str) -> Option<&Var> {
    self.results.iter().find(|(n, _)| n == name).map(|(_, v)| v)
  }

  /// The explicit argument list, or every top-level argument the results
  /// depend on, in construction order.
  pub fn arguments(&self) -> std::result::Result<Vec<(String, Var)>, StructuralError> {
    match &self.arguments {
      Some(arguments) => Ok(arguments.clone()),
      None => Ok(Builder::discover(None, &self.results)?.arguments().to_vec()),
    }
  }

  /// Replays the constructor on `arguments`, which take the place (and the
  /// names) of the current arguments.
  #[instrument(level = "debug", skip_all, fields(graph = %self.name))]
  pub fn reconstruct(&self, cx: &Context, arguments: &[Var]) -> Result<Graph> {
    let constructor = self.constructor.as_ref().ok_or(StructuralError::MissingConstructor)?;
    let current = self.arguments()?;
    if current.len() != arguments.len() {
      return Err(
        StructuralError::InvalidReconstruction(format!(
          "expected {} arguments, got {}",
          current.len(),
          arguments.len()
        ))
        .into(),
      );
    }
    for ((name, old), new) in current.iter().zip(arguments) {
      if !new.ty().is_subtype_of(old.ty()) {
        return Err(
          StructuralError::InvalidReconstruction(format!(
            "{} of type {} cannot replace `{}` of type {}",
            new,
            new.ty(),
            name,
            old.ty()
          ))
          .into(),
        );
      }
    }
    let outputs = constructor(cx, arguments)?;
    if outputs.len() != self.results.len() {
      return Err(
        StructuralError::InvalidReconstruction(format!(
          "constructor returned {} results, expected {}",
          outputs.len(),
          self.results.len()
        ))
        .into(),
      );
    }
    Ok(Graph {
      name: self.name.clone(),
      arguments: Some(
        current
          .into_iter()
          .zip(arguments)
          .map(|((name, _), var)| (name, var.clone()))
          .collect(),
      ),
      results: self.results.iter().zip(outputs).map(|((name, _), var)| (name.clone(), var)).collect(),
      constructor: self.constructor.clone(),
    })
  }

  /// Linearizes the graph. Repeated calls give equal models.
  #[instrument(level = "debug", skip_all, fields(graph = %self.name))]
  pub fn emit(&self, validation: ValidationLevel) -> std::result::Result<Model, StructuralError> {
    let builder = Builder::discover(self.arguments.as_deref(), &self.results)?;
    let plan = builder.plan()?;
    let model = emit::emit(&plan, &self.name)?;
    model.validate(validation)?;
    Ok(model)
  }

  /// Emits, checks `inputs` against the arguments, runs `evaluator` and decodes
  /// the results by their types.
  #[instrument(level = "debug", skip_all, fields(graph = %self.name, evaluator = evaluator.name()))]
  pub fn evaluate(&self, evaluator: &dyn Evaluator, inputs: &[(&str, Value)]) -> Result<BTreeMap<String, Value>> {
    let model = self.emit(ValidationLevel::Structure)?;
    let arguments = self.arguments()?;
    let mut feeds = BTreeMap::new();
    for (name, value) in inputs {
      let (_, argument) = arguments
        .iter()
        .find(|(n, _)| n.as_str() == *name)
        .ok_or_else(|| EvalError::UnknownInput(name.to_string()))?;
      if !value.matches(argument.ty()) {
        return Err(
          ValueError {
            expected: argument.ty().to_string(),
            reason: format!("input `{}` got {}", name, value),
          }
          .into(),
        );
      }
      feeds.insert(name.to_string(), value.to_native());
    }
    let mut outputs = evaluator.run(&model, &feeds, ValidationLevel::None)?;
    info!("evaluated {} results", outputs.len());
    let mut decoded = BTreeMap::new();
    for (name, var) in &self.results {
      let native = outputs
        .remove(name)
        .ok_or_else(|| EvalError::UndefinedValue(name.clone()))?;
      decoded.insert(name.clone(), Value::from_native(var.ty(), native)?);
    }
    Ok(decoded)
  }
}

impl fmt::Debug for Graph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Graph")
      .field("name", &self.name)
      .field("arguments", &self.arguments)
      .field("results", &self.results)
      .field("constructor", &self.constructor.is_some())
      .finish()
  }
}
