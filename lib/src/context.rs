use std::{cell::RefCell, sync::Arc};

use tracing::{debug, instrument, trace};

use crate::{
  error::{PropagationMiss, Result},
  node::{fresh_id, LexicalScope, Node, ScopeId, Subgraph},
  op::{Attributes, Operator},
  propagate::{self, PropagationConfig},
  types::Type,
  var::Var,
};

/// Construction state: the stack of open subgraph scopes and, optionally, the
/// evaluator used to fold constants. Not shareable across threads.
#[derive(Debug, Default)]
pub struct Context {
  scopes: RefCell<Vec<ScopeId>>,
  propagation: Option<PropagationConfig>,
}

struct ScopeGuard<'a> {
  scopes: &'a RefCell<Vec<ScopeId>>,
}

impl Drop for ScopeGuard<'_> {
  fn drop(&mut self) {
    self.scopes.borrow_mut().pop();
  }
}

impl Context {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_propagation(config: PropagationConfig) -> Self {
    Context {
      scopes: RefCell::new(Vec::new()),
      propagation: Some(config),
    }
  }

  pub fn propagation(&self) -> Option<&PropagationConfig> {
    self.propagation.as_ref()
  }

  fn lexical(&self) -> LexicalScope {
    Arc::from(self.scopes.borrow().as_slice())
  }

  fn enter(&self, scope: ScopeId) -> ScopeGuard<'_> {
    self.scopes.borrow_mut().push(scope);
    ScopeGuard { scopes: &self.scopes }
  }

  /// A top-level graph input.
  pub fn argument(&self, name: impl Into<String>, ty: Type) -> Var {
    Var::argument(name, ty, Arc::from(Vec::new()))
  }

  pub fn arguments<S: Into<String>>(&self, specs: impl IntoIterator<Item = (S, Type)>) -> Vec<Var> {
    specs.into_iter().map(|(name, ty)| self.argument(name, ty)).collect()
  }

  /// Builds a body in a fresh scope. `body` receives the body's own argument
  /// placeholders; the scope is closed again even if `body` fails.
  pub fn subgraph<F>(&self, name: &str, arguments: Vec<(String, Type)>, body: F) -> Result<Subgraph>
  where
    F: FnOnce(&Context, &[Var]) -> Result<Vec<Var>>,
  {
    let scope = ScopeId(fresh_id());
    let _guard = self.enter(scope);
    let lexical = self.lexical();
    let arguments: Vec<Var> = arguments
      .into_iter()
      .map(|(arg, ty)| Var::argument(arg, ty, lexical.clone()))
      .collect();
    let results = body(self, &arguments)?;
    trace!("closed {} ({}) with {} results", scope, name, results.len());
    Ok(Subgraph {
      name: name.to_string(),
      scope,
      arguments,
      results,
    })
  }

  /// Creates a node: infers its output types, then tries to fold its values.
  #[instrument(level = "trace", skip_all, fields(op = %op.id()))]
  pub fn apply(
    &self,
    op: Arc<dyn Operator>,
    inputs: Vec<Option<Var>>,
    attributes: Attributes,
    bodies: Vec<Subgraph>,
  ) -> Result<Vec<Var>> {
    let types = op.infer(&inputs, &attributes, &bodies)?;
    let node = Arc::new(Node::new(op, attributes, inputs, types, bodies, self.lexical()));
    self.fold(&node);
    Ok(node.output_vars())
  }

  fn fold(&self, node: &Arc<Node>) {
    let values = match node.op().propagate(node.inputs(), node.attributes()) {
      Some(values) => Ok(values),
      None => match &self.propagation {
        Some(config) if node.op().foldable() => propagate::evaluate_node(config, node),
        _ => Err(PropagationMiss::Disabled),
      },
    };
    match values {
      Ok(values) => node.attach(values),
      Err(miss) => debug!("{:?} has no value: {}", node, miss),
    }
  }
}
