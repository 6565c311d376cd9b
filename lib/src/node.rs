use std::{
  collections::HashSet,
  fmt,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, OnceLock,
  },
};

use serde::Serialize;
use tracing::warn;

use crate::{
  op::{Attributes, OpId, Operator},
  types::Type,
  value::Value,
  var::{Origin, Var},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Node, argument and scope ids share one counter, so id order is construction order.
pub(crate) fn fresh_id() -> u64 {
  NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(pub(crate) u64);

impl fmt::Display for ScopeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "scope#{}", self.0)
  }
}

/// Chain of subgraph scopes open at creation time, outermost first.
pub(crate) type LexicalScope = Arc<[ScopeId]>;

pub(crate) struct Output {
  ty: Type,
  value: OnceLock<Value>,
}

pub struct Node {
  id: NodeId,
  op: Arc<dyn Operator>,
  attributes: Attributes,
  inputs: Vec<Option<Var>>,
  outputs: Vec<Output>,
  bodies: Vec<Subgraph>,
  scope: LexicalScope,
}

impl Node {
  pub(crate) fn new(
    op: Arc<dyn Operator>,
    attributes: Attributes,
    inputs: Vec<Option<Var>>,
    types: Vec<Type>,
    bodies: Vec<Subgraph>,
    scope: LexicalScope,
  ) -> Self {
    Node {
      id: NodeId(fresh_id()),
      op,
      attributes,
      inputs,
      outputs: types
        .into_iter()
        .map(|ty| Output {
          ty,
          value: OnceLock::new(),
        })
        .collect(),
      bodies,
      scope,
    }
  }

  pub fn id(&self) -> NodeId {
    self.id
  }

  pub fn op(&self) -> &dyn Operator {
    self.op.as_ref()
  }

  pub fn op_id(&self) -> OpId {
    self.op.id()
  }

  pub fn attributes(&self) -> &Attributes {
    &self.attributes
  }

  pub fn inputs(&self) -> &[Option<Var>] {
    &self.inputs
  }

  pub fn bodies(&self) -> &[Subgraph] {
    &self.bodies
  }

  pub fn output_count(&self) -> usize {
    self.outputs.len()
  }

  pub fn output_type(&self, slot: usize) -> &Type {
    &self.outputs[slot].ty
  }

  pub fn output_value(&self, slot: usize) -> Option<&Value> {
    self.outputs[slot].value.get()
  }

  pub(crate) fn scope(&self) -> &LexicalScope {
    &self.scope
  }

  pub(crate) fn output_vars(self: &Arc<Self>) -> Vec<Var> {
    (0..self.outputs.len()).map(|slot| Var::output(self.clone(), slot)).collect()
  }

  /// One-shot attachment of propagated values. Values that do not fit the
  /// inferred type are dropped.
  pub(crate) fn attach(&self, values: Vec<Value>) {
    if values.len() != self.outputs.len() {
      warn!(
        "{:?}: expected {} propagated values, got {}",
        self,
        self.outputs.len(),
        values.len()
      );
      return;
    }
    for (slot, (output, value)) in self.outputs.iter().zip(values).enumerate() {
      if !value.matches(&output.ty) {
        warn!("{:?}: propagated {} does not fit output {} of type {}", self, value, slot, output.ty);
        continue;
      }
      let _ = output.value.set(value);
    }
  }

  /// Values read by the bodies that are defined outside of them, in key order.
  pub(crate) fn free_vars(&self) -> Vec<Var> {
    let owned: Vec<ScopeId> = self.bodies.iter().map(|b| b.scope).collect();
    let inside = |scope: &[ScopeId]| scope.iter().any(|s| owned.contains(s));
    let mut seen = HashSet::new();
    let mut visited = HashSet::new();
    let mut free = Vec::new();
    let mut stack: Vec<Var> = self.bodies.iter().flat_map(|b| b.results.iter().cloned()).collect();
    while let Some(var) = stack.pop() {
      if !seen.insert(var.key()) {
        continue;
      }
      if !inside(&var.scope()[..]) {
        free.push(var);
        continue;
      }
      if let Origin::Output(node, _) = var.origin() {
        if visited.insert(node.id) {
          stack.extend(node.inputs.iter().flatten().cloned());
          stack.extend(node.bodies.iter().flat_map(|b| b.results.iter().cloned()));
        }
      }
    }
    free.sort_by_key(Var::key);
    free
  }
}

impl fmt::Debug for Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.op.id().name, self.id.0)
  }
}

/// A body owned by a control-flow node: its own argument placeholders and the
/// results it hands back to the owner.
#[derive(Debug, Clone)]
pub struct Subgraph {
  pub(crate) name: String,
  pub(crate) scope: ScopeId,
  pub(crate) arguments: Vec<Var>,
  pub(crate) results: Vec<Var>,
}

impl Subgraph {
  /// The attribute name under which the owner stores this body.
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn scope(&self) -> ScopeId {
    self.scope
  }

  pub fn arguments(&self) -> &[Var] {
    &self.arguments
  }

  pub fn results(&self) -> &[Var] {
    &self.results
  }

  pub fn result_types(&self) -> Vec<Type> {
    self.results.iter().map(|v| v.ty().clone()).collect()
  }
}
