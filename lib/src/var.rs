use std::{
  fmt,
  hash::{Hash, Hasher},
  sync::Arc,
};

use serde::Serialize;

use crate::{
  node::{fresh_id, LexicalScope, Node, NodeId},
  types::Type,
  value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArgId(pub(crate) u64);

/// A typed placeholder: a graph input or a subgraph argument.
pub struct Argument {
  pub(crate) id: ArgId,
  pub(crate) name: String,
  pub(crate) ty: Type,
  pub(crate) scope: LexicalScope,
}

/// Identity of a value. Two `Var` handles are the same value iff their keys are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarKey {
  Argument(ArgId),
  Output(NodeId, usize),
}

impl VarKey {
  /// Construction order.
  pub fn rank(&self) -> (u64, usize) {
    match self {
      VarKey::Argument(a) => (a.0, 0),
      VarKey::Output(n, slot) => (n.0, *slot),
    }
  }
}

#[derive(Clone)]
pub(crate) enum Origin {
  Argument(Arc<Argument>),
  Output(Arc<Node>, usize),
}

#[derive(Clone)]
pub struct Var(Origin);

impl Var {
  pub(crate) fn argument(name: impl Into<String>, ty: Type, scope: LexicalScope) -> Var {
    Var(Origin::Argument(Arc::new(Argument {
      id: ArgId(fresh_id()),
      name: name.into(),
      ty,
      scope,
    })))
  }

  pub(crate) fn output(node: Arc<Node>, slot: usize) -> Var {
    Var(Origin::Output(node, slot))
  }

  pub(crate) fn origin(&self) -> &Origin {
    &self.0
  }

  pub fn key(&self) -> VarKey {
    match &self.0 {
      Origin::Argument(a) => VarKey::Argument(a.id),
      Origin::Output(node, slot) => VarKey::Output(node.id(), *slot),
    }
  }

  pub fn ty(&self) -> &Type {
    match &self.0 {
      Origin::Argument(a) => &a.ty,
      Origin::Output(node, slot) => node.output_type(*slot),
    }
  }

  /// The propagated value, if construction could fold this var.
  pub fn value(&self) -> Option<&Value> {
    match &self.0 {
      Origin::Argument(_) => None,
      Origin::Output(node, slot) => node.output_value(*slot),
    }
  }

  pub fn node(&self) -> Option<&Arc<Node>> {
    match &self.0 {
      Origin::Argument(_) => None,
      Origin::Output(node, _) => Some(node),
    }
  }

  /// Placeholder name; `None` for node outputs.
  pub fn name(&self) -> Option<&str> {
    match &self.0 {
      Origin::Argument(a) => Some(&a.name),
      Origin::Output(..) => None,
    }
  }

  pub fn is_argument(&self) -> bool {
    matches!(self.0, Origin::Argument(_))
  }

  pub(crate) fn scope(&self) -> &LexicalScope {
    match &self.0 {
      Origin::Argument(a) => &a.scope,
      Origin::Output(node, _) => node.scope(),
    }
  }
}

impl PartialEq for Var {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}

impl Eq for Var {}

impl Hash for Var {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key().hash(state)
  }
}

impl fmt::Display for Var {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.0 {
      Origin::Argument(a) => write!(f, "%{}", a.name),
      Origin::Output(node, slot) => write!(f, "{:?}.{}", node, slot),
    }
  }
}

impl fmt::Debug for Var {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Var({}: {})", self, self.ty())
  }
}
