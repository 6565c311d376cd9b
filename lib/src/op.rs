use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
  error::InferenceError,
  node::Subgraph,
  types::Type,
  value::{TensorValue, Value},
  var::Var,
};

pub const ONNX_DOMAIN: &str = "";
pub const ML_DOMAIN: &str = "ai.onnx.ml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OpId {
  pub domain: &'static str,
  pub name: &'static str,
  /// Opset version of `domain` the operator is taken from.
  pub version: u32,
}

impl OpId {
  pub const fn onnx(name: &'static str, version: u32) -> Self {
    OpId {
      domain: ONNX_DOMAIN,
      name,
      version,
    }
  }

  pub const fn ml(name: &'static str, version: u32) -> Self {
    OpId {
      domain: ML_DOMAIN,
      name,
      version,
    }
  }
}

impl fmt::Display for OpId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let domain = if self.domain.is_empty() { "ai.onnx" } else { self.domain };
    write!(f, "{}::{}-{}", domain, self.name, self.version)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
  Int(i64),
  Float(f64),
  String(String),
  Ints(Vec<i64>),
  Floats(Vec<f64>),
  Strings(Vec<String>),
  Tensor(TensorValue),
  Type(Type),
}

pub type Attributes = BTreeMap<String, Attribute>;

/// Typed lookups used by inference rules and kernels.
pub trait AttributeExt {
  fn int(&self, name: &str) -> Option<i64>;
  fn float(&self, name: &str) -> Option<f64>;
  fn string(&self, name: &str) -> Option<&str>;
  fn ints(&self, name: &str) -> Option<&[i64]>;
  fn floats(&self, name: &str) -> Option<&[f64]>;
  fn strings(&self, name: &str) -> Option<&[String]>;
  fn tensor(&self, name: &str) -> Option<&TensorValue>;
  fn ty(&self, name: &str) -> Option<&Type>;
}

impl AttributeExt for Attributes {
  fn int(&self, name: &str) -> Option<i64> {
    match self.get(name) {
      Some(Attribute::Int(i)) => Some(*i),
      _ => None,
    }
  }

  fn float(&self, name: &str) -> Option<f64> {
    match self.get(name) {
      Some(Attribute::Float(x)) => Some(*x),
      _ => None,
    }
  }

  fn string(&self, name: &str) -> Option<&str> {
    match self.get(name) {
      Some(Attribute::String(s)) => Some(s),
      _ => None,
    }
  }

  fn ints(&self, name: &str) -> Option<&[i64]> {
    match self.get(name) {
      Some(Attribute::Ints(v)) => Some(v),
      _ => None,
    }
  }

  fn floats(&self, name: &str) -> Option<&[f64]> {
    match self.get(name) {
      Some(Attribute::Floats(v)) => Some(v),
      _ => None,
    }
  }

  fn strings(&self, name: &str) -> Option<&[String]> {
    match self.get(name) {
      Some(Attribute::Strings(v)) => Some(v),
      _ => None,
    }
  }

  fn tensor(&self, name: &str) -> Option<&TensorValue> {
    match self.get(name) {
      Some(Attribute::Tensor(t)) => Some(t),
      _ => None,
    }
  }

  fn ty(&self, name: &str) -> Option<&Type> {
    match self.get(name) {
      Some(Attribute::Type(t)) => Some(t),
      _ => None,
    }
  }
}

/// A catalog entry. The core never looks inside an operator beyond this trait.
pub trait Operator: fmt::Debug + Send + Sync {
  fn id(&self) -> OpId;

  /// Output types from input types (and known input values). Called once per node.
  fn infer(
    &self,
    inputs: &[Option<Var>],
    attributes: &Attributes,
    bodies: &[Subgraph],
  ) -> Result<Vec<Type>, InferenceError>;

  /// In-process folding. `None` hands the node to the evaluator, if any.
  fn propagate(&self, _inputs: &[Option<Var>], _attributes: &Attributes) -> Option<Vec<Value>> {
    None
  }

  /// Whether the evaluator may be asked for this node's values.
  fn foldable(&self) -> bool {
    true
  }
}
