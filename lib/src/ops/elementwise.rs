use super::{apply_one, tensor_input, OPSET};
use crate::{
  context::Context,
  error::{InferenceError, Result},
  node::Subgraph,
  op::{Attributes, OpId, Operator},
  types::{ElemKind, Type},
  var::Var,
};

/// What a binary operator accepts and what it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
  /// Numeric operands, same kind out.
  Arithmetic,
  /// Numeric operands, bool out.
  Ordering,
  /// Any non-string operands, bool out.
  Equality,
  Logical,
  Bitwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binary {
  Add,
  Sub,
  Mul,
  Div,
  Less,
  Greater,
  Equal,
  And,
  BitwiseAnd,
}

impl Binary {
  fn rule(self) -> Rule {
    match self {
      Binary::Add | Binary::Sub | Binary::Mul | Binary::Div => Rule::Arithmetic,
      Binary::Less | Binary::Greater => Rule::Ordering,
      Binary::Equal => Rule::Equality,
      Binary::And => Rule::Logical,
      Binary::BitwiseAnd => Rule::Bitwise,
    }
  }
}

impl Operator for Binary {
  fn id(&self) -> OpId {
    match self {
      Binary::Add => OpId::onnx("Add", OPSET),
      Binary::Sub => OpId::onnx("Sub", OPSET),
      Binary::Mul => OpId::onnx("Mul", OPSET),
      Binary::Div => OpId::onnx("Div", OPSET),
      Binary::Less => OpId::onnx("Less", OPSET),
      Binary::Greater => OpId::onnx("Greater", OPSET),
      Binary::Equal => OpId::onnx("Equal", OPSET),
      Binary::And => OpId::onnx("And", OPSET),
      Binary::BitwiseAnd => OpId::onnx("BitwiseAnd", 18),
    }
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let (a, sa) = tensor_input(op, inputs, 0)?;
    let (b, sb) = tensor_input(op, inputs, 1)?;
    if a != b {
      return Err(InferenceError::new(op, format!("operand kinds differ: {} and {}", a, b)));
    }
    let accepted = match self.rule() {
      Rule::Arithmetic | Rule::Ordering => a.is_numeric(),
      Rule::Equality => a != ElemKind::String,
      Rule::Logical => a == ElemKind::Bool,
      Rule::Bitwise => a.is_integer(),
    };
    if !accepted {
      return Err(InferenceError::new(op, format!("{} operands are not supported", a)));
    }
    let shape = sa.broadcast(sb).map_err(|reason| InferenceError::new(op, reason))?;
    let elem = match self.rule() {
      Rule::Arithmetic | Rule::Bitwise => a,
      Rule::Ordering | Rule::Equality | Rule::Logical => ElemKind::Bool,
    };
    Ok(vec![Type::tensor(elem, shape)])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Not;

impl Operator for Not {
  fn id(&self) -> OpId {
    OpId::onnx("Not", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    match tensor_input(self.id(), inputs, 0)? {
      (ElemKind::Bool, shape) => Ok(vec![Type::tensor(ElemKind::Bool, shape.clone())]),
      (other, _) => Err(InferenceError::new(self.id(), format!("expected bool, got {}", other))),
    }
  }
}

fn binary(cx: &Context, op: Binary, a: &Var, b: &Var) -> Result<Var> {
  apply_one(cx, op, vec![Some(a.clone()), Some(b.clone())], Attributes::new())
}

pub fn add(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::Add, a, b)
}

pub fn sub(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::Sub, a, b)
}

pub fn mul(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::Mul, a, b)
}

pub fn div(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::Div, a, b)
}

pub fn less(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::Less, a, b)
}

pub fn greater(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::Greater, a, b)
}

pub fn equal(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::Equal, a, b)
}

pub fn and(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::And, a, b)
}

pub fn bitwise_and(cx: &Context, a: &Var, b: &Var) -> Result<Var> {
  binary(cx, Binary::BitwiseAnd, a, b)
}

pub fn not(cx: &Context, x: &Var) -> Result<Var> {
  apply_one(cx, Not, vec![Some(x.clone())], Attributes::new())
}
