use super::{apply_one, input, is_single_element, tensor_input, OPSET};
use crate::{
  context::Context,
  error::{InferenceError, Result},
  node::Subgraph,
  op::{Attribute, AttributeExt, Attributes, OpId, Operator},
  types::{ElemKind, Shape, Type},
  var::Var,
};

fn optional_element(op: OpId, ty: &Type) -> std::result::Result<&Type, InferenceError> {
  match ty {
    Type::Optional(elem) => Ok(elem),
    _ => Err(InferenceError::new(op, format!("expected an optional, got {}", ty))),
  }
}

fn sequence_element(op: OpId, ty: &Type) -> std::result::Result<&Type, InferenceError> {
  match ty {
    Type::Sequence(elem) => Ok(elem),
    _ => Err(InferenceError::new(op, format!("expected a sequence, got {}", ty))),
  }
}

fn check_position(op: OpId, inputs: &[Option<Var>], index: usize) -> std::result::Result<(), InferenceError> {
  match inputs.get(index).and_then(Option::as_ref) {
    None => Ok(()),
    Some(var) => match var.ty().as_tensor() {
      Some((kind, shape)) if kind.is_integer() && is_single_element(shape) => Ok(()),
      _ => Err(InferenceError::new(op, format!("position must be an integer scalar, got {}", var.ty()))),
    },
  }
}

/// Wraps a value, or makes an empty optional of the `type` attribute.
#[derive(Debug, Clone, Copy)]
pub struct Optional;

impl Operator for Optional {
  fn id(&self) -> OpId {
    OpId::onnx("Optional", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    match (inputs.first().and_then(Option::as_ref), attributes.ty("type")) {
      (Some(var), None) => Ok(vec![Type::optional(var.ty().clone())]),
      (Some(var), Some(ty)) if var.ty().is_subtype_of(ty) => Ok(vec![Type::optional(ty.clone())]),
      (Some(var), Some(ty)) => Err(InferenceError::new(
        self.id(),
        format!("input {} does not fit attribute type {}", var.ty(), ty),
      )),
      (None, Some(ty)) => Ok(vec![Type::optional(ty.clone())]),
      (None, None) => Err(InferenceError::new(self.id(), "an empty optional needs the `type` attribute")),
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct OptionalHasElement;

impl Operator for OptionalHasElement {
  fn id(&self) -> OpId {
    OpId::onnx("OptionalHasElement", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    optional_element(self.id(), input(self.id(), inputs, 0)?.ty())?;
    Ok(vec![Type::scalar(ElemKind::Bool)])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct OptionalGetElement;

impl Operator for OptionalGetElement {
  fn id(&self) -> OpId {
    OpId::onnx("OptionalGetElement", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let elem = optional_element(self.id(), input(self.id(), inputs, 0)?.ty())?;
    Ok(vec![elem.clone()])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceEmpty;

impl Operator for SequenceEmpty {
  fn id(&self) -> OpId {
    OpId::onnx("SequenceEmpty", OPSET)
  }

  fn infer(
    &self,
    _inputs: &[Option<Var>],
    attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let code = attributes.int("dtype").unwrap_or(ElemKind::Float32.code());
    let elem = ElemKind::from_code(code)
      .ok_or_else(|| InferenceError::new(self.id(), format!("unsupported dtype {}", code)))?;
    Ok(vec![Type::sequence(Type::tensor(elem, Shape::unknown()))])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceInsert;

impl Operator for SequenceInsert {
  fn id(&self) -> OpId {
    OpId::onnx("SequenceInsert", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let elem = sequence_element(op, input(op, inputs, 0)?.ty())?;
    tensor_input(op, inputs, 1)?;
    check_position(op, inputs, 2)?;
    let inserted = input(op, inputs, 1)?.ty();
    let merged = elem.unify(inserted).map_err(|e| e.at(op))?;
    Ok(vec![Type::sequence(merged)])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceAt;

impl Operator for SequenceAt {
  fn id(&self) -> OpId {
    OpId::onnx("SequenceAt", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let elem = sequence_element(op, input(op, inputs, 0)?.ty())?;
    input(op, inputs, 1)?;
    check_position(op, inputs, 1)?;
    Ok(vec![elem.clone()])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceLength;

impl Operator for SequenceLength {
  fn id(&self) -> OpId {
    OpId::onnx("SequenceLength", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    sequence_element(self.id(), input(self.id(), inputs, 0)?.ty())?;
    Ok(vec![Type::scalar(ElemKind::Int64)])
  }
}

/// `Some(x)` wraps `x`; `None` makes an empty optional of type `ty`.
pub fn optional(cx: &Context, x: Option<&Var>, ty: Option<Type>) -> Result<Var> {
  let attributes = ty
    .map(|ty| Attributes::from([("type".to_string(), Attribute::Type(ty))]))
    .unwrap_or_default();
  apply_one(cx, Optional, vec![x.cloned()], attributes)
}

pub fn optional_has_element(cx: &Context, x: &Var) -> Result<Var> {
  apply_one(cx, OptionalHasElement, vec![Some(x.clone())], Attributes::new())
}

pub fn optional_get_element(cx: &Context, x: &Var) -> Result<Var> {
  apply_one(cx, OptionalGetElement, vec![Some(x.clone())], Attributes::new())
}

pub fn sequence_empty(cx: &Context, dtype: ElemKind) -> Result<Var> {
  let attributes = Attributes::from([("dtype".to_string(), Attribute::Int(dtype.code()))]);
  apply_one(cx, SequenceEmpty, Vec::new(), attributes)
}

/// Inserts `tensor` at `position`, or at the end when no position is given.
pub fn sequence_insert(cx: &Context, seq: &Var, tensor: &Var, position: Option<&Var>) -> Result<Var> {
  apply_one(
    cx,
    SequenceInsert,
    vec![Some(seq.clone()), Some(tensor.clone()), position.cloned()],
    Attributes::new(),
  )
}

pub fn sequence_at(cx: &Context, seq: &Var, position: &Var) -> Result<Var> {
  apply_one(
    cx,
    SequenceAt,
    vec![Some(seq.clone()), Some(position.clone())],
    Attributes::new(),
  )
}

pub fn sequence_length(cx: &Context, seq: &Var) -> Result<Var> {
  apply_one(cx, SequenceLength, vec![Some(seq.clone())], Attributes::new())
}
