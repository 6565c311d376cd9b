//! Standard operators. Every constructor takes the construction context first
//! and returns the output vars of the node it creates.

mod containers;
mod control;
mod elementwise;
pub mod ml;
mod tensor;

use std::sync::Arc;

pub use containers::{
  optional, optional_get_element, optional_has_element, sequence_at, sequence_empty, sequence_insert,
  sequence_length,
};
pub use control::{if_, loop_};
pub use elementwise::{add, and, bitwise_and, div, equal, greater, less, mul, not, sub};
pub(crate) use tensor::constant_value;
pub use tensor::{cast, constant, constant_attribute, identity, reshape, squeeze};

use crate::{
  context::Context,
  error::{InferenceError, Result},
  op::{Attributes, OpId, Operator},
  types::{ElemKind, Shape, Type},
  value::{TensorValue, Value},
  var::Var,
};

/// `ai.onnx` opset the catalog is written against.
pub const OPSET: u32 = 17;

/// Creates a node with a single output and no bodies.
fn apply_one(cx: &Context, op: impl Operator + 'static, inputs: Vec<Option<Var>>, attributes: Attributes) -> Result<Var> {
  let op: Arc<dyn Operator> = Arc::new(op);
  let id = op.id();
  cx.apply(op, inputs, attributes, Vec::new())?
    .into_iter()
    .next()
    .ok_or_else(|| InferenceError::new(id, "operator declared no outputs").into())
}

fn input(op: OpId, inputs: &[Option<Var>], index: usize) -> std::result::Result<&Var, InferenceError> {
  inputs
    .get(index)
    .and_then(Option::as_ref)
    .ok_or_else(|| InferenceError::new(op, format!("missing required input {}", index)))
}

fn tensor_input(op: OpId, inputs: &[Option<Var>], index: usize) -> std::result::Result<(ElemKind, &Shape), InferenceError> {
  let var = input(op, inputs, index)?;
  var
    .ty()
    .as_tensor()
    .ok_or_else(|| InferenceError::new(op, format!("input {} must be a tensor, got {}", index, var.ty())))
}

/// The propagated tensor behind an input, if any.
fn known_tensor(inputs: &[Option<Var>], index: usize) -> Option<&TensorValue> {
  inputs.get(index)?.as_ref()?.value().and_then(Value::as_tensor)
}

/// A tensor type that holds exactly one element, as conditions and counters do.
fn is_single_element(shape: &Shape) -> bool {
  match shape.concrete() {
    Some(dims) => dims.iter().product::<usize>() == 1,
    None => shape.rank().map_or(true, |r| r <= 1),
  }
}

fn check_condition(op: OpId, ty: &Type, what: &str) -> std::result::Result<(), InferenceError> {
  match ty.as_tensor() {
    Some((ElemKind::Bool, shape)) if is_single_element(shape) => Ok(()),
    _ => Err(InferenceError::new(
      op,
      format!("{} must be a single-element bool tensor, got {}", what, ty),
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    error::Error,
    op::Attribute,
    types::{Dim, ElemKind, Shape, Type},
  };

  fn tensor(elem: ElemKind, dims: Vec<Dim>) -> Type {
    Type::tensor(elem, Shape::from(dims))
  }

  #[test]
  fn test_imputer_inference() -> Result<()> {
    let cx = Context::new();
    let x = cx.argument("x", tensor(ElemKind::Int64, vec![Dim::Unknown, Dim::Fixed(5), "N".into()]));
    let y = ml::imputer_ints(&cx, &x, vec![999], Some(-1))?;
    assert_eq!(y.ty(), x.ty());
    Ok(())
  }

  #[test]
  fn test_imputer_inference_with_n_feature() -> Result<()> {
    let cx = Context::new();
    let ty = tensor(ElemKind::Int64, vec![Dim::Unknown, Dim::Fixed(5), "N".into(), Dim::Fixed(3)]);
    let x = cx.argument("x", ty.clone());
    let y = ml::imputer_ints(&cx, &x, vec![999, 9999, 99999], Some(-1))?;
    assert_eq!(y.ty(), &ty);
    Ok(())
  }

  #[test]
  fn test_imputer_inference_with_n_feature_mismatch() {
    let cx = Context::new();
    let x = cx.argument(
      "x",
      tensor(ElemKind::Int64, vec![Dim::Unknown, Dim::Fixed(5), "N".into(), Dim::Fixed(4)]),
    );
    let y = ml::imputer_ints(&cx, &x, vec![999, 9999, 99999], Some(-1));
    assert!(matches!(y, Err(Error::Inference(_))));
  }

  #[test]
  fn test_imputer_rejects_mismatched_kind() {
    let cx = Context::new();
    let x = cx.argument("x", Type::tensor(ElemKind::Float32, Shape::of_rank(2)));
    assert!(ml::imputer_ints(&cx, &x, vec![1], None).is_err());
    assert!(ml::imputer_floats(&cx, &x, vec![1.0], None).is_ok());
  }

  #[test]
  fn test_normalizer_inference() -> Result<()> {
    let cx = Context::new();
    let ty = tensor(ElemKind::Float64, vec!["N".into(), Dim::Fixed(5)]);
    let x = cx.argument("x", ty.clone());
    let y = ml::normalizer(&cx, &x, "MAX")?;
    assert_eq!(y.ty(), &ty);
    assert!(ml::normalizer(&cx, &x, "L3").is_err());
    Ok(())
  }

  #[test]
  fn test_label_encoder_inference() -> Result<()> {
    let cx = Context::new();
    let keys = constant_attribute(&cx, "value_ints", Attribute::Ints(vec![1, 2, 3]))?;
    assert_eq!(keys.ty(), &tensor(ElemKind::Int64, vec![Dim::Fixed(3)]));
    let labels = ml::label_encoder(
      &cx,
      &keys,
      ml::Labels::Ints(vec![0, 1, 2]),
      ml::Labels::Strings(vec!["a".into(), "b".into(), "c".into()]),
      Some(Attribute::String("?".into())),
    )?;
    assert_eq!(labels.ty(), &tensor(ElemKind::String, vec![Dim::Fixed(3)]));

    let floats = cx.argument("f", tensor(ElemKind::Float32, vec!["N".into()]));
    let ids = ml::label_encoder(&cx, &floats, ml::Labels::Floats(vec![0.5]), ml::Labels::Ints(vec![7]), None)?;
    assert_eq!(ids.ty(), &tensor(ElemKind::Int64, vec!["N".into()]));

    let mismatched = ml::label_encoder(&cx, &keys, ml::Labels::Strings(vec!["a".into()]), ml::Labels::Ints(vec![1]), None);
    assert!(matches!(mismatched, Err(Error::Inference(_))));
    let uneven = ml::label_encoder(&cx, &keys, ml::Labels::Ints(vec![1, 2]), ml::Labels::Ints(vec![1]), None);
    assert!(matches!(uneven, Err(Error::Inference(_))));
    Ok(())
  }

  #[test]
  fn test_constant_attribute_forms() -> Result<()> {
    let cx = Context::new();
    let two = constant_attribute(&cx, "value_int", Attribute::Int(2))?;
    assert_eq!(two.ty(), &Type::scalar(ElemKind::Int64));
    let sum = add(&cx, &two, &two)?;
    assert_eq!(sum.ty(), &Type::scalar(ElemKind::Int64));
    let half = constant_attribute(&cx, "value_float", Attribute::Float(0.5))?;
    assert_eq!(half.ty(), &Type::scalar(ElemKind::Float32));
    let names = constant_attribute(&cx, "value_strings", Attribute::Strings(vec!["a".into()]))?;
    assert_eq!(names.ty(), &tensor(ElemKind::String, vec![Dim::Fixed(1)]));
    assert!(constant_attribute(&cx, "value_int", Attribute::Float(1.0)).is_err());
    assert!(constant_attribute(&cx, "values", Attribute::Int(1)).is_err());
    Ok(())
  }

  #[test]
  fn test_elementwise_broadcasts() -> Result<()> {
    let cx = Context::new();
    let a = cx.argument("a", tensor(ElemKind::Float32, vec!["N".into(), Dim::Fixed(1)]));
    let b = cx.argument("b", Type::tensor(ElemKind::Float32, Shape::fixed(&[3])));
    let c = add(&cx, &a, &b)?;
    assert_eq!(c.ty(), &tensor(ElemKind::Float32, vec!["N".into(), Dim::Fixed(3)]));
    let d = less(&cx, &a, &b)?;
    assert_eq!(d.ty(), &tensor(ElemKind::Bool, vec!["N".into(), Dim::Fixed(3)]));
    Ok(())
  }

  #[test]
  fn test_elementwise_rejects_bad_operands() {
    let cx = Context::new();
    let f = cx.argument("f", Type::scalar(ElemKind::Float32));
    let i = cx.argument("i", Type::scalar(ElemKind::Int64));
    let s = cx.argument("s", Type::scalar(ElemKind::String));
    assert!(matches!(add(&cx, &f, &i), Err(Error::Inference(_))));
    assert!(add(&cx, &s, &s).is_err());
    assert!(and(&cx, &f, &f).is_err());
    assert!(bitwise_and(&cx, &f, &f).is_err());
    assert!(bitwise_and(&cx, &i, &i).is_ok());
    let wide = cx.argument("w", Type::tensor(ElemKind::Float32, Shape::fixed(&[2])));
    let wider = cx.argument("v", Type::tensor(ElemKind::Float32, Shape::fixed(&[3])));
    assert!(mul(&cx, &wide, &wider).is_err());
  }

  #[test]
  fn test_reshape_uses_known_target() -> Result<()> {
    let cx = Context::new();
    let x = cx.argument("x", Type::tensor(ElemKind::Int64, Shape::fixed(&[2, 6])));
    let target = constant(&cx, vec![3i64, -1])?;
    assert_eq!(reshape(&cx, &x, &target)?.ty(), &Type::tensor(ElemKind::Int64, Shape::fixed(&[3, 4])));
    let copy = constant(&cx, vec![0i64, 3, 2])?;
    assert_eq!(reshape(&cx, &x, &copy)?.ty(), &Type::tensor(ElemKind::Int64, Shape::fixed(&[2, 3, 2])));

    let unknown = cx.argument("shape", Type::tensor(ElemKind::Int64, Shape::fixed(&[2])));
    assert_eq!(reshape(&cx, &x, &unknown)?.ty(), &Type::tensor(ElemKind::Int64, Shape::of_rank(2)));
    let bad = constant(&cx, vec![5i64, -1])?;
    assert!(reshape(&cx, &x, &bad).is_err());
    Ok(())
  }

  #[test]
  fn test_squeeze() -> Result<()> {
    let cx = Context::new();
    let x = cx.argument("x", tensor(ElemKind::Float32, vec![Dim::Unknown, Dim::Fixed(1)]));
    let last = constant(&cx, vec![-1i64])?;
    assert_eq!(squeeze(&cx, &x, Some(&last))?.ty(), &tensor(ElemKind::Float32, vec![Dim::Unknown]));
    let first = constant(&cx, vec![0i64])?;
    let y = cx.argument("y", Type::tensor(ElemKind::Float32, Shape::fixed(&[2, 1])));
    assert!(squeeze(&cx, &y, Some(&first)).is_err());
    assert_eq!(squeeze(&cx, &y, None)?.ty(), &Type::tensor(ElemKind::Float32, Shape::fixed(&[2])));
    Ok(())
  }

  #[test]
  fn test_cast_keeps_shape() -> Result<()> {
    let cx = Context::new();
    let x = cx.argument("x", tensor(ElemKind::Int64, vec!["N".into()]));
    let y = cast(&cx, &x, ElemKind::Float32)?;
    assert_eq!(y.ty(), &tensor(ElemKind::Float32, vec!["N".into()]));
    Ok(())
  }

  #[test]
  fn test_if_unifies_branches() -> Result<()> {
    let cx = Context::new();
    let b = cx.argument("b", Type::scalar(ElemKind::Bool));
    let x = cx.argument("x", Type::tensor(ElemKind::Float32, Shape::fixed(&[2, 3])));
    let y = cx.argument("y", tensor(ElemKind::Float32, vec!["N".into(), Dim::Fixed(3)]));
    let out = if_(&cx, &b, |_, _| Ok(vec![x.clone()]), |_, _| Ok(vec![y.clone()]))?;
    assert_eq!(out[0].ty(), y.ty());

    let z = cx.argument("z", Type::scalar(ElemKind::Int64));
    assert!(if_(&cx, &b, |_, _| Ok(vec![x.clone()]), |_, _| Ok(vec![z.clone()])).is_err());
    assert!(if_(&cx, &b, |_, _| Ok(vec![x.clone()]), |_, _| Ok(vec![])).is_err());
    assert!(if_(&cx, &x, |_, _| Ok(vec![]), |_, _| Ok(vec![])).is_err());
    Ok(())
  }

  #[test]
  fn test_loop_types() -> Result<()> {
    let cx = Context::new();
    let e = cx.argument("e", Type::scalar(ElemKind::Int64));
    let zero = constant(&cx, vec![0.0f32])?;
    let outs = loop_(&cx, None, None, &[zero], |cx, args| {
      assert_eq!(args.len(), 3);
      assert_eq!(args[0].ty(), &Type::tensor(ElemKind::Int64, Shape::fixed(&[1])));
      let cond = less(cx, &args[0], &e)?;
      let step = cast(cx, &args[0], ElemKind::Float32)?;
      Ok(vec![cond, add(cx, &args[2], &step)?, args[0].clone()])
    })?;
    assert_eq!(outs.len(), 2);
    assert_eq!(outs[0].ty(), &Type::tensor(ElemKind::Float32, Shape::fixed(&[1])));
    assert_eq!(outs[1].ty(), &tensor(ElemKind::Int64, vec![Dim::Unknown, Dim::Fixed(1)]));
    Ok(())
  }

  #[test]
  fn test_loop_rejects_bad_condition() -> Result<()> {
    let cx = Context::new();
    let zero = constant(&cx, 0i64)?;
    let outs = loop_(&cx, None, None, &[zero], |_, args| Ok(vec![args[2].clone(), args[2].clone()]));
    assert!(matches!(outs, Err(Error::Inference(_))));
    Ok(())
  }

  #[test]
  fn test_containers() -> Result<()> {
    let cx = Context::new();
    let x = cx.argument("x", Type::tensor(ElemKind::Int64, Shape::fixed(&[2])));
    let opt = optional(&cx, Some(&x), None)?;
    assert_eq!(opt.ty(), &Type::optional(x.ty().clone()));
    assert_eq!(optional_get_element(&cx, &opt)?.ty(), x.ty());
    assert_eq!(optional_has_element(&cx, &opt)?.ty(), &Type::scalar(ElemKind::Bool));
    assert!(optional(&cx, None, None).is_err());
    assert!(optional_get_element(&cx, &x).is_err());

    let seq = sequence_empty(&cx, ElemKind::Int64)?;
    let seq = sequence_insert(&cx, &seq, &x, None)?;
    assert_eq!(seq.ty(), &Type::sequence(Type::tensor(ElemKind::Int64, Shape::unknown())));
    let at = constant(&cx, 0i64)?;
    assert_eq!(sequence_at(&cx, &seq, &at)?.ty(), &Type::tensor(ElemKind::Int64, Shape::unknown()));
    assert_eq!(sequence_length(&cx, &seq)?.ty(), &Type::scalar(ElemKind::Int64));
    let float = cx.argument("f", Type::scalar(ElemKind::Float32));
    assert!(sequence_insert(&cx, &seq, &float, None).is_err());
    Ok(())
  }

  #[test]
  fn test_failed_inference_creates_no_node() -> Result<()> {
    let cx = Context::new();
    let a = cx.argument("a", Type::scalar(ElemKind::Float32));
    let b = cx.argument("b", Type::scalar(ElemKind::Int32));
    assert!(add(&cx, &a, &b).is_err());
    let c = add(&cx, &a, &a)?;
    let model = crate::graph::Graph::new([("c", c)])?.emit(crate::model::ValidationLevel::Types)?;
    assert_eq!(model.graph.nodes.len(), 1);
    Ok(())
  }
}
