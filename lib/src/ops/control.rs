use std::sync::Arc;

use itertools::Itertools;

use super::{check_condition, input, is_single_element, OPSET};
use crate::{
  context::Context,
  error::{InferenceError, Result},
  node::Subgraph,
  op::{Attributes, OpId, Operator},
  types::{Dim, ElemKind, Shape, Type},
  var::Var,
};

/// Runs `then_branch` or `else_branch`; both take no arguments and must
/// return the same number of results.
#[derive(Debug, Clone, Copy)]
pub struct If;

impl Operator for If {
  fn id(&self) -> OpId {
    OpId::onnx("If", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    check_condition(op, input(op, inputs, 0)?.ty(), "condition")?;
    let [then_branch, else_branch] = bodies else {
      return Err(InferenceError::new(op, "expected a then and an else branch"));
    };
    let (ours, theirs) = (then_branch.result_types(), else_branch.result_types());
    if ours.len() != theirs.len() {
      return Err(InferenceError::new(
        op,
        format!("branches return {} and {} results", ours.len(), theirs.len()),
      ));
    }
    ours
      .iter()
      .zip(&theirs)
      .map(|(a, b)| a.unify(b).map_err(|e| e.at(op)))
      .collect()
  }
}

/// Generic loop. Inputs are the trip count `M`, the initial condition and the
/// initial carried values, any of the first two may be absent. The body gets
/// `(iter_num, cond_in, carried...)` and returns `(cond, carried..., scanned...)`.
#[derive(Debug, Clone, Copy)]
pub struct Loop;

impl Loop {
  fn iteration_types(carried: &[Type]) -> Vec<(String, Type)> {
    let mut arguments = vec![
      ("iter_num".to_string(), Type::tensor(ElemKind::Int64, Shape::fixed(&[1]))),
      ("cond_in".to_string(), Type::tensor(ElemKind::Bool, Shape::fixed(&[1]))),
    ];
    arguments.extend(
      carried
        .iter()
        .enumerate()
        .map(|(i, ty)| (format!("carried_{}", i), ty.clone())),
    );
    arguments
  }
}

impl Operator for Loop {
  fn id(&self) -> OpId {
    OpId::onnx("Loop", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    if let Some(Some(m)) = inputs.first() {
      match m.ty().as_tensor() {
        Some((ElemKind::Int64, shape)) if is_single_element(shape) => {}
        _ => return Err(InferenceError::new(op, format!("trip count must be a single int64, got {}", m.ty()))),
      }
    }
    if let Some(Some(cond)) = inputs.get(1) {
      check_condition(op, cond.ty(), "initial condition")?;
    }
    let initial = inputs
      .iter()
      .skip(2)
      .enumerate()
      .map(|(i, v)| {
        v.as_ref()
          .map(|v| v.ty().clone())
          .ok_or_else(|| InferenceError::new(op, format!("carried value {} is absent", i)))
      })
      .collect::<std::result::Result<Vec<_>, _>>()?;
    let [body] = bodies else {
      return Err(InferenceError::new(op, "expected exactly one body"));
    };
    let results = body.result_types();
    let Some((cond, rest)) = results.split_first() else {
      return Err(InferenceError::new(op, "body returns no condition"));
    };
    check_condition(op, cond, "body condition")?;
    if rest.len() < initial.len() {
      return Err(InferenceError::new(
        op,
        format!("body returns {} values for {} carried", rest.len(), initial.len()),
      ));
    }
    let (carried, scanned) = rest.split_at(initial.len());
    let mut outputs = initial
      .iter()
      .zip(carried)
      .map(|(a, b)| a.unify(b).map_err(|e| e.at(op)))
      .collect::<std::result::Result<Vec<_>, _>>()?;
    for ty in scanned {
      let Some((elem, shape)) = ty.as_tensor() else {
        return Err(InferenceError::new(op, format!("scanned value must be a tensor, got {}", ty)));
      };
      let stacked = match shape.dims() {
        Some(dims) => Shape::from(std::iter::once(Dim::Unknown).chain(dims.iter().cloned()).collect_vec()),
        None => Shape::unknown(),
      };
      outputs.push(Type::tensor(elem, stacked));
    }
    Ok(outputs)
  }
}

/// Conditional with no-argument branches; returns one var per branch result.
pub fn if_<T, E>(cx: &Context, cond: &Var, then_branch: T, else_branch: E) -> Result<Vec<Var>>
where
  T: FnOnce(&Context, &[Var]) -> Result<Vec<Var>>,
  E: FnOnce(&Context, &[Var]) -> Result<Vec<Var>>,
{
  let then_branch = cx.subgraph("then_branch", Vec::new(), then_branch)?;
  let else_branch = cx.subgraph("else_branch", Vec::new(), else_branch)?;
  cx.apply(
    Arc::new(If),
    vec![Some(cond.clone())],
    Attributes::new(),
    vec![then_branch, else_branch],
  )
}

/// Loop with optional trip count `m` and initial condition `cond`. Returns the
/// final carried values followed by the stacked scanned values.
pub fn loop_<F>(cx: &Context, m: Option<&Var>, cond: Option<&Var>, initial: &[Var], body: F) -> Result<Vec<Var>>
where
  F: FnOnce(&Context, &[Var]) -> Result<Vec<Var>>,
{
  let carried = initial.iter().map(|v| v.ty().clone()).collect_vec();
  let body = cx.subgraph("body", Loop::iteration_types(&carried), body)?;
  let mut inputs = vec![m.cloned(), cond.cloned()];
  inputs.extend(initial.iter().cloned().map(Some));
  cx.apply(Arc::new(Loop), inputs, Attributes::new(), vec![body])
}
