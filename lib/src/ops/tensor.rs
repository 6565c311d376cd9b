use itertools::Itertools;

use super::{apply_one, input, known_tensor, tensor_input, OPSET};
use crate::{
  context::Context,
  error::{InferenceError, Result},
  node::Subgraph,
  op::{Attribute, AttributeExt, Attributes, OpId, Operator},
  types::{Dim, ElemKind, Shape, Type},
  value::{TensorValue, Value},
  var::Var,
};

/// Holds one tensor, given either as `value` or as one of the scalar and list
/// forms (`value_int`, `value_floats`, ...).
#[derive(Debug, Clone, Copy)]
pub struct Constant;

/// The tensor behind the single `value*` attribute of a `Constant`.
pub(crate) fn constant_value(attributes: &Attributes) -> std::result::Result<TensorValue, String> {
  let mut given = attributes
    .iter()
    .filter(|(name, _)| name.as_str() == "value" || name.starts_with("value_"));
  let (Some((name, attribute)), None) = (given.next(), given.next()) else {
    return Err("expected exactly one `value` attribute".to_string());
  };
  Ok(match (name.as_str(), attribute) {
    ("value", Attribute::Tensor(t)) => t.clone(),
    ("value_int", Attribute::Int(x)) => TensorValue::from(*x),
    ("value_ints", Attribute::Ints(xs)) => TensorValue::from(xs.clone()),
    ("value_float", Attribute::Float(x)) => TensorValue::from(*x as f32),
    ("value_floats", Attribute::Floats(xs)) => TensorValue::from(xs.iter().map(|x| *x as f32).collect_vec()),
    ("value_string", Attribute::String(s)) => TensorValue::from(s.clone()),
    ("value_strings", Attribute::Strings(xs)) => TensorValue::from(xs.clone()),
    (name, _) => return Err(format!("attribute `{}` has the wrong kind", name)),
  })
}

impl Operator for Constant {
  fn id(&self) -> OpId {
    OpId::onnx("Constant", OPSET)
  }

  fn infer(
    &self,
    _inputs: &[Option<Var>],
    attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let value = constant_value(attributes).map_err(|reason| InferenceError::new(self.id(), reason))?;
    Ok(vec![value.ty()])
  }

  fn propagate(&self, _inputs: &[Option<Var>], attributes: &Attributes) -> Option<Vec<Value>> {
    constant_value(attributes).ok().map(|t| vec![Value::Tensor(t)])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Identity;

impl Operator for Identity {
  fn id(&self) -> OpId {
    OpId::onnx("Identity", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    Ok(vec![input(self.id(), inputs, 0)?.ty().clone()])
  }

  fn propagate(&self, inputs: &[Option<Var>], _attributes: &Attributes) -> Option<Vec<Value>> {
    let value = inputs.first()?.as_ref()?.value()?;
    Some(vec![value.clone()])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Cast;

impl Operator for Cast {
  fn id(&self) -> OpId {
    OpId::onnx("Cast", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let (_, shape) = tensor_input(self.id(), inputs, 0)?;
    let to = attributes
      .int("to")
      .and_then(ElemKind::from_code)
      .ok_or_else(|| InferenceError::new(self.id(), "attribute `to` is not a supported element kind"))?;
    Ok(vec![Type::tensor(to, shape.clone())])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Reshape;

impl Reshape {
  /// Output dims for a known target. Zeros copy the input dim, a single -1 is
  /// solved when the input is concrete.
  fn target(&self, input: &Shape, target: &[i64]) -> std::result::Result<Shape, InferenceError> {
    let op = self.id();
    if target.iter().filter(|d| **d == -1).count() > 1 {
      return Err(InferenceError::new(op, "at most one target dim may be -1"));
    }
    let mut dims = Vec::with_capacity(target.len());
    for (i, d) in target.iter().enumerate() {
      dims.push(match *d {
        -1 => Dim::Unknown,
        0 => match input.dims() {
          Some(in_dims) => in_dims
            .get(i)
            .cloned()
            .ok_or_else(|| InferenceError::new(op, format!("target dim {} copies a dim the input lacks", i)))?,
          None => Dim::Unknown,
        },
        n if n > 0 => Dim::Fixed(n as u64),
        n => return Err(InferenceError::new(op, format!("invalid target dim {}", n))),
      });
    }
    let Some(total) = input.concrete().map(|d| d.iter().product::<usize>()) else {
      return Ok(Shape::from(dims));
    };
    let known: usize = dims.iter().filter_map(Dim::fixed).map(|n| n as usize).product();
    let free = dims.iter().position(|d| *d == Dim::Unknown);
    match free {
      Some(free) if dims.iter().filter(|d| d.fixed().is_none()).count() == 1 => {
        if known == 0 || total % known != 0 {
          return Err(InferenceError::new(
            op,
            format!("cannot reshape {} elements into {}", total, Shape::from(dims.clone())),
          ));
        }
        dims[free] = Dim::Fixed((total / known) as u64);
      }
      Some(_) => {}
      None if dims.iter().all(|d| d.fixed().is_some()) && known != total => {
        return Err(InferenceError::new(
          op,
          format!("cannot reshape {} elements into {}", total, Shape::from(dims)),
        ));
      }
      None => {}
    }
    Ok(Shape::from(dims))
  }
}

impl Operator for Reshape {
  fn id(&self) -> OpId {
    OpId::onnx("Reshape", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let (elem, shape) = tensor_input(op, inputs, 0)?;
    let (target_kind, target_shape) = tensor_input(op, inputs, 1)?;
    if target_kind != ElemKind::Int64 || target_shape.rank().map_or(false, |r| r != 1) {
      return Err(InferenceError::new(op, "target shape must be a 1-D int64 tensor"));
    }
    let out = match known_tensor(inputs, 1).and_then(|t| t.data.to_i64s()) {
      Some(target) => self.target(shape, &target)?,
      None => match target_shape.dims().and_then(|d| d.first()).and_then(Dim::fixed) {
        Some(rank) => Shape::of_rank(rank as usize),
        None => Shape::unknown(),
      },
    };
    Ok(vec![Type::tensor(elem, out)])
  }
}

#[derive(Debug, Clone, Copy)]
pub struct Squeeze;

impl Operator for Squeeze {
  fn id(&self) -> OpId {
    OpId::onnx("Squeeze", OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    _attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let (elem, shape) = tensor_input(op, inputs, 0)?;
    let Some(dims) = shape.dims() else {
      return Ok(vec![Type::tensor(elem, Shape::unknown())]);
    };
    let axes_given = inputs.get(1).map_or(false, Option::is_some);
    let out = match (axes_given, known_tensor(inputs, 1).and_then(|t| t.data.to_i64s())) {
      (false, _) => {
        if dims.iter().all(|d| d.fixed().is_some()) {
          Shape::from(dims.iter().filter(|d| **d != Dim::Fixed(1)).cloned().collect_vec())
        } else {
          Shape::unknown()
        }
      }
      (true, None) => Shape::unknown(),
      (true, Some(axes)) => {
        let rank = dims.len() as i64;
        let mut removed = Vec::with_capacity(axes.len());
        for axis in axes {
          if axis < -rank || axis >= rank {
            return Err(InferenceError::new(op, format!("axis {} out of range for rank {}", axis, rank)));
          }
          let axis = axis.rem_euclid(rank) as usize;
          if matches!(dims[axis], Dim::Fixed(n) if n != 1) {
            return Err(InferenceError::new(op, format!("dim {} of {} is not 1", axis, shape)));
          }
          removed.push(axis);
        }
        Shape::from(
          dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, d)| d.clone())
            .collect_vec(),
        )
      }
    };
    Ok(vec![Type::tensor(elem, out)])
  }
}

pub fn constant(cx: &Context, value: impl Into<TensorValue>) -> Result<Var> {
  let attributes = Attributes::from([("value".to_string(), Attribute::Tensor(value.into()))]);
  apply_one(cx, Constant, Vec::new(), attributes)
}

/// `Constant` from the attribute forms: `value_int(s)`, `value_float(s)` or
/// `value_string(s)`.
pub fn constant_attribute(cx: &Context, name: &str, value: Attribute) -> Result<Var> {
  let attributes = Attributes::from([(name.to_string(), value)]);
  apply_one(cx, Constant, Vec::new(), attributes)
}

pub fn identity(cx: &Context, x: &Var) -> Result<Var> {
  apply_one(cx, Identity, vec![Some(x.clone())], Attributes::new())
}

pub fn cast(cx: &Context, x: &Var, to: ElemKind) -> Result<Var> {
  let attributes = Attributes::from([("to".to_string(), Attribute::Int(to.code()))]);
  apply_one(cx, Cast, vec![Some(x.clone())], attributes)
}

pub fn reshape(cx: &Context, x: &Var, shape: &Var) -> Result<Var> {
  apply_one(cx, Reshape, vec![Some(x.clone()), Some(shape.clone())], Attributes::new())
}

/// Drops the given axes, or every size-1 dim when `axes` is `None`.
pub fn squeeze(cx: &Context, x: &Var, axes: Option<&Var>) -> Result<Var> {
  apply_one(cx, Squeeze, vec![Some(x.clone()), axes.cloned()], Attributes::new())
}
