//! The `ai.onnx.ml` subset.

use super::{apply_one, tensor_input};
use crate::{
  context::Context,
  error::{InferenceError, Result},
  node::Subgraph,
  op::{Attribute, AttributeExt, Attributes, OpId, Operator},
  types::{Dim, ElemKind, Type},
  var::Var,
};

pub const ML_OPSET: u32 = 3;

/// Replaces every occurrence of the replaced value with the imputed value of
/// its feature (the last axis), or with the single imputed value.
#[derive(Debug, Clone, Copy)]
pub struct Imputer;

impl Operator for Imputer {
  fn id(&self) -> OpId {
    OpId::ml("Imputer", ML_OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let (elem, shape) = tensor_input(op, inputs, 0)?;
    let imputed = match (attributes.floats("imputed_value_floats"), attributes.ints("imputed_value_int64s")) {
      (Some(values), None) if matches!(elem, ElemKind::Float32 | ElemKind::Float64) => values.len(),
      (None, Some(values)) if elem.is_integer() => values.len(),
      (None, None) => return Err(InferenceError::new(op, "no imputed values given")),
      (Some(_), Some(_)) => return Err(InferenceError::new(op, "both float and int64 imputed values given")),
      _ => return Err(InferenceError::new(op, format!("imputed values do not match input kind {}", elem))),
    };
    if imputed == 0 {
      return Err(InferenceError::new(op, "imputed values are empty"));
    }
    if imputed > 1 {
      match shape.dims().and_then(<[Dim]>::last) {
        Some(Dim::Fixed(features)) if *features != imputed as u64 => {
          return Err(InferenceError::new(
            op,
            format!("{} imputed values for {} features", imputed, features),
          ))
        }
        _ => {}
      }
    }
    Ok(vec![Type::tensor(elem, shape.clone())])
  }
}

/// Row-wise `MAX`, `L1` or `L2` normalization.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer;

impl Operator for Normalizer {
  fn id(&self) -> OpId {
    OpId::ml("Normalizer", ML_OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let (elem, shape) = tensor_input(op, inputs, 0)?;
    match attributes.string("norm") {
      Some("MAX" | "L1" | "L2") => {}
      other => return Err(InferenceError::new(op, format!("unknown norm {:?}", other))),
    }
    if !elem.is_numeric() {
      return Err(InferenceError::new(op, format!("cannot normalize {}", elem)));
    }
    if shape.rank().map_or(false, |r| r > 2) {
      return Err(InferenceError::new(op, format!("expected at most 2 dims, got {}", shape)));
    }
    Ok(vec![Type::tensor(elem, shape.clone())])
  }
}

/// Maps keys to values elementwise. Keys come as `keys_int64s`, `keys_floats`
/// or `keys_strings` and must match the input kind; the `values_*` list picks
/// the output kind.
#[derive(Debug, Clone, Copy)]
pub struct LabelEncoder;

impl Operator for LabelEncoder {
  fn id(&self) -> OpId {
    OpId::ml("LabelEncoder", ML_OPSET)
  }

  fn infer(
    &self,
    inputs: &[Option<Var>],
    attributes: &Attributes,
    _bodies: &[Subgraph],
  ) -> std::result::Result<Vec<Type>, InferenceError> {
    let op = self.id();
    let (elem, shape) = tensor_input(op, inputs, 0)?;
    let keys = match (
      attributes.ints("keys_int64s"),
      attributes.floats("keys_floats"),
      attributes.strings("keys_strings"),
    ) {
      (Some(keys), None, None) if elem == ElemKind::Int64 => keys.len(),
      (None, Some(keys), None) if elem == ElemKind::Float32 => keys.len(),
      (None, None, Some(keys)) if elem == ElemKind::String => keys.len(),
      (None, None, None) => return Err(InferenceError::new(op, "no keys given")),
      _ => return Err(InferenceError::new(op, format!("keys do not match input kind {}", elem))),
    };
    let (values, out) = match (
      attributes.ints("values_int64s"),
      attributes.floats("values_floats"),
      attributes.strings("values_strings"),
    ) {
      (Some(values), None, None) => (values.len(), ElemKind::Int64),
      (None, Some(values), None) => (values.len(), ElemKind::Float32),
      (None, None, Some(values)) => (values.len(), ElemKind::String),
      _ => return Err(InferenceError::new(op, "expected exactly one list of values")),
    };
    if keys != values {
      return Err(InferenceError::new(op, format!("{} keys for {} values", keys, values)));
    }
    Ok(vec![Type::tensor(out, shape.clone())])
  }
}

/// Keys and values of a `LabelEncoder`, one list each.
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
  Ints(Vec<i64>),
  Floats(Vec<f64>),
  Strings(Vec<String>),
}

impl Labels {
  fn attribute(self, prefix: &str) -> (String, Attribute) {
    match self {
      Labels::Ints(v) => (format!("{}_int64s", prefix), Attribute::Ints(v)),
      Labels::Floats(v) => (format!("{}_floats", prefix), Attribute::Floats(v)),
      Labels::Strings(v) => (format!("{}_strings", prefix), Attribute::Strings(v)),
    }
  }
}

/// `default` must be of the same kind as `values`; unmatched elements fall back
/// to -1, -0.0 or `"_Unused"` without it.
pub fn label_encoder(cx: &Context, x: &Var, keys: Labels, values: Labels, default: Option<Attribute>) -> Result<Var> {
  let default_name = match &values {
    Labels::Ints(_) => "default_int64",
    Labels::Floats(_) => "default_float",
    Labels::Strings(_) => "default_string",
  };
  let mut attributes = Attributes::from([keys.attribute("keys"), values.attribute("values")]);
  if let Some(default) = default {
    attributes.insert(default_name.to_string(), default);
  }
  apply_one(cx, LabelEncoder, vec![Some(x.clone())], attributes)
}

/// Float imputation: `replaced` defaults to 0.0.
pub fn imputer_floats(cx: &Context, x: &Var, imputed: Vec<f64>, replaced: Option<f64>) -> Result<Var> {
  let mut attributes = Attributes::from([("imputed_value_floats".to_string(), Attribute::Floats(imputed))]);
  if let Some(replaced) = replaced {
    attributes.insert("replaced_value_float".to_string(), Attribute::Float(replaced));
  }
  apply_one(cx, Imputer, vec![Some(x.clone())], attributes)
}

/// Integer imputation: `replaced` defaults to 0.
pub fn imputer_ints(cx: &Context, x: &Var, imputed: Vec<i64>, replaced: Option<i64>) -> Result<Var> {
  let mut attributes = Attributes::from([("imputed_value_int64s".to_string(), Attribute::Ints(imputed))]);
  if let Some(replaced) = replaced {
    attributes.insert("replaced_value_int64".to_string(), Attribute::Int(replaced));
  }
  apply_one(cx, Imputer, vec![Some(x.clone())], attributes)
}

pub fn normalizer(cx: &Context, x: &Var, norm: &str) -> Result<Var> {
  let attributes = Attributes::from([("norm".to_string(), Attribute::String(norm.to_string()))]);
  apply_one(cx, Normalizer, vec![Some(x.clone())], attributes)
}
