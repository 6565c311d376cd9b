use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
  error::ValueError,
  types::{ElemKind, Shape, Type},
};

/// Flat, row-major element storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorData {
  Bool(Vec<bool>),
  Int32(Vec<i32>),
  Int64(Vec<i64>),
  Float32(Vec<f32>),
  Float64(Vec<f64>),
  String(Vec<String>),
}

impl TensorData {
  pub fn kind(&self) -> ElemKind {
    match self {
      TensorData::Bool(_) => ElemKind::Bool,
      TensorData::Int32(_) => ElemKind::Int32,
      TensorData::Int64(_) => ElemKind::Int64,
      TensorData::Float32(_) => ElemKind::Float32,
      TensorData::Float64(_) => ElemKind::Float64,
      TensorData::String(_) => ElemKind::String,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      TensorData::Bool(v) => v.len(),
      TensorData::Int32(v) => v.len(),
      TensorData::Int64(v) => v.len(),
      TensorData::Float32(v) => v.len(),
      TensorData::Float64(v) => v.len(),
      TensorData::String(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn empty(kind: ElemKind) -> Self {
    match kind {
      ElemKind::Bool => TensorData::Bool(Vec::new()),
      ElemKind::Int32 => TensorData::Int32(Vec::new()),
      ElemKind::Int64 => TensorData::Int64(Vec::new()),
      ElemKind::Float32 => TensorData::Float32(Vec::new()),
      ElemKind::Float64 => TensorData::Float64(Vec::new()),
      ElemKind::String => TensorData::String(Vec::new()),
    }
  }

  /// Numbers and booleans widened to `f64`. `None` for strings.
  pub fn to_f64s(&self) -> Option<Vec<f64>> {
    Some(match self {
      TensorData::Bool(v) => v.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect(),
      TensorData::Int32(v) => v.iter().map(|x| *x as f64).collect(),
      TensorData::Int64(v) => v.iter().map(|x| *x as f64).collect(),
      TensorData::Float32(v) => v.iter().map(|x| *x as f64).collect(),
      TensorData::Float64(v) => v.clone(),
      TensorData::String(_) => return None,
    })
  }

  /// Integer elements as `i64`, for shapes, axes and indices.
  pub fn to_i64s(&self) -> Option<Vec<i64>> {
    match self {
      TensorData::Int32(v) => Some(v.iter().map(|x| *x as i64).collect()),
      TensorData::Int64(v) => Some(v.clone()),
      _ => None,
    }
  }

  /// Concatenates same-kind parts. `None` on a kind mismatch.
  pub fn concat(kind: ElemKind, parts: &[&TensorData]) -> Option<TensorData> {
    let mut out = TensorData::empty(kind);
    for part in parts {
      match (&mut out, part) {
        (TensorData::Bool(o), TensorData::Bool(p)) => o.extend_from_slice(p),
        (TensorData::Int32(o), TensorData::Int32(p)) => o.extend_from_slice(p),
        (TensorData::Int64(o), TensorData::Int64(p)) => o.extend_from_slice(p),
        (TensorData::Float32(o), TensorData::Float32(p)) => o.extend_from_slice(p),
        (TensorData::Float64(o), TensorData::Float64(p)) => o.extend_from_slice(p),
        (TensorData::String(o), TensorData::String(p)) => o.extend_from_slice(p),
        _ => return None,
      }
    }
    Some(out)
  }
}

/// Row-major tensor. Deserialization rejects data whose length disagrees with
/// the shape; struct literals are checked by `is_well_formed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct TensorValue {
  pub shape: Vec<usize>,
  pub data: TensorData,
}

#[derive(Deserialize)]
struct RawTensor {
  shape: Vec<usize>,
  data: TensorData,
}

impl TryFrom<RawTensor> for TensorValue {
  type Error = ValueError;

  fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
    let count = raw.data.len();
    TensorValue::new(raw.shape, raw.data).ok_or_else(|| ValueError {
      expected: "tensor".to_string(),
      reason: format!("{} elements do not fill the shape", count),
    })
  }
}

impl TensorValue {
  /// `None` when the element count does not match the shape.
  pub fn new(shape: Vec<usize>, data: TensorData) -> Option<Self> {
    let value = TensorValue { shape, data };
    value.is_well_formed().then_some(value)
  }

  pub fn is_well_formed(&self) -> bool {
    self.shape.iter().product::<usize>() == self.data.len()
  }

  pub fn scalar(data: TensorData) -> Self {
    TensorValue { shape: Vec::new(), data }
  }

  pub fn kind(&self) -> ElemKind {
    self.data.kind()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn ty(&self) -> Type {
    Type::tensor(self.kind(), Shape::fixed(&self.shape))
  }

  /// The single element of a one-element boolean tensor.
  pub fn as_bool(&self) -> Option<bool> {
    match &self.data {
      TensorData::Bool(v) if v.len() == 1 => Some(v[0]),
      _ => None,
    }
  }

  /// The single element of a one-element integer tensor.
  pub fn as_i64(&self) -> Option<i64> {
    match self.data.to_i64s() {
      Some(v) if v.len() == 1 => Some(v[0]),
      _ => None,
    }
  }
}

macro_rules! tensor_from {
  ($t:ty, $variant:ident) => {
    impl From<$t> for TensorValue {
      fn from(x: $t) -> Self {
        TensorValue::scalar(TensorData::$variant(vec![x]))
      }
    }

    impl From<Vec<$t>> for TensorValue {
      fn from(xs: Vec<$t>) -> Self {
        TensorValue {
          shape: vec![xs.len()],
          data: TensorData::$variant(xs),
        }
      }
    }
  };
}

tensor_from!(bool, Bool);
tensor_from!(i32, Int32);
tensor_from!(i64, Int64);
tensor_from!(f32, Float32);
tensor_from!(f64, Float64);
tensor_from!(String, String);

impl fmt::Display for TensorValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let items = match &self.data {
      TensorData::Bool(v) => v.iter().join(", "),
      TensorData::Int32(v) => v.iter().join(", "),
      TensorData::Int64(v) => v.iter().join(", "),
      TensorData::Float32(v) => v.iter().join(", "),
      TensorData::Float64(v) => v.iter().join(", "),
      TensorData::String(v) => v.iter().map(|s| format!("{:?}", s)).join(", "),
    };
    write!(f, "{}[{}]({})", self.kind(), self.shape.iter().join(", "), items)
  }
}

/// A concrete value known at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
  Tensor(TensorValue),
  Sequence(Vec<Value>),
  Optional(Option<Box<Value>>),
}

impl Value {
  pub fn as_tensor(&self) -> Option<&TensorValue> {
    match self {
      Value::Tensor(t) => Some(t),
      _ => None,
    }
  }

  pub fn matches(&self, ty: &Type) -> bool {
    match (self, ty) {
      (Value::Tensor(t), ty) => t.is_well_formed() && t.ty().is_subtype_of(ty),
      (Value::Sequence(items), Type::Sequence(elem)) => items.iter().all(|v| v.matches(elem)),
      (Value::Optional(None), Type::Optional(_)) => true,
      (Value::Optional(Some(v)), Type::Optional(elem)) => v.matches(elem),
      _ => false,
    }
  }

  /// Encodes into the evaluator's representation. Present optionals become the
  /// bare inner value, so decoding needs the type.
  pub fn to_native(&self) -> NativeValue {
    match self {
      Value::Tensor(t) => NativeValue::Array(t.clone()),
      Value::Sequence(items) => NativeValue::List(items.iter().map(Value::to_native).collect()),
      Value::Optional(None) => NativeValue::None,
      Value::Optional(Some(v)) => v.to_native(),
    }
  }

  pub fn from_native(ty: &Type, native: NativeValue) -> Result<Value, ValueError> {
    let mismatch = |reason: String| ValueError {
      expected: ty.to_string(),
      reason,
    };
    match (ty, native) {
      (Type::Optional(_), NativeValue::None) => Ok(Value::Optional(None)),
      (Type::Optional(elem), native) => Ok(Value::Optional(Some(Box::new(Value::from_native(
        elem, native,
      )?)))),
      (Type::Sequence(elem), NativeValue::List(items)) => items
        .into_iter()
        .map(|item| Value::from_native(elem, item))
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Sequence),
      (Type::Tensor { .. }, NativeValue::Array(t)) => {
        let value = Value::Tensor(t);
        if value.matches(ty) {
          Ok(value)
        } else {
          Err(mismatch(format!("got {}", value)))
        }
      }
      (_, native) => Err(mismatch(format!("got {}", native.describe()))),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Tensor(t) => write!(f, "{}", t),
      Value::Sequence(items) => write!(f, "[{}]", items.iter().join(", ")),
      Value::Optional(None) => f.write_str("None"),
      Value::Optional(Some(v)) => write!(f, "Some({})", v),
    }
  }
}

impl From<TensorValue> for Value {
  fn from(t: TensorValue) -> Self {
    Value::Tensor(t)
  }
}

/// What the evaluator consumes and produces. Optionals have no wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeValue {
  Array(TensorValue),
  List(Vec<NativeValue>),
  None,
}

impl NativeValue {
  pub fn describe(&self) -> String {
    match self {
      NativeValue::Array(t) => format!("array {}", t),
      NativeValue::List(items) => format!("list of {}", items.len()),
      NativeValue::None => "none".to_string(),
    }
  }

  /// Every array inside has as many elements as its shape says.
  pub fn is_well_formed(&self) -> bool {
    match self {
      NativeValue::Array(t) => t.is_well_formed(),
      NativeValue::List(items) => items.iter().all(NativeValue::is_well_formed),
      NativeValue::None => true,
    }
  }

  pub fn as_array(&self) -> Option<&TensorValue> {
    match self {
      NativeValue::Array(t) => Some(t),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Dim;
  use proptest::prelude::*;

  fn f32_scalar() -> Type {
    Type::scalar(ElemKind::Float32)
  }

  #[test]
  fn test_optional_is_flattened() {
    let ty = Type::optional(f32_scalar());
    let present = Value::Optional(Some(Box::new(Value::Tensor(2.0f32.into()))));
    let native = present.to_native();
    assert_eq!(native, NativeValue::Array(2.0f32.into()));
    assert_eq!(Value::from_native(&ty, native).unwrap(), present);
    let absent = Value::Optional(None);
    assert_eq!(absent.to_native(), NativeValue::None);
    assert_eq!(Value::from_native(&ty, NativeValue::None).unwrap(), absent);
  }

  #[test]
  fn test_decode_checks_type() {
    let native = NativeValue::Array(vec![1i64, 2].into());
    assert!(Value::from_native(&f32_scalar(), native.clone()).is_err());
    let ty = Type::tensor(ElemKind::Int64, Shape::new(vec![Dim::Unknown]));
    assert!(Value::from_native(&ty, native.clone()).is_ok());
    assert!(Value::from_native(&Type::sequence(ty), native).is_err());
  }

  #[test]
  fn test_matches() {
    let v = Value::Tensor(TensorValue::new(vec![2, 2], TensorData::Int64(vec![1, 2, 3, 4])).unwrap());
    assert!(v.matches(&Type::tensor(ElemKind::Int64, Shape::new(vec![Dim::from("N"), Dim::Fixed(2)]))));
    assert!(!v.matches(&Type::tensor(ElemKind::Int64, Shape::fixed(&[4]))));
    let empty = Value::Sequence(vec![]);
    assert!(empty.matches(&Type::sequence(f32_scalar())));
    assert!(!empty.matches(&Type::optional(f32_scalar())));
  }

  #[test]
  fn test_shape_must_match_data() {
    assert!(TensorValue::new(vec![2, 3], TensorData::Bool(vec![true; 5])).is_none());
    assert!(TensorValue::new(vec![0, 3], TensorData::Bool(vec![])).is_some());
  }

  #[test]
  fn test_short_data_is_rejected() {
    let short: Result<Value, _> = serde_json::from_str(r#"{"tensor":{"shape":[3],"data":{"int64":[1]}}}"#);
    assert!(short.is_err());
    let full: Value = serde_json::from_str(r#"{"tensor":{"shape":[3],"data":{"int64":[1,2,3]}}}"#).unwrap();
    assert_eq!(full, Value::Tensor(vec![1i64, 2, 3].into()));

    let literal = TensorValue {
      shape: vec![3],
      data: TensorData::Int64(vec![1]),
    };
    assert!(!literal.is_well_formed());
    assert!(!Value::Tensor(literal.clone()).matches(&Type::tensor(ElemKind::Int64, Shape::fixed(&[3]))));
    assert!(!NativeValue::List(vec![NativeValue::Array(literal)]).is_well_formed());
  }

  fn tensor_value() -> impl Strategy<Value = TensorValue> {
    prop_oneof![
      prop::collection::vec(any::<i64>(), 0..6).prop_map(TensorValue::from),
      prop::collection::vec(-1e6f32..1e6, 0..6).prop_map(TensorValue::from),
      any::<bool>().prop_map(TensorValue::from),
    ]
  }

  fn typed_value() -> impl Strategy<Value = (Type, Value)> {
    prop_oneof![
      tensor_value().prop_map(|t| (t.ty(), Value::Tensor(t))),
      tensor_value().prop_map(|t| (Type::optional(t.ty()), Value::Optional(Some(Box::new(Value::Tensor(t)))))),
      tensor_value().prop_map(|t| (Type::optional(Type::optional(t.ty())), Value::Optional(None))),
      prop::collection::vec(any::<i32>(), 0..4).prop_map(|xs| {
        let items = xs.into_iter().map(|x| Value::Tensor(x.into())).collect();
        (Type::sequence(Type::scalar(ElemKind::Int32)), Value::Sequence(items))
      }),
    ]
  }

  proptest! {
    #[test]
    fn test_native_roundtrip((ty, value) in typed_value()) {
      prop_assert!(value.matches(&ty));
      prop_assert_eq!(Value::from_native(&ty, value.to_native()).unwrap(), value);
    }
  }
}
