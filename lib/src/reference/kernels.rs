//! Kernels for everything except control flow. They work on the native
//! representation and report failures as plain messages.

use crate::{
  error::EvalError,
  model::EmittedNode,
  op::{AttributeExt, Attributes, ML_DOMAIN},
  ops::constant_value,
  types::{ElemKind, Type},
  value::{NativeValue, TensorData, TensorValue},
};

type Outcome<T> = Result<T, String>;

pub(super) fn run(node: &EmittedNode, args: Vec<Option<NativeValue>>) -> Result<Vec<NativeValue>, EvalError> {
  match compute(node, &args) {
    Ok(Some(value)) => Ok(vec![value]),
    Ok(None) => Err(EvalError::Unsupported(format!(
      "{} (domain {:?})",
      node.op_type, node.domain
    ))),
    Err(reason) => Err(EvalError::kernel(&node.op_type, reason)),
  }
}

/// `None` when there is no kernel for the operator.
fn compute(node: &EmittedNode, args: &[Option<NativeValue>]) -> Outcome<Option<NativeValue>> {
  let op = node.op_type.as_str();
  let value = match (node.domain.as_str(), op) {
    ("", "Constant") => array(constant_value(&node.attributes)?),
    ("", "Identity") => arg(args, 0)?.clone(),
    ("", "Add" | "Sub" | "Mul" | "Div") => array(arithmetic(op, tensor_arg(args, 0)?, tensor_arg(args, 1)?)?),
    ("", "Less" | "Greater" | "Equal") => array(comparison(op, tensor_arg(args, 0)?, tensor_arg(args, 1)?)?),
    ("", "And") => array(logical_and(tensor_arg(args, 0)?, tensor_arg(args, 1)?)?),
    ("", "BitwiseAnd") => array(bitwise_and(tensor_arg(args, 0)?, tensor_arg(args, 1)?)?),
    ("", "Not") => {
      let x = tensor_arg(args, 0)?;
      match &x.data {
        TensorData::Bool(v) => array(TensorValue {
          shape: x.shape.clone(),
          data: TensorData::Bool(v.iter().map(|b| !b).collect()),
        }),
        other => return Err(format!("cannot negate {}", other.kind())),
      }
    }
    ("", "Cast") => {
      let to = node
        .attributes
        .int("to")
        .and_then(ElemKind::from_code)
        .ok_or("attribute `to` is not a supported element kind")?;
      let x = tensor_arg(args, 0)?;
      array(TensorValue {
        shape: x.shape.clone(),
        data: cast(&x.data, to)?,
      })
    }
    ("", "Reshape") => {
      let target = tensor_arg(args, 1)?.data.to_i64s().ok_or("target shape must be integer")?;
      array(reshape(tensor_arg(args, 0)?, &target)?)
    }
    ("", "Squeeze") => {
      let axes = match args.get(1).and_then(Option::as_ref) {
        Some(axes) => Some(
          axes
            .as_array()
            .and_then(|a| a.data.to_i64s())
            .ok_or("axes must be an integer array")?,
        ),
        None => None,
      };
      array(squeeze(tensor_arg(args, 0)?, axes)?)
    }
    ("", "Optional") => args.first().cloned().flatten().unwrap_or(NativeValue::None),
    ("", "OptionalHasElement") => array(TensorValue::from(!matches!(arg(args, 0)?, NativeValue::None))),
    ("", "OptionalGetElement") => match arg(args, 0)? {
      NativeValue::None => return Err("optional is empty".to_string()),
      value => value.clone(),
    },
    ("", "SequenceEmpty") => NativeValue::List(Vec::new()),
    ("", "SequenceInsert") => {
      let mut items = list_arg(args, 0)?.to_vec();
      let tensor = arg(args, 1)?.clone();
      let at = position(position_arg(args, 2)?, items.len(), true)?;
      items.insert(at, tensor);
      NativeValue::List(items)
    }
    ("", "SequenceAt") => {
      let items = list_arg(args, 0)?;
      let at = position(position_arg(args, 1)?, items.len(), false)?;
      items[at].clone()
    }
    ("", "SequenceLength") => array(TensorValue::from(list_arg(args, 0)?.len() as i64)),
    (ML_DOMAIN, "Imputer") => array(imputer(node, tensor_arg(args, 0)?)?),
    (ML_DOMAIN, "LabelEncoder") => array(label_encode(&node.attributes, tensor_arg(args, 0)?)?),
    _ => return Ok(None),
  };
  Ok(Some(value))
}

fn array(t: TensorValue) -> NativeValue {
  NativeValue::Array(t)
}

fn arg(args: &[Option<NativeValue>], index: usize) -> Outcome<&NativeValue> {
  args
    .get(index)
    .and_then(Option::as_ref)
    .ok_or_else(|| format!("missing input {}", index))
}

fn tensor_arg(args: &[Option<NativeValue>], index: usize) -> Outcome<&TensorValue> {
  let value = arg(args, index)?;
  value
    .as_array()
    .ok_or_else(|| format!("input {} is {}, expected an array", index, value.describe()))
}

fn list_arg(args: &[Option<NativeValue>], index: usize) -> Outcome<&[NativeValue]> {
  match arg(args, index)? {
    NativeValue::List(items) => Ok(items),
    other => Err(format!("input {} is {}, expected a list", index, other.describe())),
  }
}

fn position_arg(args: &[Option<NativeValue>], index: usize) -> Outcome<Option<i64>> {
  match args.get(index).and_then(Option::as_ref) {
    None => Ok(None),
    Some(value) => value
      .as_array()
      .and_then(TensorValue::as_i64)
      .map(Some)
      .ok_or_else(|| "position must be a single integer".to_string()),
  }
}

/// Resolves a possibly negative position. Inserting may also target `len`.
fn position(at: Option<i64>, len: usize, inserting: bool) -> Outcome<usize> {
  let len = len as i64;
  let at = at.unwrap_or(if inserting { len } else { -1 });
  let resolved = if at < 0 { at + len } else { at };
  let limit = if inserting { len } else { len - 1 };
  if resolved < 0 || resolved > limit {
    return Err(format!("position {} out of range for length {}", at, len));
  }
  Ok(resolved as usize)
}

pub(super) fn condition(node: &EmittedNode, value: Option<&NativeValue>) -> Result<bool, EvalError> {
  value
    .and_then(NativeValue::as_array)
    .and_then(TensorValue::as_bool)
    .ok_or_else(|| EvalError::kernel(&node.op_type, "condition must be a single bool"))
}

pub(super) fn scalar_i64(op: &str, value: &NativeValue) -> Result<i64, EvalError> {
  value
    .as_array()
    .and_then(TensorValue::as_i64)
    .ok_or_else(|| EvalError::kernel(op, "trip count must be a single integer"))
}

/// Stacks per-iteration tensors along a new leading axis. An empty stack takes
/// its kind and rank from `ty`, the per-iteration type; dims without a fixed
/// size become 0.
pub(super) fn stack(op: &str, values: Vec<NativeValue>, ty: &Type) -> Result<NativeValue, EvalError> {
  let tensors = values
    .iter()
    .map(|v| v.as_array().ok_or_else(|| EvalError::kernel(op, "scanned value is not an array")))
    .collect::<Result<Vec<_>, _>>()?;
  let Some(first) = tensors.first() else {
    let (elem, shape) = ty
      .as_tensor()
      .ok_or_else(|| EvalError::kernel(op, format!("cannot stack values of type {}", ty)))?;
    let mut dims = vec![0];
    dims.extend(
      shape
        .dims()
        .unwrap_or_default()
        .iter()
        .map(|d| d.fixed().map_or(0, |n| n as usize)),
    );
    return Ok(array(TensorValue {
      shape: dims,
      data: TensorData::empty(elem),
    }));
  };
  if tensors.iter().any(|t| t.shape != first.shape) {
    return Err(EvalError::kernel(op, "scanned values differ in shape"));
  }
  let parts: Vec<&TensorData> = tensors.iter().map(|t| &t.data).collect();
  let data = TensorData::concat(first.kind(), &parts)
    .ok_or_else(|| EvalError::kernel(op, "scanned values differ in kind"))?;
  let mut shape = vec![tensors.len()];
  shape.extend_from_slice(&first.shape);
  Ok(array(TensorValue { shape, data }))
}

fn padded(shape: &[usize], rank: usize) -> Vec<usize> {
  let mut out = vec![1; rank - shape.len()];
  out.extend_from_slice(shape);
  out
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
  let rank = a.len().max(b.len());
  padded(a, rank)
    .into_iter()
    .zip(padded(b, rank))
    .map(|(x, y)| match (x, y) {
      (x, y) if x == y => Some(x),
      (1, y) => Some(y),
      (x, 1) => Some(x),
      _ => None,
    })
    .collect()
}

/// Element strides of `shape` seen through a broadcast to `rank` dims.
fn strides(shape: &[usize], rank: usize) -> Vec<usize> {
  let padded = padded(shape, rank);
  let mut strides = vec![0; rank];
  let mut step = 1;
  for i in (0..rank).rev() {
    strides[i] = if padded[i] == 1 { 0 } else { step };
    step *= padded[i];
  }
  strides
}

/// Applies `f` pairwise under numpy broadcasting.
fn zip_broadcast<A, B, R>(
  (xs, x_shape): (&[A], &[usize]),
  (ys, y_shape): (&[B], &[usize]),
  f: impl Fn(&A, &B) -> Outcome<R>,
) -> Outcome<(Vec<usize>, Vec<R>)> {
  let shape = broadcast_shape(x_shape, y_shape)
    .ok_or_else(|| format!("cannot broadcast {:?} against {:?}", x_shape, y_shape))?;
  let rank = shape.len();
  let (sx, sy) = (strides(x_shape, rank), strides(y_shape, rank));
  let total: usize = shape.iter().product();
  let mut out = Vec::with_capacity(total);
  let mut index = vec![0usize; rank];
  for _ in 0..total {
    let ox: usize = index.iter().zip(&sx).map(|(i, s)| i * s).sum();
    let oy: usize = index.iter().zip(&sy).map(|(i, s)| i * s).sum();
    out.push(f(&xs[ox], &ys[oy])?);
    for d in (0..rank).rev() {
      index[d] += 1;
      if index[d] < shape[d] {
        break;
      }
      index[d] = 0;
    }
  }
  Ok((shape, out))
}

/// Same-kind binary kernel over the listed variants; the result keeps the variant.
macro_rules! same_kind {
  ($a:expr, $b:expr, $f:expr, [$($variant:ident),*]) => {
    match (&$a.data, &$b.data) {
      $((TensorData::$variant(x), TensorData::$variant(y)) => {
        let (shape, data) = zip_broadcast((x.as_slice(), &$a.shape), (y.as_slice(), &$b.shape), $f)?;
        Ok(TensorValue { shape, data: TensorData::$variant(data) })
      })*
      _ => Err(format!("unsupported operands {} and {}", $a.kind(), $b.kind())),
    }
  };
}

/// Same-kind binary kernel over the listed variants producing booleans.
macro_rules! to_bool {
  ($a:expr, $b:expr, $f:expr, [$($variant:ident),*]) => {
    match (&$a.data, &$b.data) {
      $((TensorData::$variant(x), TensorData::$variant(y)) => {
        let (shape, data) = zip_broadcast((x.as_slice(), &$a.shape), (y.as_slice(), &$b.shape), $f)?;
        Ok(TensorValue { shape, data: TensorData::Bool(data) })
      })*
      _ => Err(format!("unsupported operands {} and {}", $a.kind(), $b.kind())),
    }
  };
}

trait Numeric: Copy {
  fn arith(self, op: &str, other: Self) -> Outcome<Self>;
}

macro_rules! integer_numeric {
  ($($t:ty),*) => {$(
    impl Numeric for $t {
      fn arith(self, op: &str, other: Self) -> Outcome<Self> {
        match op {
          "Add" => Ok(self.wrapping_add(other)),
          "Sub" => Ok(self.wrapping_sub(other)),
          "Mul" => Ok(self.wrapping_mul(other)),
          "Div" => self.checked_div(other).ok_or_else(|| format!("{} / {} is undefined", self, other)),
          _ => Err(format!("{} is not arithmetic", op)),
        }
      }
    }
  )*};
}

macro_rules! float_numeric {
  ($($t:ty),*) => {$(
    impl Numeric for $t {
      fn arith(self, op: &str, other: Self) -> Outcome<Self> {
        match op {
          "Add" => Ok(self + other),
          "Sub" => Ok(self - other),
          "Mul" => Ok(self * other),
          "Div" => Ok(self / other),
          _ => Err(format!("{} is not arithmetic", op)),
        }
      }
    }
  )*};
}

integer_numeric!(i32, i64);
float_numeric!(f32, f64);

fn arithmetic(op: &str, a: &TensorValue, b: &TensorValue) -> Outcome<TensorValue> {
  same_kind!(a, b, |x, y| x.arith(op, *y), [Int32, Int64, Float32, Float64])
}

fn compare<T: PartialOrd>(op: &str, x: &T, y: &T) -> Outcome<bool> {
  match op {
    "Less" => Ok(x < y),
    "Greater" => Ok(x > y),
    "Equal" => Ok(x == y),
    _ => Err(format!("{} is not a comparison", op)),
  }
}

fn comparison(op: &str, a: &TensorValue, b: &TensorValue) -> Outcome<TensorValue> {
  to_bool!(a, b, |x, y| compare(op, x, y), [Bool, Int32, Int64, Float32, Float64, String])
}

fn logical_and(a: &TensorValue, b: &TensorValue) -> Outcome<TensorValue> {
  same_kind!(a, b, |x: &bool, y: &bool| Ok(*x && *y), [Bool])
}

fn bitwise_and(a: &TensorValue, b: &TensorValue) -> Outcome<TensorValue> {
  same_kind!(a, b, |x, y| Ok(*x & *y), [Int32, Int64])
}

fn cast(data: &TensorData, to: ElemKind) -> Outcome<TensorData> {
  match (to, data.to_i64s()) {
    (ElemKind::Int32, Some(v)) => return Ok(TensorData::Int32(v.into_iter().map(|x| x as i32).collect())),
    (ElemKind::Int64, Some(v)) => return Ok(TensorData::Int64(v)),
    _ => {}
  }
  let numbers = match (data, to) {
    (TensorData::String(_), ElemKind::String) => return Ok(data.clone()),
    (TensorData::String(v), _) => v
      .iter()
      .map(|s| s.trim().parse::<f64>().map_err(|_| format!("cannot parse {:?} as a number", s)))
      .collect::<Outcome<Vec<_>>>()?,
    (data, _) => data.to_f64s().ok_or("cannot read elements as numbers")?,
  };
  Ok(match to {
    ElemKind::Bool => TensorData::Bool(numbers.iter().map(|x| *x != 0.0).collect()),
    ElemKind::Int32 => TensorData::Int32(numbers.iter().map(|x| *x as i32).collect()),
    ElemKind::Int64 => TensorData::Int64(numbers.iter().map(|x| *x as i64).collect()),
    ElemKind::Float32 => TensorData::Float32(numbers.iter().map(|x| *x as f32).collect()),
    ElemKind::Float64 => TensorData::Float64(numbers),
    ElemKind::String => TensorData::String(numbers.iter().map(f64::to_string).collect()),
  })
}

/// Zero copies the input dim, a single -1 takes the remaining elements.
fn reshape(t: &TensorValue, target: &[i64]) -> Outcome<TensorValue> {
  let mut dims = Vec::with_capacity(target.len());
  let mut free = None;
  for (i, d) in target.iter().enumerate() {
    match *d {
      -1 if free.is_none() => {
        free = Some(i);
        dims.push(1);
      }
      0 => dims.push(
        *t.shape
          .get(i)
          .ok_or_else(|| format!("target dim {} copies a missing input dim", i))?,
      ),
      n if n > 0 => dims.push(n as usize),
      n => return Err(format!("invalid target dim {}", n)),
    }
  }
  if let Some(i) = free {
    let known: usize = dims.iter().product();
    if known == 0 || t.len() % known != 0 {
      return Err(format!("cannot reshape {:?} into {:?}", t.shape, target));
    }
    dims[i] = t.len() / known;
  }
  TensorValue::new(dims, t.data.clone()).ok_or_else(|| format!("cannot reshape {:?} into {:?}", t.shape, target))
}

fn squeeze(t: &TensorValue, axes: Option<Vec<i64>>) -> Outcome<TensorValue> {
  let rank = t.shape.len() as i64;
  let removed = match axes {
    None => (0..t.shape.len()).filter(|i| t.shape[*i] == 1).collect::<Vec<_>>(),
    Some(axes) => axes
      .into_iter()
      .map(|axis| {
        if axis < -rank || axis >= rank {
          return Err(format!("axis {} out of range for rank {}", axis, rank));
        }
        let axis = axis.rem_euclid(rank) as usize;
        if t.shape[axis] != 1 {
          return Err(format!("dim {} of {:?} is not 1", axis, t.shape));
        }
        Ok(axis)
      })
      .collect::<Outcome<Vec<_>>>()?,
  };
  let shape = t
    .shape
    .iter()
    .enumerate()
    .filter(|(i, _)| !removed.contains(i))
    .map(|(_, d)| *d)
    .collect();
  Ok(TensorValue {
    shape,
    data: t.data.clone(),
  })
}

/// Imputed value for the element at flat `index`; a single value serves all features.
fn pick<T: Copy>(imputed: &[T], index: usize, features: usize) -> T {
  if imputed.len() == 1 {
    imputed[0]
  } else {
    imputed[(index % features) % imputed.len()]
  }
}

fn impute<T: Copy, I: Copy>(
  values: &[T],
  imputed: &[I],
  features: usize,
  replaced: impl Fn(T) -> bool,
  convert: impl Fn(I) -> T,
) -> Vec<T> {
  values
    .iter()
    .enumerate()
    .map(|(i, x)| if replaced(*x) { convert(pick(imputed, i, features)) } else { *x })
    .collect()
}

fn imputer(node: &EmittedNode, t: &TensorValue) -> Outcome<TensorValue> {
  let attributes = &node.attributes;
  let features = t.shape.last().copied().unwrap_or(1).max(1);
  let floats = || {
    attributes
      .floats("imputed_value_floats")
      .filter(|v| !v.is_empty())
      .ok_or("missing float imputed values")
  };
  let ints = || {
    attributes
      .ints("imputed_value_int64s")
      .filter(|v| !v.is_empty())
      .ok_or("missing int64 imputed values")
  };
  let replaced_float = attributes.float("replaced_value_float").unwrap_or(0.0);
  let replaced_int = attributes.int("replaced_value_int64").unwrap_or(0);
  let is_replaced = |x: f64| x == replaced_float || (x.is_nan() && replaced_float.is_nan());
  let data = match &t.data {
    TensorData::Float32(v) => TensorData::Float32(impute(v.as_slice(), floats()?, features, |x: f32| is_replaced(x as f64), |i: f64| i as f32)),
    TensorData::Float64(v) => TensorData::Float64(impute(v.as_slice(), floats()?, features, is_replaced, |i| i)),
    TensorData::Int32(v) => TensorData::Int32(impute(v.as_slice(), ints()?, features, |x: i32| x as i64 == replaced_int, |i: i64| i as i32)),
    TensorData::Int64(v) => TensorData::Int64(impute(v.as_slice(), ints()?, features, |x| x == replaced_int, |i| i)),
    other => return Err(format!("cannot impute {} elements", other.kind())),
  };
  Ok(TensorValue {
    shape: t.shape.clone(),
    data,
  })
}

/// Maps each element through the key list; misses take the default.
fn label_encode(attributes: &Attributes, t: &TensorValue) -> Outcome<TensorValue> {
  let slots: Vec<Option<usize>> = match (&t.data, label_keys(attributes)?) {
    (TensorData::Int64(xs), LabelKeys::Ints(keys)) => xs.iter().map(|x| keys.iter().position(|k| k == x)).collect(),
    (TensorData::Float32(xs), LabelKeys::Floats(keys)) => {
      xs.iter().map(|x| keys.iter().position(|k| *k as f32 == *x)).collect()
    }
    (TensorData::String(xs), LabelKeys::Strings(keys)) => xs.iter().map(|x| keys.iter().position(|k| k == x)).collect(),
    (data, _) => return Err(format!("keys do not match {} elements", data.kind())),
  };
  let data = if let Some(values) = attributes.ints("values_int64s") {
    let default = attributes.int("default_int64").unwrap_or(-1);
    TensorData::Int64(slots.iter().map(|s| s.and_then(|i| values.get(i).copied()).unwrap_or(default)).collect())
  } else if let Some(values) = attributes.floats("values_floats") {
    let default = attributes.float("default_float").unwrap_or(-0.0);
    TensorData::Float32(
      slots
        .iter()
        .map(|s| s.and_then(|i| values.get(i).copied()).unwrap_or(default) as f32)
        .collect(),
    )
  } else if let Some(values) = attributes.strings("values_strings") {
    let default = attributes.string("default_string").unwrap_or("_Unused");
    TensorData::String(
      slots
        .iter()
        .map(|s| s.and_then(|i| values.get(i)).map_or(default, String::as_str).to_string())
        .collect(),
    )
  } else {
    return Err("no values given".to_string());
  };
  Ok(TensorValue {
    shape: t.shape.clone(),
    data,
  })
}

enum LabelKeys<'a> {
  Ints(&'a [i64]),
  Floats(&'a [f64]),
  Strings(&'a [String]),
}

fn label_keys(attributes: &Attributes) -> Outcome<LabelKeys<'_>> {
  match (
    attributes.ints("keys_int64s"),
    attributes.floats("keys_floats"),
    attributes.strings("keys_strings"),
  ) {
    (Some(keys), None, None) => Ok(LabelKeys::Ints(keys)),
    (None, Some(keys), None) => Ok(LabelKeys::Floats(keys)),
    (None, None, Some(keys)) => Ok(LabelKeys::Strings(keys)),
    _ => Err("expected exactly one key list".to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::op::Attribute;

  #[test]
  fn test_broadcasting_arithmetic() {
    let a = TensorValue::new(vec![2, 1], TensorData::Int64(vec![10, 20])).unwrap();
    let b = TensorValue::from(vec![1i64, 2, 3]);
    let c = arithmetic("Add", &a, &b).unwrap();
    assert_eq!(c.shape, vec![2, 3]);
    assert_eq!(c.data, TensorData::Int64(vec![11, 12, 13, 21, 22, 23]));
    assert!(arithmetic("Add", &TensorValue::from(vec![1i64, 2]), &b).is_err());
  }

  #[test]
  fn test_integer_division_by_zero_fails() {
    assert!(arithmetic("Div", &TensorValue::from(1i64), &TensorValue::from(0i64)).is_err());
    let q = arithmetic("Div", &TensorValue::from(1.0f64), &TensorValue::from(0.0f64)).unwrap();
    assert_eq!(q.data, TensorData::Float64(vec![f64::INFINITY]));
  }

  #[test]
  fn test_comparison_and_logic() {
    let a = TensorValue::from(vec![1i32, 5, 3]);
    let b = TensorValue::from(3i32);
    assert_eq!(comparison("Less", &a, &b).unwrap().data, TensorData::Bool(vec![true, false, false]));
    assert_eq!(comparison("Equal", &a, &b).unwrap().data, TensorData::Bool(vec![false, false, true]));
    let t = TensorValue::from(vec![true, false]);
    assert_eq!(logical_and(&t, &TensorValue::from(true)).unwrap().data, TensorData::Bool(vec![true, false]));
    assert_eq!(
      bitwise_and(&TensorValue::from(vec![6i64, 5]), &TensorValue::from(3i64)).unwrap().data,
      TensorData::Int64(vec![2, 1])
    );
  }

  #[test]
  fn test_cast() {
    assert_eq!(cast(&TensorData::Int64(vec![1, 0]), ElemKind::Bool).unwrap(), TensorData::Bool(vec![true, false]));
    assert_eq!(cast(&TensorData::Float32(vec![2.7]), ElemKind::Int64).unwrap(), TensorData::Int64(vec![2]));
    assert_eq!(
      cast(&TensorData::String(vec![" 1.5".into()]), ElemKind::Float64).unwrap(),
      TensorData::Float64(vec![1.5])
    );
    assert!(cast(&TensorData::String(vec!["x".into()]), ElemKind::Int32).is_err());
  }

  #[test]
  fn test_reshape_and_squeeze() {
    let t = TensorValue::from(vec![1i64, 2, 3, 4, 5, 6]);
    assert_eq!(reshape(&t, &[2, -1]).unwrap().shape, vec![2, 3]);
    assert!(reshape(&t, &[4, -1]).is_err());
    assert!(reshape(&t, &[-1, -1]).is_err());
    let column = reshape(&t, &[6, 1]).unwrap();
    assert_eq!(squeeze(&column, Some(vec![-1])).unwrap().shape, vec![6]);
    assert_eq!(squeeze(&column, None).unwrap().shape, vec![6]);
    assert!(squeeze(&column, Some(vec![0])).is_err());
  }

  #[test]
  fn test_positions() {
    assert_eq!(position(None, 3, true).unwrap(), 3);
    assert_eq!(position(Some(-1), 3, true).unwrap(), 2);
    assert_eq!(position(None, 3, false).unwrap(), 2);
    assert!(position(Some(3), 3, false).is_err());
    assert!(position(None, 0, false).is_err());
  }

  #[test]
  fn test_label_encoder() {
    let attributes = Attributes::from([
      ("keys_int64s".to_string(), Attribute::Ints(vec![0, 1, 2])),
      (
        "values_strings".to_string(),
        Attribute::Strings(vec!["a".into(), "b".into(), "c".into()]),
      ),
      ("default_string".to_string(), Attribute::String("?".into())),
    ]);
    let encoded = label_encode(&attributes, &TensorValue::from(vec![1i64, 2, 3])).unwrap();
    assert_eq!(encoded.shape, vec![3]);
    assert_eq!(encoded.data, TensorData::String(vec!["b".into(), "c".into(), "?".into()]));
    assert!(label_encode(&attributes, &TensorValue::from(vec![1.0f32])).is_err());

    let attributes = Attributes::from([
      ("keys_strings".to_string(), Attribute::Strings(vec!["x".into()])),
      ("values_floats".to_string(), Attribute::Floats(vec![0.5])),
    ]);
    let encoded = label_encode(&attributes, &TensorValue::from(vec!["x".to_string(), "y".to_string()])).unwrap();
    assert_eq!(encoded.data, TensorData::Float32(vec![0.5, -0.0]));
  }

  #[test]
  fn test_stack_empty_uses_type() {
    let ty = Type::tensor(ElemKind::Int64, crate::types::Shape::fixed(&[1]));
    let stacked = stack("Loop", Vec::new(), &ty).unwrap();
    assert_eq!(
      stacked,
      NativeValue::Array(TensorValue::new(vec![0, 1], TensorData::Int64(vec![])).unwrap())
    );

    let ty = Type::tensor(
      ElemKind::Float32,
      crate::types::Shape::new(vec![crate::types::Dim::Unknown, crate::types::Dim::Fixed(2)]),
    );
    let stacked = stack("Loop", Vec::new(), &ty).unwrap();
    assert_eq!(
      stacked,
      NativeValue::Array(TensorValue::new(vec![0, 0, 2], TensorData::Float32(vec![])).unwrap())
    );
  }
}
