use std::fmt;

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemKind {
  Bool,
  Int32,
  Int64,
  Float32,
  Float64,
  String,
}

impl ElemKind {
  /// TensorProto data type code.
  pub fn code(self) -> i64 {
    match self {
      ElemKind::Float32 => 1,
      ElemKind::Int32 => 6,
      ElemKind::Int64 => 7,
      ElemKind::String => 8,
      ElemKind::Bool => 9,
      ElemKind::Float64 => 11,
    }
  }

  pub fn from_code(code: i64) -> Option<Self> {
    match code {
      1 => Some(ElemKind::Float32),
      6 => Some(ElemKind::Int32),
      7 => Some(ElemKind::Int64),
      8 => Some(ElemKind::String),
      9 => Some(ElemKind::Bool),
      11 => Some(ElemKind::Float64),
      _ => None,
    }
  }

  pub fn is_numeric(self) -> bool {
    !matches!(self, ElemKind::Bool | ElemKind::String)
  }

  pub fn is_integer(self) -> bool {
    matches!(self, ElemKind::Int32 | ElemKind::Int64)
  }

  pub fn name(self) -> &'static str {
    match self {
      ElemKind::Bool => "bool",
      ElemKind::Int32 => "int32",
      ElemKind::Int64 => "int64",
      ElemKind::Float32 => "float32",
      ElemKind::Float64 => "float64",
      ElemKind::String => "string",
    }
  }
}

impl fmt::Display for ElemKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dim {
  Fixed(u64),
  /// Equal names denote equal, unknown sizes.
  Symbol(String),
  Unknown,
}

impl Dim {
  /// `self ≤ other` in the shape lattice.
  pub fn is_subdim_of(&self, other: &Dim) -> bool {
    match (self, other) {
      (_, Dim::Unknown) => true,
      (Dim::Fixed(_), Dim::Symbol(_)) => true,
      (Dim::Symbol(a), Dim::Symbol(b)) => a == b,
      (Dim::Fixed(a), Dim::Fixed(b)) => a == b,
      _ => false,
    }
  }

  pub fn unify(&self, other: &Dim) -> Dim {
    match (self, other) {
      (a, b) if a == b => a.clone(),
      (Dim::Fixed(_), Dim::Symbol(s)) | (Dim::Symbol(s), Dim::Fixed(_)) => Dim::Symbol(s.clone()),
      _ => Dim::Unknown,
    }
  }

  pub fn fixed(&self) -> Option<u64> {
    match self {
      Dim::Fixed(n) => Some(*n),
      _ => None,
    }
  }
}

impl From<usize> for Dim {
  fn from(n: usize) -> Self {
    Dim::Fixed(n as u64)
  }
}

impl From<&str> for Dim {
  fn from(name: &str) -> Self {
    Dim::Symbol(name.to_string())
  }
}

impl fmt::Display for Dim {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Dim::Fixed(n) => write!(f, "{}", n),
      Dim::Symbol(s) => f.write_str(s),
      Dim::Unknown => f.write_str("?"),
    }
  }
}

/// `None` is a shape of unknown rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(Option<Vec<Dim>>);

impl Shape {
  pub fn new<D: Into<Dim>>(dims: impl IntoIterator<Item = D>) -> Self {
    Shape(Some(dims.into_iter().map(Into::into).collect()))
  }

  pub fn unknown() -> Self {
    Shape(None)
  }

  pub fn scalar() -> Self {
    Shape(Some(Vec::new()))
  }

  pub fn fixed(dims: &[usize]) -> Self {
    Shape::new(dims.iter().copied())
  }

  /// Known rank, every dim unknown.
  pub fn of_rank(rank: usize) -> Self {
    Shape(Some(vec![Dim::Unknown; rank]))
  }

  pub fn dims(&self) -> Option<&[Dim]> {
    self.0.as_deref()
  }

  pub fn rank(&self) -> Option<usize> {
    self.0.as_ref().map(Vec::len)
  }

  /// Concrete sizes when every dim is fixed.
  pub fn concrete(&self) -> Option<Vec<usize>> {
    self.dims()?.iter().map(|d| d.fixed().map(|n| n as usize)).collect()
  }

  pub fn is_subshape_of(&self, other: &Shape) -> bool {
    match (&self.0, &other.0) {
      (_, None) => true,
      (None, Some(_)) => false,
      (Some(a), Some(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_subdim_of(y)),
    }
  }

  /// `None` when the ranks disagree.
  pub fn unify(&self, other: &Shape) -> Option<Shape> {
    match (&self.0, &other.0) {
      (Some(a), Some(b)) if a.len() != b.len() => None,
      (Some(a), Some(b)) => Some(Shape(Some(a.iter().zip(b).map(|(x, y)| x.unify(y)).collect()))),
      _ => Some(Shape::unknown()),
    }
  }

  /// Multidirectional broadcasting, right-aligned.
  pub fn broadcast(&self, other: &Shape) -> Result<Shape, String> {
    let (a, b) = match (&self.0, &other.0) {
      (Some(a), Some(b)) => (a, b),
      _ => return Ok(Shape::unknown()),
    };
    let mut dims = a
      .iter()
      .rev()
      .zip_longest(b.iter().rev())
      .map(|pair| match pair {
        EitherOrBoth::Both(x, y) => broadcast_dim(x, y),
        EitherOrBoth::Left(x) | EitherOrBoth::Right(x) => Ok(x.clone()),
      })
      .collect::<Result<Vec<_>, _>>()?;
    dims.reverse();
    Ok(Shape(Some(dims)))
  }
}

fn broadcast_dim(x: &Dim, y: &Dim) -> Result<Dim, String> {
  Ok(match (x, y) {
    (a, b) if a == b => a.clone(),
    (Dim::Fixed(1), other) | (other, Dim::Fixed(1)) => other.clone(),
    (Dim::Fixed(a), Dim::Fixed(b)) => return Err(format!("cannot broadcast {} against {}", a, b)),
    (Dim::Fixed(n), _) | (_, Dim::Fixed(n)) => Dim::Fixed(*n),
    _ => Dim::Unknown,
  })
}

impl From<Vec<Dim>> for Shape {
  fn from(dims: Vec<Dim>) -> Self {
    Shape(Some(dims))
  }
}

impl<const N: usize> From<[usize; N]> for Shape {
  fn from(dims: [usize; N]) -> Self {
    Shape::fixed(&dims)
  }
}

impl fmt::Display for Shape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.0 {
      None => f.write_str("[...]"),
      Some(dims) => write!(f, "[{}]", dims.iter().join(", ")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
  Tensor { elem: ElemKind, shape: Shape },
  Sequence(Box<Type>),
  Optional(Box<Type>),
}

impl Type {
  pub fn tensor(elem: ElemKind, shape: impl Into<Shape>) -> Self {
    Type::Tensor {
      elem,
      shape: shape.into(),
    }
  }

  pub fn scalar(elem: ElemKind) -> Self {
    Type::tensor(elem, Shape::scalar())
  }

  pub fn sequence(elem: Type) -> Self {
    Type::Sequence(Box::new(elem))
  }

  pub fn optional(elem: Type) -> Self {
    Type::Optional(Box::new(elem))
  }

  pub fn as_tensor(&self) -> Option<(ElemKind, &Shape)> {
    match self {
      Type::Tensor { elem, shape } => Some((*elem, shape)),
      _ => None,
    }
  }

  pub fn is_subtype_of(&self, other: &Type) -> bool {
    match (self, other) {
      (Type::Tensor { elem: a, shape: s }, Type::Tensor { elem: b, shape: t }) => a == b && s.is_subshape_of(t),
      (Type::Sequence(a), Type::Sequence(b)) | (Type::Optional(a), Type::Optional(b)) => a.is_subtype_of(b),
      _ => false,
    }
  }

  /// Common supertype of two types, as needed to merge the outputs of branches.
  pub fn unify(&self, other: &Type) -> Result<Type, InferenceError> {
    if self.is_subtype_of(other) {
      return Ok(other.clone());
    }
    if other.is_subtype_of(self) {
      return Ok(self.clone());
    }
    match (self, other) {
      (Type::Tensor { elem: a, shape: s }, Type::Tensor { elem: b, shape: t }) => {
        if a != b {
          return Err(InferenceError::types(format!(
            "cannot unify element kinds {} and {}",
            a, b
          )));
        }
        let shape = s
          .unify(t)
          .ok_or_else(|| InferenceError::types(format!("cannot unify ranks of {} and {}", s, t)))?;
        Ok(Type::Tensor { elem: *a, shape })
      }
      (Type::Sequence(a), Type::Sequence(b)) => Ok(Type::sequence(a.unify(b)?)),
      (Type::Optional(a), Type::Optional(b)) => Ok(Type::optional(a.unify(b)?)),
      (a, b) => Err(InferenceError::types(format!("cannot unify {} and {}", a, b))),
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::Tensor { elem, shape } => write!(f, "Tensor<{}>{}", elem, shape),
      Type::Sequence(elem) => write!(f, "Sequence<{}>", elem),
      Type::Optional(elem) => write!(f, "Optional<{}>", elem),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn tensor(dims: Vec<Dim>) -> Type {
    Type::tensor(ElemKind::Float32, dims)
  }

  #[test]
  fn test_structural_equality() {
    let a = tensor(vec![Dim::Unknown, Dim::Fixed(5), "N".into()]);
    let b = tensor(vec![Dim::Unknown, Dim::Fixed(5), "N".into()]);
    assert_eq!(a, b);
    assert_ne!(a, tensor(vec![Dim::Unknown, Dim::Fixed(5), "M".into()]));
    assert_ne!(a, Type::tensor(ElemKind::Float64, Shape::new(vec![Dim::Unknown, Dim::Fixed(5), "N".into()])));
    assert_ne!(Type::sequence(a.clone()), Type::optional(a));
  }

  #[test]
  fn test_subtyping() {
    let fixed = tensor(vec![Dim::Fixed(2), Dim::Fixed(3)]);
    let symbolic = tensor(vec!["N".into(), Dim::Fixed(3)]);
    let unknown = tensor(vec![Dim::Unknown, Dim::Unknown]);
    let any_rank = Type::tensor(ElemKind::Float32, Shape::unknown());
    assert!(fixed.is_subtype_of(&symbolic));
    assert!(symbolic.is_subtype_of(&unknown));
    assert!(unknown.is_subtype_of(&any_rank));
    assert!(!any_rank.is_subtype_of(&fixed));
    assert!(!symbolic.is_subtype_of(&fixed));
    assert!(!fixed.is_subtype_of(&tensor(vec![Dim::Fixed(2)])));
    assert!(Type::sequence(fixed.clone()).is_subtype_of(&Type::sequence(unknown)));
    assert!(!Type::sequence(fixed.clone()).is_subtype_of(&Type::optional(fixed)));
  }

  #[test]
  fn test_unify_branches() {
    let a = tensor(vec![Dim::Fixed(2), Dim::Fixed(3)]);
    let b = tensor(vec![Dim::Fixed(4), Dim::Fixed(3)]);
    assert_eq!(a.unify(&b).unwrap(), tensor(vec![Dim::Unknown, Dim::Fixed(3)]));
    let n = tensor(vec!["N".into(), Dim::Fixed(3)]);
    assert_eq!(a.unify(&n).unwrap(), n);
    let m = tensor(vec!["M".into(), Dim::Fixed(3)]);
    assert_eq!(n.unify(&m).unwrap(), tensor(vec![Dim::Unknown, Dim::Fixed(3)]));
  }

  #[test]
  fn test_unify_rejects_mismatches() {
    let a = tensor(vec![Dim::Fixed(2)]);
    assert!(a.unify(&tensor(vec![Dim::Fixed(2), Dim::Fixed(2)])).is_err());
    assert!(a.unify(&Type::tensor(ElemKind::Int64, Shape::fixed(&[2]))).is_err());
    assert!(a.unify(&Type::sequence(a.clone())).is_err());
  }

  #[test]
  fn test_broadcast() {
    let a = Shape::new(vec![Dim::from("N"), Dim::Fixed(1), Dim::Fixed(3)]);
    let b = Shape::fixed(&[4, 3]);
    assert_eq!(a.broadcast(&b).unwrap(), Shape::new(vec![Dim::from("N"), Dim::Fixed(4), Dim::Fixed(3)]));
    assert_eq!(Shape::scalar().broadcast(&b).unwrap(), b);
    assert!(Shape::fixed(&[2]).broadcast(&Shape::fixed(&[3])).is_err());
    assert_eq!(Shape::unknown().broadcast(&b).unwrap(), Shape::unknown());
  }

  fn dim() -> impl Strategy<Value = Dim> {
    prop_oneof![
      (1u64..6).prop_map(Dim::Fixed),
      prop::sample::select(vec!["N", "M"]).prop_map(Dim::from),
      Just(Dim::Unknown),
    ]
  }

  /// A type together with a supertype obtained by forgetting some constraints.
  fn type_and_supertype() -> impl Strategy<Value = (Type, Type)> {
    (prop::collection::vec((dim(), 0u8..4), 0..4), any::<bool>()).prop_map(|(dims, forget_rank)| {
      let sub: Vec<Dim> = dims.iter().map(|(d, _)| d.clone()).collect();
      let sup: Vec<Dim> = dims
        .iter()
        .map(|(d, how)| match (d, how) {
          (Dim::Fixed(_), 0) => Dim::from("S"),
          (_, 1) => Dim::Unknown,
          _ => d.clone(),
        })
        .collect();
      let sup = if forget_rank { Shape::unknown() } else { Shape::from(sup) };
      (
        Type::tensor(ElemKind::Int64, sub),
        Type::tensor(ElemKind::Int64, sup),
      )
    })
  }

  proptest! {
    #[test]
    fn test_unify_yields_supertype((sub, sup) in type_and_supertype()) {
      prop_assert!(sub.is_subtype_of(&sup));
      prop_assert_eq!(sub.unify(&sup).unwrap(), sup.clone());
      prop_assert_eq!(sup.unify(&sub).unwrap(), sup.clone());
      prop_assert!(sub.is_subtype_of(&sub));
    }
  }
}
