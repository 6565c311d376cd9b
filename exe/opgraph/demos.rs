use opgraph::{
  op::Attribute,
  ops::{self, ml},
  results, Context, Dim, ElemKind, Graph, Result, Shape, TensorData, TensorValue, Type,
};

/// A named graph builder the CLI can emit or run.
pub struct Demo {
  pub name: &'static str,
  pub about: &'static str,
  pub build: fn(&Context) -> Result<Graph>,
}

pub fn all() -> Vec<Demo> {
  vec![
    Demo {
      name: "loop-sum",
      about: "sums 0..=e in a Loop and scans the counter",
      build: loop_sum,
    },
    Demo {
      name: "branches",
      about: "nested If reading outer arguments",
      build: branches,
    },
    Demo {
      name: "imputer",
      about: "ai.onnx.ml Imputer over a feature matrix",
      build: imputer,
    },
    Demo {
      name: "labels",
      about: "ai.onnx.ml LabelEncoder from int64 ids to names",
      build: labels,
    },
    Demo {
      name: "sequence",
      about: "builds a sequence and reads it back",
      build: sequence,
    },
  ]
}

pub fn find(name: &str) -> Option<Demo> {
  all().into_iter().find(|d| d.name == name)
}

fn vector(elem: ElemKind) -> Type {
  Type::tensor(elem, Shape::from(vec![Dim::Unknown]))
}

fn loop_sum(cx: &Context) -> Result<Graph> {
  let e = cx.argument("e", Type::scalar(ElemKind::Int64));
  let zero = ops::constant(cx, vec![0.0f32])?;
  let outs = ops::loop_(cx, None, None, &[zero], |cx, args| {
    let (iter_num, carry_in) = (&args[0], &args[2]);
    let cond = ops::less(cx, iter_num, &e)?;
    let step = ops::cast(cx, iter_num, ElemKind::Float32)?;
    Ok(vec![cond, ops::add(cx, carry_in, &step)?, iter_num.clone()])
  })?;
  let scalar_shape = ops::constant(
    cx,
    TensorValue {
      shape: vec![0],
      data: TensorData::Int64(Vec::new()),
    },
  )?;
  let total = ops::reshape(cx, &outs[0], &scalar_shape)?;
  let last = ops::constant(cx, vec![-1i64])?;
  let counters = ops::squeeze(cx, &outs[1], Some(&last))?;
  Ok(results([("total", total), ("counters", counters)])?.named("loop_sum"))
}

fn branches(cx: &Context) -> Result<Graph> {
  let b = cx.argument("b", Type::scalar(ElemKind::Bool));
  let c = cx.argument("c", Type::scalar(ElemKind::Bool));
  let x = cx.argument("x", vector(ElemKind::Float32));
  let y = cx.argument("y", vector(ElemKind::Float32));
  let r = ops::if_(
    cx,
    &b,
    |cx, _| ops::if_(cx, &c, |cx, _| Ok(vec![ops::add(cx, &x, &y)?]), |_, _| Ok(vec![y.clone()])),
    |_, _| Ok(vec![y.clone()]),
  )?;
  let r = ops::add(cx, &r[0], &x)?;
  Ok(results([("r", r)])?.named("branches"))
}

fn imputer(cx: &Context) -> Result<Graph> {
  let x = cx.argument("x", Type::tensor(ElemKind::Float32, Shape::from(vec![Dim::from("N"), Dim::Fixed(3)])));
  let filled = ml::imputer_floats(cx, &x, vec![0.5, 1.5, 2.5], Some(-1.0))?;
  Ok(results([("filled", filled)])?.named("imputer"))
}

fn labels(cx: &Context) -> Result<Graph> {
  let ids = cx.argument("ids", vector(ElemKind::Int64));
  let names = ml::label_encoder(
    cx,
    &ids,
    ml::Labels::Ints(vec![0, 1, 2]),
    ml::Labels::Strings(vec!["a".into(), "b".into(), "c".into()]),
    Some(Attribute::String("?".into())),
  )?;
  Ok(results([("names", names)])?.named("labels"))
}

fn sequence(cx: &Context) -> Result<Graph> {
  let x = cx.argument("x", vector(ElemKind::Int64));
  let seq = ops::sequence_empty(cx, ElemKind::Int64)?;
  let seq = ops::sequence_insert(cx, &seq, &x, None)?;
  let doubled = ops::add(cx, &x, &x)?;
  let seq = ops::sequence_insert(cx, &seq, &doubled, None)?;
  let last = ops::constant(cx, -1i64)?;
  let at = ops::sequence_at(cx, &seq, &last)?;
  let len = ops::sequence_length(cx, &seq)?;
  Ok(results([("last", at), ("len", len)])?.named("sequence"))
}
