//! A small interpreter over emitted models, used for value propagation and for
//! running graphs end to end.

mod kernels;

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, instrument, trace};

use crate::{
  error::EvalError,
  model::{EmittedGraph, EmittedNode, Model, ValidationLevel},
  propagate::Evaluator,
  value::NativeValue,
};

pub const DEFAULT_MAX_ITERATIONS: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct ReferenceEvaluator {
  /// Loops running longer than this fail instead of hanging construction.
  pub max_iterations: usize,
}

impl Default for ReferenceEvaluator {
  fn default() -> Self {
    ReferenceEvaluator {
      max_iterations: DEFAULT_MAX_ITERATIONS,
    }
  }
}

/// Values bound in one scope; lookups fall through to the enclosing frames.
struct Frame<'p> {
  values: HashMap<String, NativeValue>,
  parent: Option<&'p Frame<'p>>,
}

impl Frame<'_> {
  fn lookup(&self, name: &str) -> Option<&NativeValue> {
    match self.values.get(name) {
      Some(value) => Some(value),
      None => self.parent.and_then(|p| p.lookup(name)),
    }
  }
}

impl ReferenceEvaluator {
  pub fn new(max_iterations: usize) -> Self {
    ReferenceEvaluator { max_iterations }
  }

  /// Runs `graph` with `inputs` bound positionally to its declared inputs.
  fn run_graph(
    &self,
    graph: &EmittedGraph,
    inputs: Vec<NativeValue>,
    parent: Option<&Frame>,
  ) -> Result<Vec<NativeValue>, EvalError> {
    if inputs.len() != graph.inputs.len() {
      return Err(EvalError::kernel(
        &graph.name,
        format!("expected {} inputs, got {}", graph.inputs.len(), inputs.len()),
      ));
    }
    let mut frame = Frame {
      values: graph.inputs.iter().map(|i| i.name.clone()).zip(inputs).collect(),
      parent,
    };
    for node in &graph.nodes {
      let args = node
        .inputs
        .iter()
        .map(|name| match name.as_str() {
          "" => Ok(None),
          name => frame
            .lookup(name)
            .cloned()
            .map(Some)
            .ok_or_else(|| EvalError::UndefinedValue(name.to_string())),
        })
        .collect::<Result<Vec<_>, _>>()?;
      let outputs = self.node(node, args, &frame)?;
      if outputs.len() != node.outputs.len() {
        return Err(EvalError::kernel(
          &node.op_type,
          format!("produced {} outputs for {} names", outputs.len(), node.outputs.len()),
        ));
      }
      trace!("{} done", node.name);
      frame.values.extend(node.outputs.iter().cloned().zip(outputs));
    }
    graph
      .outputs
      .iter()
      .map(|result| {
        frame
          .lookup(&result.value)
          .cloned()
          .ok_or_else(|| EvalError::UndefinedValue(result.value.clone()))
      })
      .collect()
  }

  fn node(&self, node: &EmittedNode, args: Vec<Option<NativeValue>>, frame: &Frame) -> Result<Vec<NativeValue>, EvalError> {
    match (node.domain.as_str(), node.op_type.as_str()) {
      ("", "If") => self.run_if(node, &args, frame),
      ("", "Loop") => self.run_loop(node, args, frame),
      _ => kernels::run(node, args),
    }
  }

  fn run_if(&self, node: &EmittedNode, args: &[Option<NativeValue>], frame: &Frame) -> Result<Vec<NativeValue>, EvalError> {
    let cond = kernels::condition(node, args.first().and_then(Option::as_ref))?;
    let branch = if cond { "then_branch" } else { "else_branch" };
    let graph = node
      .subgraph(branch)
      .ok_or_else(|| EvalError::kernel(&node.op_type, format!("missing {}", branch)))?;
    self.run_graph(graph, Vec::new(), Some(frame))
  }

  fn run_loop(&self, node: &EmittedNode, args: Vec<Option<NativeValue>>, frame: &Frame) -> Result<Vec<NativeValue>, EvalError> {
    let op = node.op_type.as_str();
    let body = node
      .subgraph("body")
      .ok_or_else(|| EvalError::kernel(op, "missing body"))?;
    let mut args = args.into_iter();
    let trip_count = match args.next().flatten() {
      Some(m) => Some(kernels::scalar_i64(op, &m)?),
      None => None,
    };
    let mut cond = match args.next().flatten() {
      Some(c) => kernels::condition(node, Some(&c))?,
      None => true,
    };
    let mut carried = args
      .map(|v| v.ok_or_else(|| EvalError::kernel(op, "carried value is absent")))
      .collect::<Result<Vec<_>, _>>()?;
    let scan_count = body
      .outputs
      .len()
      .checked_sub(1 + carried.len())
      .ok_or_else(|| EvalError::kernel(op, "body returns too few values"))?;
    let carried_count = carried.len();
    let mut scans: Vec<Vec<NativeValue>> = vec![Vec::new(); scan_count];

    let mut i: i64 = 0;
    while cond && trip_count.map_or(true, |m| i < m) {
      if i as usize >= self.max_iterations {
        return Err(EvalError::IterationLimit(self.max_iterations));
      }
      let mut inputs = vec![
        NativeValue::Array(vec![i].into()),
        NativeValue::Array(vec![cond].into()),
      ];
      inputs.append(&mut carried);
      let mut outputs = self.run_graph(body, inputs, Some(frame))?.into_iter();
      cond = kernels::condition(node, outputs.next().as_ref())?;
      carried = outputs.by_ref().take(carried_count).collect();
      for (scan, value) in scans.iter_mut().zip(outputs) {
        scan.push(value);
      }
      i += 1;
    }
    debug!("{} ran {} iterations", node.name, i);

    let scan_types = &body.outputs[body.outputs.len() - scan_count..];
    let mut outputs = carried;
    for (values, binding) in scans.into_iter().zip(scan_types) {
      outputs.push(kernels::stack(op, values, &binding.ty)?);
    }
    Ok(outputs)
  }
}

impl Evaluator for ReferenceEvaluator {
  fn name(&self) -> &str {
    "reference"
  }

  #[instrument(level = "debug", skip_all, fields(graph = %model.graph.name))]
  fn run(
    &self,
    model: &Model,
    inputs: &BTreeMap<String, NativeValue>,
    validation: ValidationLevel,
  ) -> Result<BTreeMap<String, NativeValue>, EvalError> {
    model.validate(validation)?;
    let graph = &model.graph;
    let bound = graph
      .inputs
      .iter()
      .map(|input| match inputs.get(&input.name) {
        Some(value) if value.is_well_formed() => Ok(value.clone()),
        Some(_) => Err(EvalError::MalformedInput(input.name.clone())),
        None => Err(EvalError::MissingInput(input.name.clone())),
      })
      .collect::<Result<Vec<_>, _>>()?;
    let outputs = self.run_graph(graph, bound, None)?;
    Ok(graph.outputs.iter().map(|r| r.name.clone()).zip(outputs).collect())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    context::Context,
    error::Error,
    graph::Graph,
    ops::{self, ml},
    propagate::PropagationConfig,
    types::{Dim, ElemKind, Shape, Type},
    utils::init_logging_tests,
    value::{TensorData, TensorValue, Value},
  };

  fn tensor(shape: Vec<usize>, data: TensorData) -> Value {
    Value::Tensor(TensorValue::new(shape, data).unwrap())
  }

  #[test]
  fn test_evaluates_broadcast_arithmetic() {
    let _guard = init_logging_tests();
    let cx = Context::new();
    let a = cx.argument("a", Type::tensor(ElemKind::Float64, Shape::fixed(&[2, 1])));
    let b = cx.argument("b", Type::tensor(ElemKind::Float64, Shape::fixed(&[3])));
    let c = ops::mul(&cx, &a, &b).unwrap();
    let graph = Graph::new([("c", c)]).unwrap();
    let out = graph
      .evaluate(
        &ReferenceEvaluator::default(),
        &[
          ("a", tensor(vec![2, 1], TensorData::Float64(vec![1.0, 2.0]))),
          ("b", tensor(vec![3], TensorData::Float64(vec![1.0, 2.0, 3.0]))),
        ],
      )
      .unwrap();
    assert_eq!(
      out["c"],
      tensor(vec![2, 3], TensorData::Float64(vec![1.0, 2.0, 3.0, 2.0, 4.0, 6.0]))
    );
  }

  #[test]
  fn test_missing_input_is_reported() {
    let cx = Context::new();
    let a = cx.argument("a", Type::scalar(ElemKind::Int64));
    let b = ops::add(&cx, &a, &a).unwrap();
    let out = Graph::new([("b", b)]).unwrap().evaluate(&ReferenceEvaluator::default(), &[]);
    assert!(matches!(out, Err(Error::Evaluation(EvalError::MissingInput(name))) if name == "a"));
  }

  #[test]
  fn test_unbounded_loop_hits_iteration_limit() {
    let cx = Context::new();
    let zero = ops::constant(&cx, 0i64).unwrap();
    let outs = ops::loop_(&cx, None, None, &[zero], |_, args| Ok(vec![args[1].clone(), args[2].clone()])).unwrap();
    let graph = Graph::new([("x", outs[0].clone())]).unwrap();
    let out = graph.evaluate(&ReferenceEvaluator::new(10), &[]);
    assert!(matches!(out, Err(Error::Evaluation(EvalError::IterationLimit(10)))));
  }

  #[test]
  fn test_zero_iteration_scan_keeps_rank() {
    let cx = Context::new();
    let m = cx.argument("m", Type::tensor(ElemKind::Int64, Shape::fixed(&[1])));
    let x = cx.argument("x", Type::tensor(ElemKind::Float32, Shape::new(vec![Dim::Unknown])));
    let outs = ops::loop_(&cx, Some(&m), None, &[], |cx, _| Ok(vec![ops::constant(cx, true)?, x.clone()])).unwrap();
    let graph = Graph::new([("xs", outs[0].clone())]).unwrap();
    let run = |trips: i64| {
      graph
        .evaluate(
          &ReferenceEvaluator::default(),
          &[
            ("m", Value::from(TensorValue::from(vec![trips]))),
            ("x", tensor(vec![2], TensorData::Float32(vec![1.0, 2.0]))),
          ],
        )
        .unwrap()
    };
    assert_eq!(run(0)["xs"], tensor(vec![0, 0], TensorData::Float32(vec![])));
    assert_eq!(run(2)["xs"], tensor(vec![2, 2], TensorData::Float32(vec![1.0, 2.0, 1.0, 2.0])));
  }

  #[test]
  fn test_malformed_inputs_are_rejected() {
    let cx = Context::new();
    let x = cx.argument("x", Type::tensor(ElemKind::Int64, Shape::fixed(&[3])));
    let y = ops::add(&cx, &x, &x).unwrap();
    let graph = Graph::new([("y", y)]).unwrap();
    let short = TensorValue {
      shape: vec![3],
      data: TensorData::Int64(vec![1]),
    };
    let out = graph.evaluate(&ReferenceEvaluator::default(), &[("x", Value::Tensor(short.clone()))]);
    assert!(matches!(out, Err(Error::Value(_))));

    let model = graph.emit(ValidationLevel::Structure).unwrap();
    let feeds = BTreeMap::from([("x".to_string(), NativeValue::Array(short))]);
    let out = ReferenceEvaluator::default().run(&model, &feeds, ValidationLevel::None);
    assert!(matches!(out, Err(EvalError::MalformedInput(name)) if name == "x"));

    let wrong_kind = graph.evaluate(&ReferenceEvaluator::default(), &[("x", Value::from(TensorValue::from(vec![1.0f32, 2.0, 3.0])))]);
    assert!(matches!(wrong_kind, Err(Error::Value(_))));
  }

  #[test]
  fn test_unknown_input_name_is_reported() {
    let cx = Context::new();
    let x = cx.argument("x", Type::scalar(ElemKind::Int64));
    let y = ops::add(&cx, &x, &x).unwrap();
    let out = Graph::new([("y", y)]).unwrap().evaluate(
      &ReferenceEvaluator::default(),
      &[("x", TensorValue::from(1i64).into()), ("z", TensorValue::from(2i64).into())],
    );
    assert!(matches!(out, Err(Error::Evaluation(EvalError::UnknownInput(name))) if name == "z"));
  }

  #[test]
  fn test_loop_with_trip_count_and_scan() {
    let cx = Context::new();
    let m = ops::constant(&cx, vec![3i64]).unwrap();
    let one = ops::constant(&cx, vec![1i64]).unwrap();
    let outs = ops::loop_(&cx, Some(&m), None, &[one], |cx, args| {
      let doubled = ops::add(cx, &args[2], &args[2])?;
      Ok(vec![args[1].clone(), doubled, args[0].clone()])
    })
    .unwrap();
    let graph = Graph::new([("x", outs[0].clone()), ("its", outs[1].clone())]).unwrap();
    let out = graph.evaluate(&ReferenceEvaluator::default(), &[]).unwrap();
    assert_eq!(out["x"], tensor(vec![1], TensorData::Int64(vec![8])));
    assert_eq!(out["its"], tensor(vec![3, 1], TensorData::Int64(vec![0, 1, 2])));
  }

  #[test]
  fn test_if_reads_enclosing_values() {
    let cx = Context::new();
    let b = cx.argument("b", Type::scalar(ElemKind::Bool));
    let x = cx.argument("x", Type::scalar(ElemKind::Int32));
    let out = ops::if_(
      &cx,
      &b,
      |cx, _| Ok(vec![ops::add(cx, &x, &x)?]),
      |cx, _| Ok(vec![ops::mul(cx, &x, &x)?]),
    )
    .unwrap();
    let graph = Graph::new([("y", out[0].clone())]).unwrap();
    let run = |cond: bool| {
      graph
        .evaluate(
          &ReferenceEvaluator::default(),
          &[("b", TensorValue::from(cond).into()), ("x", TensorValue::from(5i32).into())],
        )
        .unwrap()
    };
    assert_eq!(run(true)["y"], Value::from(TensorValue::from(10i32)));
    assert_eq!(run(false)["y"], Value::from(TensorValue::from(25i32)));
  }

  #[test]
  fn test_imputer_kernel() {
    let cx = Context::new();
    let x = cx.argument("x", Type::tensor(ElemKind::Int64, Shape::fixed(&[2, 2])));
    let y = ml::imputer_ints(&cx, &x, vec![10, 20], Some(999)).unwrap();
    let out = Graph::new([("y", y)])
      .unwrap()
      .evaluate(
        &ReferenceEvaluator::default(),
        &[("x", tensor(vec![2, 2], TensorData::Int64(vec![1, 999, 999, 4])))],
      )
      .unwrap();
    assert_eq!(out["y"], tensor(vec![2, 2], TensorData::Int64(vec![1, 20, 10, 4])));
  }

  #[test]
  fn test_label_encoder_kernel() {
    let cx = Context::new();
    let keys = ops::constant_attribute(&cx, "value_ints", crate::op::Attribute::Ints(vec![1, 2, 3])).unwrap();
    let labels = ml::label_encoder(
      &cx,
      &keys,
      ml::Labels::Ints(vec![0, 1, 2]),
      ml::Labels::Strings(vec!["a".into(), "b".into(), "c".into()]),
      Some(crate::op::Attribute::String("?".into())),
    )
    .unwrap();
    let out = Graph::new([("labels", labels)])
      .unwrap()
      .evaluate(&ReferenceEvaluator::default(), &[])
      .unwrap();
    assert_eq!(
      out["labels"],
      tensor(vec![3], TensorData::String(vec!["b".into(), "c".into(), "?".into()]))
    );
  }

  #[test]
  fn test_normalizer_has_no_kernel() {
    let cx = Context::new();
    let x = cx.argument("x", Type::tensor(ElemKind::Float32, Shape::fixed(&[1, 2])));
    let y = ml::normalizer(&cx, &x, "L1").unwrap();
    let out = Graph::new([("y", y)])
      .unwrap()
      .evaluate(&ReferenceEvaluator::default(), &[("x", tensor(vec![1, 2], TensorData::Float32(vec![1.0, 3.0])))]);
    assert!(matches!(out, Err(Error::Evaluation(EvalError::Unsupported(_)))));
  }

  #[test]
  fn test_sequences_and_optionals() {
    let cx = Context::new();
    let x = cx.argument("x", Type::tensor(ElemKind::Int64, Shape::fixed(&[2])));
    let y = cx.argument("y", Type::tensor(ElemKind::Int64, Shape::fixed(&[1])));
    let seq = ops::sequence_empty(&cx, ElemKind::Int64).unwrap();
    let seq = ops::sequence_insert(&cx, &seq, &x, None).unwrap();
    let front = ops::constant(&cx, 0i64).unwrap();
    let seq = ops::sequence_insert(&cx, &seq, &y, Some(&front)).unwrap();
    let last = ops::constant(&cx, -1i64).unwrap();
    let at = ops::sequence_at(&cx, &seq, &last).unwrap();
    let len = ops::sequence_length(&cx, &seq).unwrap();
    let empty = ops::optional(&cx, None, Some(x.ty().clone())).unwrap();
    let has = ops::optional_has_element(&cx, &empty).unwrap();
    let graph = Graph::new([("at", at), ("len", len), ("has", has), ("seq", seq)]).unwrap();
    let x_value = tensor(vec![2], TensorData::Int64(vec![1, 2]));
    let y_value = tensor(vec![1], TensorData::Int64(vec![3]));
    let out = graph
      .evaluate(
        &ReferenceEvaluator::default(),
        &[("x", x_value.clone()), ("y", y_value.clone())],
      )
      .unwrap();
    assert_eq!(out["at"], x_value);
    assert_eq!(out["len"], Value::from(TensorValue::from(2i64)));
    assert_eq!(out["has"], Value::from(TensorValue::from(false)));
    assert_eq!(out["seq"], Value::Sequence(vec![y_value, x_value]));
  }

  #[test]
  fn test_propagation_folds_constants() {
    let config = PropagationConfig::new(Arc::new(ReferenceEvaluator::default()));
    let cx = Context::with_propagation(config);
    let a = ops::constant(&cx, vec![1i64, 2]).unwrap();
    let b = ops::constant(&cx, 3i64).unwrap();
    let c = ops::mul(&cx, &a, &b).unwrap();
    assert_eq!(c.value(), Some(&Value::from(TensorValue::from(vec![3i64, 6]))));

    let x = cx.argument("x", Type::scalar(ElemKind::Int64));
    let d = ops::add(&cx, &x, &b).unwrap();
    assert_eq!(d.value(), None);

    let zero = ops::constant(&cx, 0i64).unwrap();
    let failed = ops::div(&cx, &b, &zero).unwrap();
    assert_eq!(failed.value(), None);
  }

  #[test]
  fn test_propagation_through_loop() {
    let cx = Context::with_propagation(PropagationConfig::new(Arc::new(ReferenceEvaluator::default())));
    let m = ops::constant(&cx, vec![4i64]).unwrap();
    let zero = ops::constant(&cx, vec![0i64]).unwrap();
    let outs = ops::loop_(&cx, Some(&m), None, &[zero], |cx, args| {
      Ok(vec![args[1].clone(), ops::add(cx, &args[2], &args[0])?])
    })
    .unwrap();
    assert_eq!(outs[0].value(), Some(&Value::from(TensorValue::from(vec![6i64]))));
  }
}
