use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools;

use super::{Plan, ScopeKey};
use crate::{
  error::StructuralError,
  model::{EmittedGraph, EmittedNode, Model, NamedGraph, ResultBinding, ValueInfo},
  op::{Attributes, OpId},
  var::{Var, VarKey},
};

/// Operator used to give a captured value its own identity inside a subgraph.
const ALIAS: OpId = OpId::onnx("Identity", 1);

/// Hands out unique value names, preferring the hint itself.
#[derive(Default)]
struct Namer {
  used: HashSet<String>,
  counters: HashMap<String, usize>,
}

impl Namer {
  fn reserve(&mut self, name: &str) -> bool {
    self.used.insert(name.to_string())
  }

  fn fresh(&mut self, hint: &str) -> String {
    let counter = self.counters.entry(hint.to_string()).or_insert(0);
    loop {
      let candidate = if *counter == 0 {
        hint.to_string()
      } else {
        format!("{}_{}", hint, counter)
      };
      *counter += 1;
      if self.used.insert(candidate.clone()) {
        return candidate;
      }
    }
  }
}

fn snake_case(name: &str) -> String {
  let mut out = String::with_capacity(name.len() + 4);
  for (i, c) in name.chars().enumerate() {
    if c.is_uppercase() && i > 0 {
      out.push('_');
    }
    out.extend(c.to_lowercase());
  }
  out
}

struct Emitter<'p> {
  plan: &'p Plan,
  names: Namer,
  bound: HashMap<VarKey, String>,
  node_count: usize,
  opsets: BTreeMap<String, u32>,
}

impl<'p> Emitter<'p> {
  fn name_of(&self, var: &Var) -> Result<String, StructuralError> {
    self.bound.get(&var.key()).cloned().ok_or_else(|| StructuralError::DanglingCapture {
      var: var.to_string(),
    })
  }

  fn node_name(&mut self, op: &str) -> String {
    self.node_count += 1;
    format!("{}_{}", op, self.node_count)
  }

  fn note_opset(&mut self, op: OpId) {
    let version = self.opsets.entry(op.domain.to_string()).or_insert(op.version);
    *version = (*version).max(op.version);
  }

  fn scope(
    &mut self,
    key: ScopeKey,
    name: String,
    inputs: Vec<ValueInfo>,
    results: &[(String, Var)],
  ) -> Result<EmittedGraph, StructuralError> {
    let plan = self.plan;
    let captures = plan
      .captures_of(key)
      .iter()
      .map(|v| self.name_of(v).map(|name| ValueInfo::new(name, v.ty())))
      .collect::<Result<Vec<_>, StructuralError>>()?;
    let mut nodes = Vec::new();
    let mut value_info = Vec::new();

    for node in plan.nodes_in(key) {
      let op = node.op_id();
      self.note_opset(op);
      let node_name = self.node_name(op.name);
      let inputs = node
        .inputs()
        .iter()
        .map(|input| match input {
          Some(var) => self.name_of(var),
          None => Ok(String::new()),
        })
        .collect::<Result<Vec<_>, _>>()?;

      let mut subgraphs = Vec::new();
      for body in node.bodies() {
        let mut body_inputs = Vec::new();
        for arg in body.arguments() {
          let arg_name = self.names.fresh(arg.name().unwrap_or("arg"));
          self.bound.insert(arg.key(), arg_name.clone());
          body_inputs.push(ValueInfo::new(arg_name, arg.ty()));
        }
        let body_results = body
          .results()
          .iter()
          .enumerate()
          .map(|(i, v)| (format!("{}_{}", body.name(), i), v.clone()))
          .collect_vec();
        let graph = self.scope(
          ScopeKey::Body(body.scope()),
          format!("{}_{}", node_name, body.name()),
          body_inputs,
          &body_results,
        )?;
        subgraphs.push(NamedGraph {
          attribute: body.name().to_string(),
          graph,
        });
      }

      let hint = snake_case(op.name);
      let mut outputs = Vec::new();
      for slot in 0..node.output_count() {
        let value = self.names.fresh(&hint);
        self.bound.insert(VarKey::Output(node.id(), slot), value.clone());
        value_info.push(ValueInfo::new(value.clone(), node.output_type(slot)));
        outputs.push(value);
      }
      nodes.push(EmittedNode {
        name: node_name,
        domain: op.domain.to_string(),
        op_type: op.name.to_string(),
        attributes: node.attributes().clone(),
        inputs,
        outputs,
        subgraphs,
      });
    }

    // results not produced here get one local alias each, however often they repeat
    let mut aliases: HashMap<VarKey, String> = HashMap::new();
    let mut outputs = Vec::new();
    for (result, var) in results {
      let value = if plan.is_local(var, key) {
        self.name_of(var)?
      } else if let Some(alias) = aliases.get(&var.key()) {
        alias.clone()
      } else {
        let source = self.name_of(var)?;
        let alias = self.names.fresh(&format!("{}_alias", source));
        self.note_opset(ALIAS);
        nodes.push(EmittedNode {
          name: self.node_name(ALIAS.name),
          domain: ALIAS.domain.to_string(),
          op_type: ALIAS.name.to_string(),
          attributes: Attributes::new(),
          inputs: vec![source],
          outputs: vec![alias.clone()],
          subgraphs: Vec::new(),
        });
        value_info.push(ValueInfo::new(alias.clone(), var.ty()));
        aliases.insert(var.key(), alias.clone());
        alias
      };
      outputs.push(ResultBinding {
        name: result.clone(),
        value,
        ty: var.ty().clone(),
      });
    }

    Ok(EmittedGraph {
      name,
      inputs,
      captures,
      nodes,
      value_info,
      outputs,
    })
  }
}

/// Names every value and assembles the nested model. Top-level argument names
/// are kept as given.
pub(crate) fn emit(plan: &Plan, name: &str) -> Result<Model, StructuralError> {
  let mut emitter = Emitter {
    plan,
    names: Namer::default(),
    bound: HashMap::new(),
    node_count: 0,
    opsets: BTreeMap::new(),
  };
  let mut inputs = Vec::new();
  for (arg_name, var) in &plan.arguments {
    if !emitter.names.reserve(arg_name) {
      return Err(StructuralError::DuplicateName(arg_name.clone()));
    }
    emitter.bound.insert(var.key(), arg_name.clone());
    inputs.push(ValueInfo::new(arg_name.clone(), var.ty()));
  }
  let graph = emitter.scope(ScopeKey::Root, name.to_string(), inputs, &plan.results)?;
  Ok(Model::new(emitter.opsets, graph))
}
