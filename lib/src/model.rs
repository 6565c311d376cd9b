use std::{
  collections::{BTreeMap, HashMap, HashSet},
  error::Error,
  fmt,
  fs::File,
  io::Write,
  path::Path,
  str::FromStr,
};

use petgraph::{dot::Dot, graph::NodeIndex, Graph as PetGraph};
use serde::{Deserialize, Serialize};

use crate::{error::StructuralError, op::Attributes, types::Type};

pub const PRODUCER: &str = "opgraph";

/// How much checking emission (and the evaluator) performs on a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
  #[default]
  None,
  /// Name resolution and scoping.
  Structure,
  /// Structure plus recorded types of every value.
  Types,
}

impl FromStr for ValidationLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "none" | "0" => Ok(ValidationLevel::None),
      "structure" | "1" => Ok(ValidationLevel::Structure),
      "types" | "2" => Ok(ValidationLevel::Types),
      other => Err(format!("unknown validation level `{}`", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
  pub name: String,
  pub ty: Type,
}

impl ValueInfo {
  pub fn new(name: impl Into<String>, ty: &Type) -> Self {
    ValueInfo {
      name: name.into(),
      ty: ty.clone(),
    }
  }
}

/// A graph result: the public `name` is bound to the value called `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBinding {
  pub name: String,
  pub value: String,
  pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedGraph {
  pub attribute: String,
  pub graph: EmittedGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedNode {
  pub name: String,
  pub domain: String,
  pub op_type: String,
  pub attributes: Attributes,
  /// Empty string marks an absent optional input.
  pub inputs: Vec<String>,
  pub outputs: Vec<String>,
  pub subgraphs: Vec<NamedGraph>,
}

impl EmittedNode {
  pub fn subgraph(&self, attribute: &str) -> Option<&EmittedGraph> {
    self
      .subgraphs
      .iter()
      .find(|s| s.attribute == attribute)
      .map(|s| &s.graph)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedGraph {
  pub name: String,
  pub inputs: Vec<ValueInfo>,
  /// Outer values read by this graph or by graphs nested in it.
  pub captures: Vec<ValueInfo>,
  pub nodes: Vec<EmittedNode>,
  pub value_info: Vec<ValueInfo>,
  pub outputs: Vec<ResultBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
  pub producer: String,
  /// Highest operator version used per domain.
  pub opset_imports: BTreeMap<String, u32>,
  pub graph: EmittedGraph,
}

type Frames<'g> = Vec<HashMap<&'g str, Option<&'g Type>>>;

fn lookup<'g>(frames: &Frames<'g>, name: &str) -> Option<Option<&'g Type>> {
  frames.iter().rev().find_map(|frame| frame.get(name).copied())
}

fn invalid(message: String) -> StructuralError {
  StructuralError::Validation(message)
}

fn check_graph<'g>(
  graph: &'g EmittedGraph,
  level: ValidationLevel,
  frames: &mut Frames<'g>,
  defined: &mut HashSet<&'g str>,
) -> Result<(), StructuralError> {
  for capture in &graph.captures {
    if lookup(frames, &capture.name).is_none() {
      return Err(invalid(format!(
        "{}: capture `{}` is not defined in an enclosing scope",
        graph.name, capture.name
      )));
    }
  }
  let recorded: HashMap<&str, &Type> = graph.value_info.iter().map(|v| (v.name.as_str(), &v.ty)).collect();
  let mut local = HashMap::new();
  for input in &graph.inputs {
    if !defined.insert(&input.name) {
      return Err(invalid(format!("value `{}` is defined twice", input.name)));
    }
    local.insert(input.name.as_str(), Some(&input.ty));
  }
  frames.push(local);
  for node in &graph.nodes {
    for input in node.inputs.iter().filter(|i| !i.is_empty()) {
      if lookup(frames, input).is_none() {
        return Err(invalid(format!("{}: {} reads undefined value `{}`", graph.name, node.name, input)));
      }
    }
    for sub in &node.subgraphs {
      check_graph(&sub.graph, level, frames, defined)?;
    }
    for output in &node.outputs {
      if !defined.insert(output) {
        return Err(invalid(format!("value `{}` is defined twice", output)));
      }
      let ty = recorded.get(output.as_str()).copied();
      if level >= ValidationLevel::Types && ty.is_none() {
        return Err(invalid(format!("value `{}` has no recorded type", output)));
      }
      if let Some(frame) = frames.last_mut() {
        frame.insert(output, ty);
      }
    }
  }
  let local = frames.pop().unwrap_or_default();
  for result in &graph.outputs {
    match local.get(result.value.as_str()) {
      None => {
        return Err(invalid(format!(
          "{}: result `{}` refers to `{}`, which is not defined in this scope",
          graph.name, result.name, result.value
        )))
      }
      Some(ty) if level >= ValidationLevel::Types => match ty {
        Some(ty) if ty.is_subtype_of(&result.ty) => {}
        _ => {
          return Err(invalid(format!(
            "{}: result `{}` does not fit declared type {}",
            graph.name, result.name, result.ty
          )))
        }
      },
      Some(_) => {}
    }
  }
  Ok(())
}

fn collect<'m>(
  graph: &'m EmittedGraph,
  path: &str,
  out: &mut PetGraph<String, String>,
  producers: &mut HashMap<&'m str, NodeIndex>,
  consumers: &mut Vec<(NodeIndex, &'m EmittedNode)>,
  returns: &mut Vec<(&'m str, NodeIndex)>,
) {
  for input in &graph.inputs {
    let index = out.add_node(format!("{}{}", path, input.name));
    producers.insert(&input.name, index);
  }
  for node in &graph.nodes {
    let index = out.add_node(format!("{}{} ({})", path, node.name, node.op_type));
    for output in &node.outputs {
      producers.insert(output, index);
    }
    consumers.push((index, node));
    for sub in &node.subgraphs {
      let nested = format!("{}{}/{}/", path, node.name, sub.attribute);
      collect(&sub.graph, &nested, out, producers, consumers, returns);
      returns.extend(sub.graph.outputs.iter().map(|r| (r.value.as_str(), index)));
    }
  }
}

impl Model {
  pub fn new(opset_imports: BTreeMap<String, u32>, graph: EmittedGraph) -> Self {
    Model {
      producer: PRODUCER.to_string(),
      opset_imports,
      graph,
    }
  }

  pub fn validate(&self, level: ValidationLevel) -> Result<(), StructuralError> {
    if level == ValidationLevel::None {
      return Ok(());
    }
    check_graph(&self.graph, level, &mut Vec::new(), &mut HashSet::new())
  }

  /// All nodes, nested ones included, as a dependency graph. Nodes of subgraphs
  /// are labelled with their owner path; body results point back at the owner.
  pub fn to_petgraph(&self) -> PetGraph<String, String> {
    let mut out = PetGraph::new();
    let mut producers = HashMap::new();
    let mut consumers = Vec::new();
    let mut returns = Vec::new();
    collect(&self.graph, "", &mut out, &mut producers, &mut consumers, &mut returns);
    for (index, node) in &consumers {
      for input in node.inputs.iter().filter(|i| !i.is_empty()) {
        if let Some(from) = producers.get(input.as_str()) {
          out.add_edge(*from, *index, input.clone());
        }
      }
    }
    for (value, owner) in returns {
      if let Some(from) = producers.get(value) {
        out.add_edge(*from, owner, "result".to_string());
      }
    }
    for result in &self.graph.outputs {
      let sink = out.add_node(format!("output {}", result.name));
      if let Some(from) = producers.get(result.value.as_str()) {
        out.add_edge(*from, sink, result.value.clone());
      }
    }
    out
  }

  pub fn to_dot(&self) -> String {
    format!("{}", Dot::with_config(&self.to_petgraph(), &[]))
  }

  pub fn save_graphviz(&self, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut file = File::create(path)?;
    write!(file, "{}", self.to_dot())?;
    Ok(())
  }

  pub fn to_graphml(&self) -> Result<String, Box<dyn Error>> {
    use petgraph_graphml::GraphMl;
    let graph = self.to_petgraph();
    let graphml = GraphMl::new(&graph)
      .pretty_print(true)
      .export_node_weights_display()
      .export_edge_weights_display();
    let mut buff: Vec<u8> = vec![];
    graphml.to_writer(&mut buff)?;
    Ok(String::from_utf8(buff)?)
  }
}

impl fmt::Display for Model {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fn graph(f: &mut fmt::Formatter<'_>, g: &EmittedGraph, indent: usize) -> fmt::Result {
      let pad = "  ".repeat(indent);
      let names = |infos: &[ValueInfo]| infos.iter().map(|i| format!("{}: {}", i.name, i.ty)).collect::<Vec<_>>().join(", ");
      writeln!(f, "{}graph {}({})", pad, g.name, names(&g.inputs))?;
      if !g.captures.is_empty() {
        writeln!(f, "{}  captures {}", pad, names(&g.captures))?;
      }
      for node in &g.nodes {
        writeln!(
          f,
          "{}  {} = {}({})",
          pad,
          node.outputs.join(", "),
          node.op_type,
          node.inputs.join(", ")
        )?;
        for sub in &node.subgraphs {
          graph(f, &sub.graph, indent + 2)?;
        }
      }
      for result in &g.outputs {
        writeln!(f, "{}  return {} = {}", pad, result.name, result.value)?;
      }
      Ok(())
    }
    graph(f, &self.graph, 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    context::Context,
    graph::results,
    ops,
    types::{ElemKind, Type},
  };

  /// `y = x + x` and `r = if b { x * y } else { y }`.
  fn branching() -> Model {
    let cx = Context::new();
    let b = cx.argument("b", Type::scalar(ElemKind::Bool));
    let x = cx.argument("x", Type::scalar(ElemKind::Int64));
    let y = ops::add(&cx, &x, &x).unwrap();
    let r = ops::if_(&cx, &b, |cx, _| Ok(vec![ops::mul(cx, &x, &y)?]), |_, _| Ok(vec![y.clone()])).unwrap();
    let graph = results([("r", r[0].clone()), ("y", y)]).unwrap();
    graph.emit(ValidationLevel::Types).unwrap()
  }

  fn node_mut<'m>(model: &'m mut Model, op_type: &str) -> &'m mut EmittedNode {
    model.graph.nodes.iter_mut().find(|n| n.op_type == op_type).unwrap()
  }

  fn then_branch(model: &mut Model) -> &mut EmittedGraph {
    let node = node_mut(model, "If");
    &mut node.subgraphs.iter_mut().find(|s| s.attribute == "then_branch").unwrap().graph
  }

  fn rejected(model: &Model, level: ValidationLevel, needle: &str) {
    match model.validate(level) {
      Err(StructuralError::Validation(message)) => assert!(message.contains(needle), "{}", message),
      other => panic!("expected a validation error about {:?}, got {:?}", needle, other),
    }
  }

  #[test]
  fn test_emitted_model_is_valid() {
    let model = branching();
    assert!(model.validate(ValidationLevel::Types).is_ok());
    assert_eq!(then_branch(&mut model.clone()).captures.len(), 2);
  }

  #[test]
  fn test_undefined_input() {
    let mut model = branching();
    node_mut(&mut model, "Add").inputs[0] = "nowhere".to_string();
    rejected(&model, ValidationLevel::Structure, "undefined value `nowhere`");
  }

  #[test]
  fn test_capture_must_come_from_enclosing_scope() {
    let mut model = branching();
    then_branch(&mut model)
      .captures
      .push(ValueInfo::new("ghost", &Type::scalar(ElemKind::Int64)));
    rejected(&model, ValidationLevel::Structure, "capture `ghost`");
  }

  #[test]
  fn test_value_defined_twice() {
    let mut model = branching();
    let sum = node_mut(&mut model, "Add").outputs[0].clone();
    model.graph.inputs.push(ValueInfo::new(sum.clone(), &Type::scalar(ElemKind::Int64)));
    rejected(&model, ValidationLevel::Structure, &format!("`{}` is defined twice", sum));
  }

  #[test]
  fn test_result_must_be_local() {
    let mut model = branching();
    then_branch(&mut model).outputs[0].value = "x".to_string();
    rejected(&model, ValidationLevel::Structure, "not defined in this scope");
  }

  #[test]
  fn test_missing_recorded_type() {
    let mut model = branching();
    model.graph.value_info.clear();
    assert!(model.validate(ValidationLevel::Structure).is_ok());
    rejected(&model, ValidationLevel::Types, "no recorded type");
  }

  #[test]
  fn test_result_type_must_fit() {
    let mut model = branching();
    model.graph.outputs[0].ty = Type::scalar(ElemKind::Bool);
    assert!(model.validate(ValidationLevel::Structure).is_ok());
    rejected(&model, ValidationLevel::Types, "does not fit declared type");
  }

  #[test]
  fn test_validation_level_parses() {
    assert_eq!("types".parse::<ValidationLevel>(), Ok(ValidationLevel::Types));
    assert_eq!("1".parse::<ValidationLevel>(), Ok(ValidationLevel::Structure));
    assert!("strict".parse::<ValidationLevel>().is_err());
  }

  #[test]
  fn test_exports() {
    let model = branching();
    let dot = model.to_dot();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("(Add)"));
    assert!(dot.contains("then_branch/"));
    assert!(dot.contains("output r"));

    let graphml = model.to_graphml().unwrap();
    assert!(graphml.contains("<graphml"));
    assert!(graphml.contains("(If)"));

    let path = std::env::temp_dir().join(format!("opgraph-export-{}.dot", std::process::id()));
    model.save_graphviz(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), dot);
    std::fs::remove_file(path).unwrap();
  }
}
