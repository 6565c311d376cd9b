//! Turning a web of `Var`s into per-scope node lists.
//!
//! [Note: placement]
//! Nodes do not belong to the scope they were built in. A node lives in the
//! lowest common ancestor of the scopes that use it, where a use is a consumer
//! node (in the consumer's placement), a subgraph result (in that subgraph), or
//! a graph result (at the root). Nodes are placed in reverse construction
//! order, which guarantees that all consumers of a node are placed before it.
//!
//! [Note: ordering]
//! Inside one scope a node must come after everything it reads, including what
//! its subgraphs read from that scope. A use nested in subgraphs therefore
//! becomes an edge to the control-flow node that owns the outermost of those
//! subgraphs. Ties are broken by construction order.

pub(crate) mod emit;

use std::{
  cmp::Reverse,
  collections::{BTreeMap, BinaryHeap, HashMap},
  sync::Arc,
};

use petgraph::{graphmap::DiGraphMap, Direction};
use tracing::{debug, instrument, trace};

use crate::{
  error::StructuralError,
  node::{Node, NodeId, ScopeId},
  var::{Origin, Var, VarKey},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ScopeKey {
  Root,
  Body(ScopeId),
}

#[derive(Debug, Clone, Copy)]
struct ScopeInfo {
  parent: Option<ScopeKey>,
  depth: usize,
}

#[derive(Debug, Clone, Copy)]
struct Use {
  scope: ScopeKey,
  consumer: Option<NodeId>,
}

pub(crate) struct Builder {
  arguments: Vec<(String, Var)>,
  boundary: HashMap<VarKey, usize>,
  results: Vec<(String, Var)>,
  nodes: BTreeMap<NodeId, Arc<Node>>,
  owners: HashMap<ScopeId, NodeId>,
}

/// Where every reachable node goes and in which order.
pub(crate) struct Plan {
  pub(crate) arguments: Vec<(String, Var)>,
  pub(crate) results: Vec<(String, Var)>,
  placement: HashMap<NodeId, ScopeKey>,
  order: HashMap<ScopeKey, Vec<Arc<Node>>>,
  captures: HashMap<ScopeKey, Vec<Var>>,
}

impl Plan {
  pub(crate) fn nodes_in(&self, scope: ScopeKey) -> &[Arc<Node>] {
    self.order.get(&scope).map(Vec::as_slice).unwrap_or_default()
  }

  pub(crate) fn captures_of(&self, scope: ScopeKey) -> &[Var] {
    self.captures.get(&scope).map(Vec::as_slice).unwrap_or_default()
  }

  /// Whether `var` is produced by a node placed in `scope`.
  pub(crate) fn is_local(&self, var: &Var, scope: ScopeKey) -> bool {
    match var.key() {
      VarKey::Output(id, _) => self.placement.get(&id) == Some(&scope),
      VarKey::Argument(_) => false,
    }
  }
}

fn dangling(var: &Var) -> StructuralError {
  StructuralError::DanglingCapture { var: var.to_string() }
}

fn info(scopes: &HashMap<ScopeKey, ScopeInfo>, key: ScopeKey) -> Result<ScopeInfo, StructuralError> {
  scopes
    .get(&key)
    .copied()
    .ok_or_else(|| StructuralError::Validation(format!("scope {:?} is not owned by a reachable node", key)))
}

fn lca(scopes: &HashMap<ScopeKey, ScopeInfo>, a: ScopeKey, b: ScopeKey) -> Result<ScopeKey, StructuralError> {
  let (mut a, mut b) = (a, b);
  let (mut da, mut db) = (info(scopes, a)?.depth, info(scopes, b)?.depth);
  while a != b {
    if da >= db {
      a = info(scopes, a)?.parent.unwrap_or(ScopeKey::Root);
      da = da.saturating_sub(1);
    } else {
      b = info(scopes, b)?.parent.unwrap_or(ScopeKey::Root);
      db = db.saturating_sub(1);
    }
  }
  Ok(a)
}

impl Builder {
  /// Collects every node reachable from `results`, stopping at `arguments`.
  /// Without explicit arguments, every reached top-level argument becomes one.
  pub(crate) fn discover(
    arguments: Option<&[(String, Var)]>,
    results: &[(String, Var)],
  ) -> Result<Builder, StructuralError> {
    let mut builder = Builder {
      arguments: arguments.map(<[_]>::to_vec).unwrap_or_default(),
      boundary: HashMap::new(),
      results: results.to_vec(),
      nodes: BTreeMap::new(),
      owners: HashMap::new(),
    };
    builder.index_boundary();

    let mut top_level = BTreeMap::new();
    let mut stack: Vec<Var> = results.iter().map(|(_, v)| v.clone()).collect();
    while let Some(var) = stack.pop() {
      if builder.boundary.contains_key(&var.key()) {
        continue;
      }
      match var.origin() {
        Origin::Argument(_) => {
          if var.scope().is_empty() {
            top_level.insert(var.key(), var.clone());
          }
        }
        Origin::Output(node, _) => {
          if builder.nodes.contains_key(&node.id()) {
            continue;
          }
          builder.nodes.insert(node.id(), node.clone());
          stack.extend(node.inputs().iter().flatten().cloned());
          for body in node.bodies() {
            builder.owners.insert(body.scope(), node.id());
            stack.extend(body.results().iter().cloned());
          }
        }
      }
    }

    if arguments.is_none() {
      builder.arguments = top_level
        .into_values()
        .map(|var| (var.name().unwrap_or_default().to_string(), var))
        .collect();
      builder.index_boundary();
    }
    let mut names = std::collections::HashSet::new();
    for (name, _) in &builder.arguments {
      if !names.insert(name.as_str()) {
        return Err(StructuralError::DuplicateName(name.clone()));
      }
    }
    debug!(
      "discovered {} nodes, {} arguments",
      builder.nodes.len(),
      builder.arguments.len()
    );
    Ok(builder)
  }

  fn index_boundary(&mut self) {
    self.boundary = self.arguments.iter().enumerate().map(|(i, (_, v))| (v.key(), i)).collect();
  }

  pub(crate) fn arguments(&self) -> &[(String, Var)] {
    &self.arguments
  }

  /// The producing node, unless `var` is an argument or on the boundary.
  fn producer(&self, var: &Var) -> Option<NodeId> {
    if self.boundary.contains_key(&var.key()) {
      return None;
    }
    var.node().map(|n| n.id())
  }

  fn definition(&self, var: &Var, placement: &HashMap<NodeId, ScopeKey>) -> Result<ScopeKey, StructuralError> {
    if self.boundary.contains_key(&var.key()) {
      return Ok(ScopeKey::Root);
    }
    match var.origin() {
      Origin::Output(node, _) => placement.get(&node.id()).copied().ok_or_else(|| dangling(var)),
      Origin::Argument(_) => match var.scope().last() {
        Some(scope) if self.owners.contains_key(scope) => Ok(ScopeKey::Body(*scope)),
        _ => Err(dangling(var)),
      },
    }
  }

  #[instrument(level = "debug", skip_all, fields(nodes = self.nodes.len()))]
  pub(crate) fn plan(self) -> Result<Plan, StructuralError> {
    let mut scopes = HashMap::from([(
      ScopeKey::Root,
      ScopeInfo {
        parent: None,
        depth: 0,
      },
    )]);
    let mut uses: HashMap<NodeId, Vec<Use>> = HashMap::new();
    for (_, var) in &self.results {
      if let Some(id) = self.producer(var) {
        uses.entry(id).or_default().push(Use {
          scope: ScopeKey::Root,
          consumer: None,
        });
      }
    }
    for node in self.nodes.values() {
      for body in node.bodies() {
        for var in body.results() {
          if let Some(id) = self.producer(var) {
            uses.entry(id).or_default().push(Use {
              scope: ScopeKey::Body(body.scope()),
              consumer: None,
            });
          }
        }
      }
    }

    let mut placement = HashMap::new();
    for (id, node) in self.nodes.iter().rev() {
      let mut sites = uses.get(id).map(Vec::as_slice).unwrap_or_default().iter().map(|u| u.scope);
      let first = sites.next().ok_or_else(|| dangling(&Var::output(node.clone(), 0)))?;
      let scope = sites.try_fold(first, |a, b| lca(&scopes, a, b))?;
      placement.insert(*id, scope);
      let depth = info(&scopes, scope)?.depth;
      for body in node.bodies() {
        scopes.insert(
          ScopeKey::Body(body.scope()),
          ScopeInfo {
            parent: Some(scope),
            depth: depth + 1,
          },
        );
      }
      for var in node.inputs().iter().flatten() {
        if let Some(producer) = self.producer(var) {
          uses.entry(producer).or_default().push(Use {
            scope,
            consumer: Some(*id),
          });
        }
      }
      trace!("{:?} placed in {:?}", node, scope);
    }

    // every (value, scope of use, consuming node) triple
    let mut sites: Vec<(Var, Use)> = Vec::new();
    for (_, var) in &self.results {
      sites.push((
        var.clone(),
        Use {
          scope: ScopeKey::Root,
          consumer: None,
        },
      ));
    }
    for node in self.nodes.values() {
      let at = placement[&node.id()];
      for var in node.inputs().iter().flatten() {
        sites.push((
          var.clone(),
          Use {
            scope: at,
            consumer: Some(node.id()),
          },
        ));
      }
      for body in node.bodies() {
        for var in body.results() {
          sites.push((
            var.clone(),
            Use {
              scope: ScopeKey::Body(body.scope()),
              consumer: None,
            },
          ));
        }
      }
    }

    let mut captures: HashMap<ScopeKey, BTreeMap<(u64, usize), Var>> = HashMap::new();
    let mut deps: DiGraphMap<NodeId, ()> = DiGraphMap::new();
    for id in self.nodes.keys() {
      deps.add_node(*id);
    }
    for (var, site) in sites {
      let defined = self.definition(&var, &placement)?;
      let mut scope = site.scope;
      let mut below = None;
      while scope != defined {
        captures
          .entry(scope)
          .or_default()
          .insert(var.key().rank(), var.clone());
        below = Some(scope);
        scope = match info(&scopes, scope)?.parent {
          Some(parent) => parent,
          None => {
            return Err(StructuralError::ScopeEscape {
              var: var.to_string(),
              scope: format!("{:?}", defined),
            })
          }
        };
      }
      if let Some(producer) = self.producer(&var) {
        let anchor = match below {
          None => site.consumer,
          Some(ScopeKey::Body(body)) => self.owners.get(&body).copied(),
          Some(ScopeKey::Root) => None,
        };
        if let Some(anchor) = anchor {
          deps.add_edge(producer, anchor, ());
        }
      }
    }

    let mut indegree: HashMap<NodeId, usize> = deps
      .nodes()
      .map(|n| (n, deps.neighbors_directed(n, Direction::Incoming).count()))
      .collect();
    let mut ready: BinaryHeap<Reverse<NodeId>> = indegree
      .iter()
      .filter(|(_, d)| **d == 0)
      .map(|(n, _)| Reverse(*n))
      .collect();
    let mut order: HashMap<ScopeKey, Vec<Arc<Node>>> = HashMap::new();
    let mut emitted = 0;
    while let Some(Reverse(id)) = ready.pop() {
      emitted += 1;
      order.entry(placement[&id]).or_default().push(self.nodes[&id].clone());
      for next in deps.neighbors_directed(id, Direction::Outgoing) {
        if let Some(d) = indegree.get_mut(&next) {
          *d -= 1;
          if *d == 0 {
            ready.push(Reverse(next));
          }
        }
      }
    }
    if emitted != self.nodes.len() {
      return Err(StructuralError::Cycle);
    }

    Ok(Plan {
      arguments: self.arguments,
      results: self.results,
      placement,
      order,
      captures: captures
        .into_iter()
        .map(|(scope, vars)| (scope, vars.into_values().collect()))
        .collect(),
    })
  }
}
