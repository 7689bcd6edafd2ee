//! Resource dependency graph.
//!
//! Nodes are declared resources. Internally an edge runs from a dependency to
//! its dependent, so "B must succeed before A is attempted" is stored as
//! `B -> A`. Edges come from three places:
//!
//! - explicit `depends_on` lists,
//! - attribute references ([`AttrValue::Ref`](crate::resource::AttrValue::Ref)),
//! - implicit API prerequisites: a resource whose kind needs a service API
//!   depends on every declared [`ApiToggle`](ResourceKind::ApiToggle) for it.
//!
//! All orderings are deterministic: ties are broken by resource id.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::manifest::Manifest;
use crate::resource::{ResourceId, ResourceKind};

/// Errors raised while building the graph.
#[derive(Debug, Error, PartialEq)]
pub enum DagError {
  /// The dependency relation has a cycle. Ids are listed in cycle order with
  /// the first id repeated at the end.
  #[error("dependency cycle detected: {}", format_cycle(.0))]
  Cycle(Vec<ResourceId>),
}

fn format_cycle(cycle: &[ResourceId]) -> String {
  cycle.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(" -> ")
}

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
  Explicit,
  Reference,
  ApiPrerequisite,
}

/// The dependency graph of a manifest.
#[derive(Debug, Clone)]
pub struct ResourceDag {
  graph: DiGraph<ResourceId, EdgeKind>,
  nodes: HashMap<ResourceId, NodeIndex>,
  /// Dependencies of each node, sorted for deterministic traversal.
  deps: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl ResourceDag {
  /// Build the graph for a validated manifest.
  ///
  /// # Errors
  ///
  /// Returns [`DagError::Cycle`] naming the ids along the first cycle found.
  pub fn from_manifest(manifest: &Manifest) -> Result<Self, DagError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    let mut deps: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();

    for id in manifest.resources.keys() {
      nodes.insert(id.clone(), graph.add_node(id.clone()));
      deps.insert(id.clone(), BTreeSet::new());
    }

    // Declared API toggles by service name.
    let apis: BTreeMap<&str, &ResourceId> = manifest
      .resources
      .values()
      .filter(|r| r.kind == ResourceKind::ApiToggle)
      .map(|r| (r.key.as_str(), &r.id))
      .collect();

    let mut add_edge = |dependent: &ResourceId, dependency: &ResourceId, kind: EdgeKind| {
      let (Some(&from), Some(&to)) = (nodes.get(dependency), nodes.get(dependent)) else {
        return;
      };
      let Some(set) = deps.get_mut(dependent) else {
        return;
      };
      if set.insert(dependency.clone()) {
        graph.add_edge(from, to, kind);
      }
    };

    for resource in manifest.resources.values() {
      for dep in &resource.depends_on {
        add_edge(&resource.id, dep, EdgeKind::Explicit);
      }
      for (_, target) in resource.attribute_refs() {
        add_edge(&resource.id, target, EdgeKind::Reference);
      }
      for service in resource.kind.required_services() {
        if let Some(api) = apis.get(service)
          && *api != &resource.id
        {
          add_edge(&resource.id, api, EdgeKind::ApiPrerequisite);
        }
      }
    }

    let dag = Self { graph, nodes, deps };
    if let Some(cycle) = dag.find_cycle() {
      return Err(DagError::Cycle(cycle));
    }
    debug!(nodes = dag.len(), edges = dag.graph.edge_count(), "built dependency graph");
    Ok(dag)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, id: &ResourceId) -> bool {
    self.nodes.contains_key(id)
  }

  /// Depth-first search with recursion-stack marking.
  fn find_cycle(&self) -> Option<Vec<ResourceId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
      Visiting,
      Done,
    }

    fn visit<'a>(
      id: &'a ResourceId,
      deps: &'a BTreeMap<ResourceId, BTreeSet<ResourceId>>,
      marks: &mut HashMap<&'a ResourceId, Mark>,
      stack: &mut Vec<&'a ResourceId>,
    ) -> Option<Vec<ResourceId>> {
      match marks.get(id) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
          let start = stack.iter().position(|s| *s == id)?;
          let mut cycle: Vec<ResourceId> = stack[start..].iter().map(|s| (*s).clone()).collect();
          cycle.push(id.clone());
          return Some(cycle);
        }
        None => {}
      }

      marks.insert(id, Mark::Visiting);
      stack.push(id);
      if let Some(children) = deps.get(id) {
        for dep in children {
          if let Some(cycle) = visit(dep, deps, marks, stack) {
            return Some(cycle);
          }
        }
      }
      stack.pop();
      marks.insert(id, Mark::Done);
      None
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    for id in self.deps.keys() {
      if let Some(cycle) = visit(id, &self.deps, &mut marks, &mut stack) {
        return Some(cycle);
      }
    }
    None
  }

  /// All resources, dependencies first.
  ///
  /// Kahn's algorithm; among ready resources the smallest id goes first.
  pub fn topological_order(&self) -> Vec<ResourceId> {
    let mut remaining: BTreeMap<&ResourceId, usize> = self.deps.iter().map(|(id, d)| (id, d.len())).collect();
    let mut ready: BTreeSet<&ResourceId> = remaining.iter().filter(|(_, n)| **n == 0).map(|(id, _)| *id).collect();
    let mut order = Vec::with_capacity(self.len());

    while let Some(id) = ready.pop_first() {
      remaining.remove(id);
      order.push(id.clone());
      for dependent in self.neighbors(id, Direction::Outgoing) {
        if let Some(count) = remaining.get_mut(dependent) {
          *count = count.saturating_sub(1);
          if *count == 0 {
            ready.insert(dependent);
          }
        }
      }
    }
    order
  }

  /// Direct dependencies of `id`, in id order.
  pub fn dependencies(&self, id: &ResourceId) -> Vec<ResourceId> {
    self
      .deps
      .get(id)
      .map(|d| d.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Resources that directly depend on `id`, in id order.
  pub fn dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
    let mut out: Vec<ResourceId> = self.neighbors(id, Direction::Outgoing).cloned().collect();
    out.sort();
    out.dedup();
    out
  }

  /// Everything reachable from `id` along dependent edges, excluding `id`.
  pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<&ResourceId> = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
      for dependent in self.neighbors(current, Direction::Outgoing) {
        if seen.insert(dependent.clone()) {
          queue.push_back(dependent);
        }
      }
    }
    seen
  }

  /// The longest dependency chain, from its root to its last dependent.
  pub fn critical_path(&self) -> Vec<ResourceId> {
    let order = self.topological_order();
    let mut best: HashMap<&ResourceId, (usize, Option<&ResourceId>)> = HashMap::new();

    for id in &order {
      let entry = self
        .deps
        .get(id)
        .into_iter()
        .flatten()
        .filter_map(|dep| best.get(dep).map(|(len, _)| (*len, dep)))
        .max_by(|(a_len, a_id), (b_len, b_id)| a_len.cmp(b_len).then_with(|| b_id.cmp(a_id)))
        .map(|(len, dep)| (len + 1, Some(dep)))
        .unwrap_or((1, None));
      best.insert(id, entry);
    }

    let Some(mut tail) = order
      .iter()
      .max_by(|a, b| best[a].0.cmp(&best[b].0).then_with(|| b.cmp(a)))
    else {
      return Vec::new();
    };

    let mut path = vec![tail.clone()];
    while let Some((_, Some(prev))) = best.get(tail) {
      path.push((*prev).clone());
      tail = *prev;
    }
    path.reverse();
    path
  }

  fn neighbors(&self, id: &ResourceId, direction: Direction) -> impl Iterator<Item = &ResourceId> {
    self
      .nodes
      .get(id)
      .into_iter()
      .flat_map(move |&idx| self.graph.neighbors_directed(idx, direction))
      .map(|idx| &self.graph[idx])
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::Resource;

  fn ids(items: &[&str]) -> Vec<ResourceId> {
    items.iter().map(|s| ResourceId::new(*s)).collect()
  }

  fn manifest(resources: Vec<Resource>) -> Manifest {
    let mut manifest = Manifest::new("acme", "us-central1");
    for r in resources {
      manifest.insert(r).unwrap();
    }
    manifest
  }

  fn pipeline() -> Manifest {
    manifest(vec![
      Resource::new("api-storage", ResourceKind::ApiToggle, "storage.googleapis.com"),
      Resource::new("api-functions", ResourceKind::ApiToggle, "cloudfunctions.googleapis.com"),
      Resource::new("sa", ResourceKind::ServiceAccount, "rt@acme.iam.gserviceaccount.com"),
      Resource::new("bucket", ResourceKind::Bucket, "acme-src"),
      Resource::new("artifact", ResourceKind::ArtifactObject, "artifact").with_ref("bucket", "bucket"),
      Resource::new("fn", ResourceKind::FunctionDeployment, "handler")
        .with_ref("source", "artifact")
        .with_ref("service_account", "sa"),
      Resource::new("trigger", ResourceKind::EventTrigger, "handler-trigger").with_ref("function", "fn"),
    ])
  }

  #[test]
  fn empty_manifest() {
    let dag = ResourceDag::from_manifest(&Manifest::default()).unwrap();
    assert!(dag.is_empty());
    assert!(dag.topological_order().is_empty());
    assert!(dag.critical_path().is_empty());
  }

  #[test]
  fn reference_and_api_edges() {
    let dag = ResourceDag::from_manifest(&pipeline()).unwrap();

    assert_eq!(dag.dependencies(&ResourceId::new("artifact")), ids(&["api-storage", "bucket"]));
    assert_eq!(dag.dependencies(&ResourceId::new("fn")), ids(&["api-functions", "artifact", "sa"]));
    assert_eq!(dag.dependents(&ResourceId::new("api-storage")), ids(&["artifact", "bucket"]));
  }

  #[test]
  fn topological_order_respects_edges_and_breaks_ties_by_id() {
    let dag = ResourceDag::from_manifest(&pipeline()).unwrap();

    assert_eq!(
      dag.topological_order(),
      ids(&["api-functions", "api-storage", "bucket", "artifact", "sa", "fn", "trigger"])
    );
  }

  #[test]
  fn diamond_dependency() {
    //     a
    //    / \
    //   b   c
    //    \ /
    //     d
    let dag = ResourceDag::from_manifest(&manifest(vec![
      Resource::new("a", ResourceKind::Bucket, "a"),
      Resource::new("b", ResourceKind::Bucket, "b").depends_on("a"),
      Resource::new("c", ResourceKind::Bucket, "c").depends_on("a"),
      Resource::new("d", ResourceKind::Bucket, "d").depends_on("b").depends_on("c"),
    ]))
    .unwrap();

    assert_eq!(dag.topological_order(), ids(&["a", "b", "c", "d"]));
    assert_eq!(
      dag.transitive_dependents(&ResourceId::new("a")),
      ids(&["b", "c", "d"]).into_iter().collect()
    );
    assert_eq!(dag.critical_path(), ids(&["a", "b", "d"]));
  }

  #[test]
  fn cycle_is_reported_in_order() {
    let err = ResourceDag::from_manifest(&manifest(vec![
      Resource::new("a", ResourceKind::Bucket, "a").depends_on("b"),
      Resource::new("b", ResourceKind::Bucket, "b").depends_on("c"),
      Resource::new("c", ResourceKind::Bucket, "c").depends_on("a"),
      Resource::new("z", ResourceKind::Bucket, "z"),
    ]))
    .unwrap_err();

    assert_eq!(err, DagError::Cycle(ids(&["a", "b", "c", "a"])));
    assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> c -> a");
  }

  #[test]
  fn cycle_through_references() {
    let err = ResourceDag::from_manifest(&manifest(vec![
      Resource::new("fn", ResourceKind::FunctionDeployment, "f").with_ref("source", "obj"),
      Resource::new("obj", ResourceKind::ArtifactObject, "o").depends_on("fn"),
    ]))
    .unwrap_err();

    assert_eq!(err, DagError::Cycle(ids(&["fn", "obj", "fn"])));
  }

  #[test]
  fn critical_path_of_pipeline() {
    let dag = ResourceDag::from_manifest(&pipeline()).unwrap();
    assert_eq!(
      dag.critical_path(),
      ids(&["api-storage", "bucket", "artifact", "fn", "trigger"])
    );
  }
}
