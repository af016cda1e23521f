//! Dependency graph of one feature's tasks.

use crate::error::{FlowError, Result};
use crate::task::TaskSpecification;
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Tasks as nodes; an edge `a -> b` means `b` waits for `a`.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    order: Vec<String>,
}

impl TaskGraph {
    /// Build the graph and compute a topological order.
    ///
    /// Dependencies naming unknown tasks are skipped here; task validation
    /// reports them.
    pub fn build(tasks: &[TaskSpecification]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for task in tasks {
            let idx = graph.add_node(task.id.clone());
            nodes.insert(task.id.clone(), idx);
        }
        for task in tasks {
            let to = nodes[&task.id];
            for dep in &task.dependencies {
                if let Some(&from) = nodes.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let sorted = toposort(&graph, None).map_err(|cycle| FlowError::CyclicDependency {
            cycle: find_cycle(&graph, cycle.node_id()),
        })?;
        let order = sorted.into_iter().map(|idx| graph[idx].clone()).collect();

        Ok(Self {
            graph,
            nodes,
            order,
        })
    }

    /// Task ids, every dependency before its dependents.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tasks that name `id` as a direct dependency.
    pub fn dependents(&self, id: &str) -> BTreeSet<String> {
        let Some(&idx) = self.nodes.get(id) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    /// Everything downstream of `id`, excluding `id` itself.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let Some(&start) = self.nodes.get(id) else {
            return BTreeSet::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut out = BTreeSet::new();
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != start {
                out.insert(self.graph[idx].clone());
            }
        }
        out
    }

    /// Group tasks into waves: each wave depends only on earlier waves.
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for id in &self.order {
            let idx = self.nodes[id];
            let d = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| depth.get(&dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, d);
        }

        let mut waves: Vec<Vec<String>> = Vec::new();
        for id in &self.order {
            let d = depth[&self.nodes[id]];
            if waves.len() <= d {
                waves.resize_with(d + 1, Vec::new);
            }
            waves[d].push(id.clone());
        }
        for wave in &mut waves {
            wave.sort();
        }
        waves
    }
}

/// Recover a readable cycle through `start`, closed on its first node.
fn find_cycle(graph: &DiGraph<String, ()>, start: NodeIndex) -> Vec<String> {
    let component: HashSet<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .map(|scc| scc.into_iter().collect())
        .unwrap_or_default();

    let mut path = vec![start];
    let mut visited = HashSet::from([start]);
    if walk_back_to(graph, &component, start, start, &mut path, &mut visited) {
        return path.into_iter().map(|idx| graph[idx].clone()).collect();
    }
    vec![graph[start].clone(), graph[start].clone()]
}

fn walk_back_to(
    graph: &DiGraph<String, ()>,
    component: &HashSet<NodeIndex>,
    start: NodeIndex,
    current: NodeIndex,
    path: &mut Vec<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
) -> bool {
    let mut next: Vec<NodeIndex> = graph
        .neighbors_directed(current, Direction::Outgoing)
        .filter(|n| component.contains(n))
        .collect();
    next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));

    for n in next {
        if n == start {
            path.push(start);
            return true;
        }
        if visited.insert(n) {
            path.push(n);
            if walk_back_to(graph, component, start, n, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> TaskSpecification {
        deps.iter()
            .fold(TaskSpecification::new(id, id), |t, d| t.with_dependency(*d))
    }

    #[test]
    fn test_order_puts_dependencies_first() {
        let graph = TaskGraph::build(&[
            task("deploy", &["test", "review"]),
            task("test", &["implement"]),
            task("review", &["implement"]),
            task("implement", &[]),
        ])
        .unwrap();

        let pos = |id: &str| graph.order().iter().position(|x| x == id).unwrap();
        assert!(pos("implement") < pos("test"));
        assert!(pos("implement") < pos("review"));
        assert!(pos("test") < pos("deploy"));
        assert!(pos("review") < pos("deploy"));
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_waves_group_independent_tasks() {
        let graph = TaskGraph::build(&[
            task("implement", &[]),
            task("test", &["implement"]),
            task("review", &["implement"]),
            task("deploy", &["test", "review"]),
        ])
        .unwrap();

        assert_eq!(
            graph.waves(),
            vec![
                vec!["implement".to_string()],
                vec!["review".to_string(), "test".to_string()],
                vec!["deploy".to_string()],
            ]
        );
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let err = TaskGraph::build(&[
            task("a", &["c"]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &[]),
        ])
        .unwrap_err();

        match err {
            FlowError::CyclicDependency { cycle } => {
                assert_eq!(cycle.len(), 4);
                assert_eq!(cycle.first(), cycle.last());
                for id in ["a", "b", "c"] {
                    assert!(cycle.contains(&id.to_string()), "{id} missing from {cycle:?}");
                }
                assert!(!cycle.contains(&"d".to_string()));
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = TaskGraph::build(&[
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("x", &[]),
        ])
        .unwrap();

        let down: Vec<_> = graph.transitive_dependents("a").into_iter().collect();
        assert_eq!(down, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(graph.dependents("a").len(), 1);
        assert!(graph.transitive_dependents("x").is_empty());
        assert!(graph.transitive_dependents("missing").is_empty());
    }

    #[test]
    fn test_unknown_dependencies_are_ignored() {
        let graph = TaskGraph::build(&[task("a", &["ghost"])]).unwrap();
        assert_eq!(graph.order(), &["a".to_string()]);
    }
}
