//! Dependency graph analysis for transformation steps.
//!
//! Cycle detection is a depth-first traversal with three-colour marking:
//! white nodes are unvisited, grey nodes are on the current DFS path and
//! black nodes are finished. An edge into a grey node is a back-edge and
//! closes a cycle.

use super::spec::TransformStep;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Step dependency graph, keyed by step name.
///
/// Edges point from a step to the steps it depends on. Dependencies that do
/// not name a declared step are ignored here; reference checking is a
/// separate validation pass.
#[derive(Debug, Clone)]
pub struct DependencyGraph<'a> {
    order: Vec<&'a str>,
    edges: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> DependencyGraph<'a> {
    /// Builds the graph. Duplicate step names keep their first declaration.
    #[must_use]
    pub fn new(steps: &'a [TransformStep]) -> Self {
        let mut order = Vec::with_capacity(steps.len());
        let mut edges: HashMap<&'a str, Vec<&'a str>> = HashMap::with_capacity(steps.len());

        for step in steps {
            if edges.contains_key(step.name.as_str()) {
                continue;
            }
            order.push(step.name.as_str());
            edges.insert(
                step.name.as_str(),
                step.dependencies.iter().map(String::as_str).collect(),
            );
        }

        let known: BTreeSet<&str> = order.iter().copied().collect();
        for deps in edges.values_mut() {
            deps.retain(|dep| known.contains(dep));
        }

        Self { order, edges }
    }

    /// Returns the number of distinct steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns every cycle closed by a back-edge, in discovery order.
    ///
    /// Each cycle is the step sequence from the repeated step back to
    /// itself, e.g. `["a", "b", "a"]`.
    #[must_use]
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut colors: HashMap<&str, Color> =
            self.order.iter().map(|name| (*name, Color::White)).collect();
        let mut path = Vec::new();
        let mut cycles = Vec::new();

        for name in &self.order {
            if colors.get(name) == Some(&Color::White) {
                self.visit(*name, &mut colors, &mut path, &mut cycles);
            }
        }

        cycles
    }

    /// Depth-first walk from `root` using an explicit stack of
    /// `(node, next dependency index)` frames, so deep chains cannot
    /// exhaust the thread stack. `path` mirrors the grey nodes on the stack.
    fn visit(
        &self,
        root: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        let mut stack: Vec<(&'a str, usize)> = vec![(root, 0)];
        colors.insert(root, Color::Grey);
        path.push(root);

        while let Some((node, next)) = stack.last_mut() {
            let deps = self.edges.get(*node).map(Vec::as_slice).unwrap_or_default();
            let Some(dep) = deps.get(*next).copied() else {
                colors.insert(*node, Color::Black);
                path.pop();
                stack.pop();
                continue;
            };
            *next += 1;

            match colors.get(dep).copied().unwrap_or(Color::Black) {
                Color::White => {
                    colors.insert(dep, Color::Grey);
                    path.push(dep);
                    stack.push((dep, 0));
                }
                Color::Grey => {
                    let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(dep.to_string());
                    cycles.push(cycle);
                }
                Color::Black => {}
            }
        }
    }

    /// Returns the steps in an order where every step follows its
    /// dependencies, or `None` if the graph is cyclic.
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    #[must_use]
    pub fn execution_order(&self) -> Option<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (*name, self.edges.get(name).map_or(0, Vec::len)))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for name in &self.order {
            for dep in self.edges.get(name).map(Vec::as_slice).unwrap_or_default() {
                dependents.entry(*dep).or_default().push(*name);
            }
        }

        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (*name, i))
            .collect();

        let mut ready: BTreeSet<(usize, &str)> = self
            .order
            .iter()
            .filter(|name| in_degree.get(*name) == Some(&0))
            .map(|name| (position[name], *name))
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(entry) = ready.pop_first() {
            let (_, name) = entry;
            sorted.push(name.to_string());
            for dependent in dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert((position[dependent], *dependent));
                    }
                }
            }
        }

        (sorted.len() == self.order.len()).then_some(sorted)
    }
}

/// Detects dependency cycles among the given steps.
#[must_use]
pub fn detect_cycles(steps: &[TransformStep]) -> Vec<Vec<String>> {
    DependencyGraph::new(steps).detect_cycles()
}

/// Returns a dependency-respecting execution order, or `None` on a cycle.
#[must_use]
pub fn execution_order(steps: &[TransformStep]) -> Option<Vec<String>> {
    DependencyGraph::new(steps).execution_order()
}
