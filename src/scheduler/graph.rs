//! Dependency graph over the actions of one plan.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::actions::ActionPlan;
use crate::error::PilotError;

/// Validated, acyclic dependency graph, indexed by plan position.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build and validate. Unknown references, duplicate ids and cycles are
    /// planning errors.
    pub fn build(plan: &ActionPlan) -> Result<Self, PilotError> {
        plan.check_references().map_err(PilotError::Planning)?;

        let index: HashMap<&str, usize> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect();

        let mut deps = vec![Vec::new(); plan.len()];
        let mut dependents = vec![Vec::new(); plan.len()];
        for (i, action) in plan.actions.iter().enumerate() {
            for dep in &action.depends_on {
                let j = index[dep.as_str()];
                deps[i].push(j);
                dependents[j].push(i);
            }
        }

        let graph = Self { deps, dependents };
        let order = graph.kahn();
        if order.len() < plan.len() {
            let mut stuck: Vec<&str> = (0..plan.len())
                .filter(|i| !order.contains(i))
                .map(|i| plan.actions[i].id.as_str())
                .collect();
            stuck.sort_unstable();
            return Err(PilotError::Planning(format!(
                "Cyclic dependency between actions: {}",
                stuck.join(", ")
            )));
        }
        Ok(graph)
    }

    /// Kahn's algorithm, always taking the ready action earliest in the plan.
    fn kahn(&self) -> Vec<usize> {
        let mut indegree: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.deps.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &next in &self.dependents[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        order
    }

    /// Stable topological order: plan order wherever dependencies allow.
    pub fn topological_order(&self) -> Vec<usize> {
        self.kahn()
    }

    /// Direct dependencies of the action at `index`.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.deps[index]
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}
