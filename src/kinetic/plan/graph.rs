// SPDX-License-Identifier: MIT

//! Validated execution graph

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// What a node does within the plan
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Coordinates other nodes
    Manage,
    /// Produces work directly (default)
    #[default]
    Execute,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Manage => f.write_str("manage"),
            NodeKind::Execute => f.write_str("execute"),
        }
    }
}

/// One planned unit of work, immutable once compiled
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanNode {
    pub id: String,
    pub title: String,
    pub kind: NodeKind,
    pub suggested_agent_role: Option<String>,
    pub acceptance: Vec<String>,
    pub deps: Vec<String>,
    pub risks: Vec<String>,
    pub assumptions: Vec<String>,
    pub notes: Vec<String>,
    pub llm: serde_json::Map<String, serde_json::Value>,
    /// Nodes that declare this one as a dependency, in plan order
    pub successors: Vec<String>,
}

/// The validated DAG over a plan's nodes
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: Vec<PlanNode>,
    index: HashMap<String, usize>,
}

impl ExecutionGraph {
    /// Build from nodes that have already passed dependency and cycle checks
    pub(crate) fn from_validated(nodes: Vec<PlanNode>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self { nodes, index }
    }

    pub fn get(&self, id: &str) -> Option<&PlanNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in plan order
    pub fn iter(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no dependencies, in plan order
    pub fn roots(&self) -> Vec<&PlanNode> {
        self.nodes.iter().filter(|n| n.deps.is_empty()).collect()
    }

    pub fn successors(&self, id: &str) -> Option<&[String]> {
        self.get(id).map(|n| n.successors.as_slice())
    }

    /// Every node after all of its dependencies; deterministic for a given plan
    pub fn topological_order(&self) -> Vec<&str> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut ready: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = ready.pop_front() {
            let node = &self.nodes[i];
            order.push(node.id.as_str());

            for succ in &node.successors {
                let j = self.index[succ];
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push_back(j);
                }
            }
        }
        order
    }
}
