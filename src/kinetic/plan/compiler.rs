// SPDX-License-Identifier: MIT

//! Plan compiler - turns a raw plan into a validated execution graph

use std::collections::{HashMap, HashSet};

use super::graph::{ExecutionGraph, NodeKind, PlanNode};
use super::types::{RawPlan, RawPlanNode};
use crate::adk::error::{PlanError, Result, RunError};

/// Compile a raw plan into an immutable DAG.
///
/// Fails with [`RunError::PlanInvalid`] on duplicate or empty ids, unknown node
/// types, dependencies on undeclared nodes, and dependency cycles. Node order
/// in the graph follows submission order.
pub fn compile(raw: &RawPlan) -> Result<ExecutionGraph> {
    let mut nodes = Vec::with_capacity(raw.plan.len());
    let mut seen = HashSet::new();

    for (position, raw_node) in raw.plan.iter().enumerate() {
        let node = lower_node(position, raw_node)?;
        if !seen.insert(node.id.clone()) {
            return Err(PlanError::DuplicateNode(node.id).into());
        }
        nodes.push(node);
    }

    for node in &nodes {
        if let Some(missing) = node.deps.iter().find(|d| !seen.contains(*d)) {
            return Err(PlanError::UnknownDependency {
                node: node.id.clone(),
                dependency: missing.clone(),
            }
            .into());
        }
    }

    if let Some(cycle) = find_cycle(&nodes) {
        return Err(PlanError::CircularDependency(cycle).into());
    }

    // Successors in plan order: walk nodes in order and append to each dependency
    let mut successors: HashMap<String, Vec<String>> = HashMap::new();
    for node in &nodes {
        for dep in &node.deps {
            successors
                .entry(dep.clone())
                .or_default()
                .push(node.id.clone());
        }
    }
    for node in &mut nodes {
        node.successors = successors.remove(&node.id).unwrap_or_default();
    }

    log::debug!("Compiled plan with {} nodes", nodes.len());
    Ok(ExecutionGraph::from_validated(nodes))
}

/// Compile straight from a JSON document
pub fn compile_value(doc: &serde_json::Value) -> Result<ExecutionGraph> {
    let raw: RawPlan = serde_json::from_value(doc.clone())
        .map_err(|e| RunError::from(PlanError::Malformed(e.to_string())))?;
    compile(&raw)
}

fn lower_node(position: usize, raw: &RawPlanNode) -> Result<PlanNode> {
    let id = raw.id.trim().to_string();
    if id.is_empty() {
        return Err(PlanError::EmptyId(position).into());
    }

    let kind = match raw.kind.as_deref().map(str::trim) {
        None | Some("") => NodeKind::default(),
        Some(k) if k.eq_ignore_ascii_case("manage") => NodeKind::Manage,
        Some(k) if k.eq_ignore_ascii_case("execute") => NodeKind::Execute,
        Some(other) => {
            return Err(PlanError::UnknownKind {
                node: id,
                kind: other.to_string(),
            }
            .into())
        }
    };

    // A repeated dependency is still a single edge
    let mut deps = Vec::new();
    for dep in raw.deps.to_vec() {
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }

    Ok(PlanNode {
        id,
        title: raw.title.trim().to_string(),
        kind,
        suggested_agent_role: raw
            .suggested_agent_role
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
        acceptance: raw.acceptance.to_vec(),
        deps,
        risks: raw.risks.to_vec(),
        assumptions: raw.assumptions.to_vec(),
        notes: raw.notes.to_vec(),
        llm: raw.llm.clone().unwrap_or_default(),
        successors: Vec::new(),
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    Unvisited,
    Visiting,
    Visited,
}

/// Depth-first search over dependency edges; returns the first cycle found.
///
/// The walk keeps its own stack of `(node, next dependency)` frames so plan
/// depth is bounded by memory rather than by the thread stack.
fn find_cycle(nodes: &[PlanNode]) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    let mut colors = vec![Color::Unvisited; nodes.len()];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..nodes.len() {
        if colors[start] != Color::Unvisited {
            continue;
        }
        colors[start] = Color::Visiting;
        stack.push((start, 0));

        while let Some(frame) = stack.last_mut() {
            let (i, next) = *frame;
            let Some(dep) = nodes[i].deps.get(next) else {
                colors[i] = Color::Visited;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            let j = index[dep.as_str()];
            match colors[j] {
                Color::Visiting => {
                    // The frames from `j` upwards are exactly the cycle
                    let from = stack.iter().position(|&(p, _)| p == j).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[from..]
                        .iter()
                        .map(|&(p, _)| nodes[p].id.clone())
                        .collect();
                    cycle.push(nodes[j].id.clone());
                    return Some(cycle);
                }
                Color::Unvisited => {
                    colors[j] = Color::Visiting;
                    stack.push((j, 0));
                }
                Color::Visited => {}
            }
        }
    }
    None
}
