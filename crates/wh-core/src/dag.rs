use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{CoreError, Result};
use crate::script::Script;
use crate::table_ref::TableRef;

/// The dependency graph over a set of scripts (sourced and synthetic). Edges
/// run dependency -> dependent, so a topological walk of the graph visits
/// dependencies before the scripts that need them.
pub struct DagOfScripts {
    graph: DiGraph<TableRef, ()>,
    index: HashMap<TableRef, NodeIndex>,
    scripts: HashMap<TableRef, Script>,
}

impl DagOfScripts {
    /// Build the DAG from every script (including synthetic assertion
    /// tests). Dependencies that don't resolve to another script in the set
    /// are treated as external tables: they get a node (so selectors and
    /// ancestor walks still work against them) but no script is attached.
    pub fn build(scripts: Vec<Script>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index: HashMap<TableRef, NodeIndex> = HashMap::new();
        let mut scripts_by_ref: HashMap<TableRef, Script> = HashMap::new();

        let mut ensure_node = |graph: &mut DiGraph<TableRef, ()>,
                                index: &mut HashMap<TableRef, NodeIndex>,
                                table_ref: &TableRef| {
            if let Some(idx) = index.get(table_ref) {
                *idx
            } else {
                let idx = graph.add_node(table_ref.clone());
                index.insert(table_ref.clone(), idx);
                idx
            }
        };

        for script in &scripts {
            if scripts_by_ref.contains_key(&script.table_ref) {
                return Err(CoreError::DuplicateTable(script.table_ref.clone()));
            }
            ensure_node(&mut graph, &mut index, &script.table_ref);
        }
        for script in scripts {
            let dependent_idx = ensure_node(&mut graph, &mut index, &script.table_ref);
            for dep in &script.dependencies {
                let dep_idx = ensure_node(&mut graph, &mut index, dep);
                graph.add_edge(dep_idx, dependent_idx, ());
            }
            scripts_by_ref.insert(script.table_ref.clone(), script);
        }

        let dag = Self {
            graph,
            index,
            scripts: scripts_by_ref,
        };
        dag.check_acyclic()?;
        Ok(dag)
    }

    fn check_acyclic(&self) -> Result<()> {
        if let Err(cycle) = petgraph::algo::toposort(&self.graph, None) {
            let node = self.graph[cycle.node_id()].clone();
            return Err(CoreError::CircularDependency(node));
        }
        Ok(())
    }

    pub fn contains(&self, table_ref: &TableRef) -> bool {
        self.index.contains_key(table_ref)
    }

    pub fn is_script(&self, table_ref: &TableRef) -> bool {
        self.scripts.contains_key(table_ref)
    }

    pub fn get_script(&self, table_ref: &TableRef) -> Option<&Script> {
        self.scripts.get(table_ref)
    }

    pub fn scripts(&self) -> impl Iterator<Item = &Script> {
        self.scripts.values()
    }

    pub fn table_refs(&self) -> impl Iterator<Item = &TableRef> {
        self.index.keys()
    }

    pub fn dependencies(&self, table_ref: &TableRef) -> Vec<TableRef> {
        let Some(&idx) = self.index.get(table_ref) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| self.graph[e.source()].clone())
            .collect()
    }

    pub fn dependents(&self, table_ref: &TableRef) -> Vec<TableRef> {
        let Some(&idx) = self.index.get(table_ref) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| self.graph[e.target()].clone())
            .collect()
    }

    pub fn ancestors(&self, table_ref: &TableRef) -> HashSet<TableRef> {
        let mut seen = HashSet::new();
        let mut stack: Vec<TableRef> = self.dependencies(table_ref);
        while let Some(node) = stack.pop() {
            if seen.insert(node.clone()) {
                stack.extend(self.dependencies(&node));
            }
        }
        seen
    }

    pub fn descendants(&self, table_ref: &TableRef) -> HashSet<TableRef> {
        let mut seen = HashSet::new();
        let mut stack: Vec<TableRef> = self.dependents(table_ref);
        while let Some(node) = stack.pop() {
            if seen.insert(node.clone()) {
                stack.extend(self.dependents(&node));
            }
        }
        seen
    }

    pub fn topological_order(&self) -> Vec<TableRef> {
        petgraph::algo::toposort(&self.graph, None)
            .expect("acyclic by construction")
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }
}

/// Drives a selected subset of the DAG one layer of readiness at a time,
/// mirroring a get_ready()/done() consumption loop: the caller asks what's
/// ready, starts work on it, and reports completion as work finishes, which
/// may unblock more nodes before the previous batch is done. This lets
/// independent scripts interleave freely instead of waiting on a level
/// barrier.
pub struct Scheduler {
    selected: HashSet<TableRef>,
    remaining_deps: HashMap<TableRef, usize>,
    dependents: HashMap<TableRef, Vec<TableRef>>,
    emitted: HashSet<TableRef>,
    done: HashSet<TableRef>,
}

impl Scheduler {
    pub fn new(dag: &DagOfScripts, selected: HashSet<TableRef>) -> Self {
        let mut remaining_deps = HashMap::new();
        let mut dependents: HashMap<TableRef, Vec<TableRef>> = HashMap::new();

        for node in &selected {
            let deps_in_selection: Vec<TableRef> = dag
                .dependencies(node)
                .into_iter()
                .filter(|d| selected.contains(d))
                .collect();
            remaining_deps.insert(node.clone(), deps_in_selection.len());
            for dep in deps_in_selection {
                dependents.entry(dep).or_default().push(node.clone());
            }
        }

        Self {
            selected,
            remaining_deps,
            dependents,
            emitted: HashSet::new(),
            done: HashSet::new(),
        }
    }

    /// All selected nodes whose dependencies are fully done and which
    /// haven't been handed out yet.
    pub fn ready(&mut self) -> Vec<TableRef> {
        let ready: Vec<TableRef> = self
            .remaining_deps
            .iter()
            .filter(|(node, &deps)| deps == 0 && !self.emitted.contains(*node))
            .map(|(node, _)| node.clone())
            .collect();
        for node in &ready {
            self.emitted.insert(node.clone());
        }
        ready
    }

    /// Mark a node as finished, potentially unblocking its dependents.
    pub fn done(&mut self, node: &TableRef) {
        self.done.insert(node.clone());
        if let Some(dependents) = self.dependents.get(node) {
            for dependent in dependents {
                if let Some(count) = self.remaining_deps.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done.len() == self.selected.len()
    }

    pub fn selected(&self) -> &HashSet<TableRef> {
        &self.selected
    }
}

#[cfg(test)]
#[path = "dag_test.rs"]
mod tests;
