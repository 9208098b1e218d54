use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use anyhow::{anyhow, bail, Result};
use uuid::Uuid;

use crate::tensor::DType;
use crate::types::DeviceId;

/// Category of a symbol-table entry. Only placeholders participate in the
/// engine's binding machinery; constants are resolved by device managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolCategory {
    Placeholder,
    Constant,
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub category: SymbolCategory,
    pub dtype: DType,
}

/// Per-node compilation artifact metadata: the symbols a node's compiled
/// function reads and writes.
#[derive(Debug, Clone, Default)]
pub struct RuntimeBundle {
    symbols: HashMap<String, SymbolInfo>,
}

impl RuntimeBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placeholder(mut self, name: impl Into<String>, dtype: DType) -> Self {
        self.symbols.insert(
            name.into(),
            SymbolInfo {
                category: SymbolCategory::Placeholder,
                dtype,
            },
        );
        self
    }

    pub fn with_constant(mut self, name: impl Into<String>, dtype: DType) -> Self {
        self.symbols.insert(
            name.into(),
            SymbolInfo {
                category: SymbolCategory::Constant,
                dtype,
            },
        );
        self
    }

    pub fn symbols(&self) -> impl Iterator<Item = (&str, &SymbolInfo)> {
        self.symbols.iter().map(|(name, info)| (name.as_str(), info))
    }

    pub fn symbol(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.get(name)
    }
}

/// A unit of device-executable work within a run, plus its parent/child
/// relationships. Edges are sealed by [`DagBuilder::build`].
#[derive(Debug)]
pub struct Node {
    name: String,
    uuid: Uuid,
    bundle: RuntimeBundle,
    devices: Vec<DeviceId>,
    device_cursor: AtomicUsize,
    children: OnceLock<Vec<Arc<Node>>>,
    parents: OnceLock<Vec<Weak<Node>>>,
}

impl Node {
    fn new(name: String, bundle: RuntimeBundle, devices: Vec<DeviceId>) -> Self {
        Self {
            name,
            uuid: Uuid::new_v4(),
            bundle,
            devices,
            device_cursor: AtomicUsize::new(0),
            children: OnceLock::new(),
            parents: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn bundle(&self) -> &RuntimeBundle {
        &self.bundle
    }

    pub fn children(&self) -> &[Arc<Node>] {
        self.children.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent_count(&self) -> usize {
        self.parents.get().map(Vec::len).unwrap_or(0)
    }

    /// Rotate over the node's assigned devices. Called exactly once per node
    /// execution.
    pub fn next_device(&self) -> DeviceId {
        let cursor = self.device_cursor.fetch_add(1, Ordering::Relaxed);
        *self
            .devices
            .get(cursor % self.devices.len().max(1))
            .expect("node has no assigned devices")
    }

    pub fn describe(&self) -> String {
        format!(
            "{} [{}] devices({})",
            self.name,
            self.uuid,
            self.devices
                .iter()
                .map(|device| device.to_string())
                .collect::<Vec<_>>()
                .join(",")
        )
    }
}

/// A validated computation graph. `root` is a sentinel: it is never executed,
/// only its children are scheduled.
#[derive(Debug)]
pub struct Dag {
    root: Arc<Node>,
}

impl Dag {
    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }
}

struct PendingNode {
    bundle: RuntimeBundle,
    devices: Vec<DeviceId>,
}

/// Builds a [`Dag`] from named nodes, parent to child edges, and an explicit
/// set of entry nodes.
///
/// Declared entries become the root sentinel's children. Build rejects
/// duplicate names, unknown edge targets, duplicate edges, entries with
/// parents, dependency cycles, and nodes unreachable from the entry set.
#[derive(Default)]
pub struct DagBuilder {
    nodes: HashMap<String, PendingNode>,
    order: Vec<String>,
    edges: Vec<(String, String)>,
    entries: Vec<String>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: &str,
        bundle: RuntimeBundle,
        devices: &[DeviceId],
    ) -> Result<()> {
        if self.nodes.contains_key(name) {
            bail!("duplicate node name: {}", name);
        }
        if devices.is_empty() {
            bail!("node {} has no assigned devices", name);
        }
        self.nodes.insert(
            name.to_string(),
            PendingNode {
                bundle,
                devices: devices.to_vec(),
            },
        );
        self.order.push(name.to_string());
        Ok(())
    }

    pub fn add_edge(&mut self, parent: &str, child: &str) -> Result<()> {
        if !self.nodes.contains_key(parent) {
            bail!("unknown edge parent: {}", parent);
        }
        if !self.nodes.contains_key(child) {
            bail!("unknown edge child: {}", child);
        }
        if parent == child {
            bail!("self edge on node: {}", parent);
        }
        let edge = (parent.to_string(), child.to_string());
        if self.edges.contains(&edge) {
            bail!("duplicate edge: {} -> {}", parent, child);
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Declare `name` as an entry node: a child of the root sentinel,
    /// dispatched as soon as the run starts.
    pub fn add_entry(&mut self, name: &str) -> Result<()> {
        if !self.nodes.contains_key(name) {
            bail!("unknown entry node: {}", name);
        }
        if self.entries.iter().any(|entry| entry == name) {
            bail!("duplicate entry node: {}", name);
        }
        self.entries.push(name.to_string());
        Ok(())
    }

    pub fn build(mut self) -> Result<Dag> {
        if self.entries.is_empty() && !self.order.is_empty() {
            bail!("dag has no entry nodes");
        }
        for entry in &self.entries {
            if self.edges.iter().any(|(_, child)| child == entry) {
                bail!("entry node {} has parents", entry);
            }
        }
        self.check_acyclic()?;
        self.check_reachable()?;

        let arcs: HashMap<String, Arc<Node>> = self
            .order
            .iter()
            .map(|name| {
                let pending = self.nodes.remove(name).expect("pending node missing");
                (
                    name.clone(),
                    Arc::new(Node::new(name.clone(), pending.bundle, pending.devices)),
                )
            })
            .collect();

        let mut children: HashMap<&str, Vec<Arc<Node>>> = HashMap::new();
        let mut parents: HashMap<&str, Vec<Weak<Node>>> = HashMap::new();
        for (parent, child) in &self.edges {
            children
                .entry(parent.as_str())
                .or_default()
                .push(Arc::clone(&arcs[child]));
            parents
                .entry(child.as_str())
                .or_default()
                .push(Arc::downgrade(&arcs[parent]));
        }

        for name in &self.order {
            let node = &arcs[name];
            node.children
                .set(children.remove(name.as_str()).unwrap_or_default())
                .expect("node children already sealed");
            node.parents
                .set(parents.remove(name.as_str()).unwrap_or_default())
                .expect("node parents already sealed");
        }

        let entries: Vec<Arc<Node>> = self
            .entries
            .iter()
            .map(|name| Arc::clone(&arcs[name]))
            .collect();

        let root = Arc::new(Node::new(
            "root".to_string(),
            RuntimeBundle::new(),
            Vec::new(),
        ));
        root.children.set(entries).expect("root already sealed");
        root.parents.set(Vec::new()).expect("root already sealed");

        Ok(Dag { root })
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|name| (name.as_str(), 0))
            .collect();
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for (parent, child) in &self.edges {
            *in_degree
                .get_mut(child.as_str())
                .ok_or_else(|| anyhow!("unknown edge child: {}", child))? += 1;
            outgoing
                .entry(parent.as_str())
                .or_default()
                .push(child.as_str());
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut visited = 0usize;
        while let Some(name) = queue.pop_front() {
            visited += 1;
            for &child in outgoing.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                let degree = in_degree.get_mut(child).expect("in-degree entry missing");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(child);
                }
            }
        }

        if visited != self.order.len() {
            bail!("dependency cycle in dag ({} of {} nodes reachable)", visited, self.order.len());
        }
        Ok(())
    }

    /// Every node must be reachable from a declared entry; an unwired node
    /// must fail the build instead of silently never executing.
    fn check_reachable(&self) -> Result<()> {
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for (parent, child) in &self.edges {
            outgoing
                .entry(parent.as_str())
                .or_default()
                .push(child.as_str());
        }

        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.entries.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if !reached.insert(name) {
                continue;
            }
            for &child in outgoing.get(name).map(Vec::as_slice).unwrap_or(&[]) {
                if !reached.contains(child) {
                    queue.push_back(child);
                }
            }
        }

        for name in &self.order {
            if !reached.contains(name.as_str()) {
                bail!("node {} unreachable from entry nodes", name);
            }
        }
        Ok(())
    }
}
