//! Topology: a fixed level chain `cluster -> ...configured levels... -> node`,
//! rebuilt from the observer cache's node list whenever it changes. Each
//! level aggregates capacity/allocatable as the elementwise sum of its
//! children.

use std::collections::HashMap;

use crate::models::{Node, Resources, TopologyNode};

const LABEL_PREFIX: &str = "topology.cortex.io/";

/// Ordered, coarsest-to-finest list of level names between the implicit
/// root ("cluster") and individual nodes, e.g. `["zone", "rack"]`.
pub struct Topology {
    levels: Vec<String>,
    /// level name -> (topology-node name -> aggregate)
    by_level: HashMap<String, HashMap<String, TopologyNode>>,
}

impl Topology {
    pub fn new(levels: Vec<String>) -> Self {
        Self {
            levels,
            by_level: HashMap::new(),
        }
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Coarsest-to-finest order, for the gang placement walk which the spec
    /// describes as iterating backward (coarsest-to-finest) over levels.
    pub fn levels_coarsest_to_finest(&self) -> impl Iterator<Item = &String> {
        self.levels.iter()
    }

    fn chain_for(&self, node: &Node) -> Vec<(String, String)> {
        let mut chain = Vec::new();
        for level in &self.levels {
            let key = format!("{LABEL_PREFIX}{level}");
            match node.labels.get(&key) {
                Some(name) => chain.push((level.clone(), name.clone())),
                None => break,
            }
        }
        chain
    }

    /// Rebuilds every level's aggregate from the current node snapshot. Any
    /// node missing a level's label stops its own chain at that level (it
    /// contributes to coarser levels below that point but not above).
    pub fn rebuild(&mut self, nodes: &[Node]) {
        self.by_level.clear();
        for level in &self.levels {
            self.by_level.insert(level.clone(), HashMap::new());
        }

        for node in nodes {
            let chain = self.chain_for(node);
            let mut child_name = node.name.clone();

            for (level, name) in chain.iter().rev() {
                let level_map = self.by_level.entry(level.clone()).or_default();
                let entry = level_map.entry(name.clone()).or_insert_with(|| TopologyNode {
                    level: level.clone(),
                    name: name.clone(),
                    capacity: Resources::new(),
                    allocatable: Resources::new(),
                    children: Vec::new(),
                    leaf_nodes: Vec::new(),
                });
                entry.capacity = &entry.capacity + &node.capacity;
                entry.allocatable = &entry.allocatable + &node.allocatable;
                if !entry.children.contains(&child_name) {
                    entry.children.push(child_name.clone());
                }
                if !entry.leaf_nodes.contains(&node.name) {
                    entry.leaf_nodes.push(node.name.clone());
                }
                child_name = name.clone();
            }
        }
    }

    pub fn get(&self, level: &str, name: &str) -> Option<&TopologyNode> {
        self.by_level.get(level)?.get(name)
    }

    /// All topology nodes at `level`, in first-seen (insertion) order —
    /// the tie-break order gang placement uses among equally-weighted
    /// candidates.
    pub fn nodes_at(&self, level: &str) -> Vec<&TopologyNode> {
        self.by_level.get(level).map(|m| m.values().collect()).unwrap_or_default()
    }
}
