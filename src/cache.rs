//! Observer cache: an in-memory mirror of nodes and bound pods, built from
//! an event stream (`add_node`/`update_node`/`delete_node`/`add_pod`/
//! `update_pod`/`delete_pod`).

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::{Node, Resources};

/// Well-known taints/labels that mark a node as control-plane rather than a
/// schedulable worker. Mirrors the Kubernetes convention without depending
/// on a Kubernetes client crate.
const CONTROL_PLANE_TAINT: &str = "node-role.kubernetes.io/control-plane";
const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

fn is_control_plane(node: &Node) -> bool {
    node.taints.iter().any(|t| t == CONTROL_PLANE_TAINT)
        || node.labels.contains_key(CONTROL_PLANE_LABEL)
}

#[derive(Debug, Clone)]
struct PodBinding {
    node_name: String,
    resources: Resources,
}

struct Inner {
    nodes: HashMap<String, Node>,
    pods: HashMap<String, PodBinding>,
}

/// In-memory mirror of the observer cache. Reads take a shared lock (used at
/// the top of a pipeline run); mutation events take an exclusive lock.
pub struct ObserverCache {
    inner: RwLock<Inner>,
}

impl Default for ObserverCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                nodes: HashMap::new(),
                pods: HashMap::new(),
            }),
        }
    }

    /// `false` if the node was filtered out as control-plane.
    pub async fn add_node(&self, node: Node) -> bool {
        if is_control_plane(&node) {
            log::debug!("ignoring control-plane node {}", node.name);
            return false;
        }
        self.inner.write().await.nodes.insert(node.name.clone(), node);
        true
    }

    /// Replace, never merge: an update is a delete of the prior image
    /// followed by an insert of the new one.
    pub async fn update_node(&self, node: Node) -> bool {
        let mut guard = self.inner.write().await;
        guard.nodes.remove(&node.name);
        if is_control_plane(&node) {
            return false;
        }
        guard.nodes.insert(node.name.clone(), node);
        true
    }

    pub async fn delete_node(&self, name: &str) {
        self.inner.write().await.nodes.remove(name);
    }

    pub async fn get_node(&self, name: &str) -> Option<Node> {
        self.inner.read().await.nodes.get(name).cloned()
    }

    pub async fn list_nodes(&self) -> Vec<Node> {
        self.inner.read().await.nodes.values().cloned().collect()
    }

    /// Optimistic assume-bind: subtracts `resources` from the node's
    /// allocatable and records the pod as bound, ahead of the authoritative
    /// external bind call.
    pub async fn add_pod(&self, pod_name: &str, node_name: &str, resources: Resources) -> bool {
        let mut guard = self.inner.write().await;
        let Some(node) = guard.nodes.get_mut(node_name) else {
            return false;
        };
        node.allocatable = &node.allocatable - &resources;
        node.bound_pods.push(pod_name.to_string());
        guard.pods.insert(
            pod_name.to_string(),
            PodBinding {
                node_name: node_name.to_string(),
                resources,
            },
        );
        true
    }

    /// Reconciles an authoritative update for a pod that may already have an
    /// assumed binding. If `new_node_name` matches the existing assumed
    /// binding, this is a no-op (already accounted for); otherwise the old
    /// binding's resources are returned to its node and the new one is
    /// applied.
    pub async fn update_pod(
        &self,
        pod_name: &str,
        new_node_name: Option<&str>,
        resources: Resources,
    ) {
        let mut guard = self.inner.write().await;
        let previous = guard.pods.get(pod_name).cloned();

        if let (Some(prev), Some(new_name)) = (&previous, new_node_name) {
            if prev.node_name == new_name {
                return;
            }
        }

        if let Some(prev) = &previous {
            if let Some(node) = guard.nodes.get_mut(&prev.node_name) {
                node.allocatable = &node.allocatable + &prev.resources;
                node.bound_pods.retain(|p| p != pod_name);
            }
            guard.pods.remove(pod_name);
        }

        if let Some(new_name) = new_node_name {
            if let Some(node) = guard.nodes.get_mut(new_name) {
                node.allocatable = &node.allocatable - &resources;
                node.bound_pods.push(pod_name.to_string());
                guard.pods.insert(
                    pod_name.to_string(),
                    PodBinding {
                        node_name: new_name.to_string(),
                        resources,
                    },
                );
            }
        }
    }

    /// Returns the bound resources to the node's allocatable and forgets
    /// the pod.
    pub async fn delete_pod(&self, pod_name: &str) {
        let mut guard = self.inner.write().await;
        if let Some(binding) = guard.pods.remove(pod_name) {
            if let Some(node) = guard.nodes.get_mut(&binding.node_name) {
                node.allocatable = &node.allocatable + &binding.resources;
                node.bound_pods.retain(|p| p != pod_name);
            }
        }
    }

    pub async fn pod_node(&self, pod_name: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .pods
            .get(pod_name)
            .map(|b| b.node_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn node(name: &str, cpu: f64) -> Node {
        Node {
            name: name.to_string(),
            labels: Map::new(),
            taints: Vec::new(),
            capacity: Resources(Map::from([("cpu".to_string(), cpu)])),
            allocatable: Resources(Map::from([("cpu".to_string(), cpu)])),
            bound_pods: Vec::new(),
        }
    }

    fn resources(cpu: f64) -> Resources {
        Resources(Map::from([("cpu".to_string(), cpu)]))
    }

    #[tokio::test]
    async fn control_plane_node_is_filtered_out() {
        let cache = ObserverCache::new();
        let mut cp = node("master", 4.0);
        cp.taints.push(CONTROL_PLANE_TAINT.to_string());
        assert!(!cache.add_node(cp).await);
        assert!(cache.get_node("master").await.is_none());
    }

    #[tokio::test]
    async fn assume_bind_subtracts_allocatable() {
        let cache = ObserverCache::new();
        cache.add_node(node("n1", 4.0)).await;
        cache.add_pod("p1", "n1", resources(1.0)).await;
        let n = cache.get_node("n1").await.unwrap();
        assert_eq!(n.allocatable.get("cpu"), 3.0);
        assert_eq!(n.bound_pods, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn update_pod_is_noop_when_node_unchanged() {
        let cache = ObserverCache::new();
        cache.add_node(node("n1", 4.0)).await;
        cache.add_pod("p1", "n1", resources(1.0)).await;
        cache.update_pod("p1", Some("n1"), resources(1.0)).await;
        let n = cache.get_node("n1").await.unwrap();
        assert_eq!(n.allocatable.get("cpu"), 3.0);
    }

    #[tokio::test]
    async fn delete_pod_returns_resources() {
        let cache = ObserverCache::new();
        cache.add_node(node("n1", 4.0)).await;
        cache.add_pod("p1", "n1", resources(1.0)).await;
        cache.delete_pod("p1").await;
        let n = cache.get_node("n1").await.unwrap();
        assert_eq!(n.allocatable.get("cpu"), 4.0);
        assert!(n.bound_pods.is_empty());
    }
}
