//! Pod scheduler core: the single-pod scheduling loop and atomic gang
//! (`PodGroupSet`) placement over the topology.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cache::ObserverCache;
use crate::controller::PipelineController;
use crate::error::CortexError;
use crate::models::{PipelineRequest, Placement, PodGroupSet, ResourceKind, Resources};
use crate::queue::SchedulingQueue;
use crate::topology::Topology;

/// A pod waiting to be scheduled: name plus the resources it requests.
/// Registered out-of-band (by whatever watches the upstream pod API) before
/// its key is enqueued.
#[derive(Debug, Clone)]
pub struct PendingPod {
    pub namespace: String,
    pub name: String,
    pub resources: Resources,
}

impl PendingPod {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// The external authoritative bind call (e.g. the source cluster's own
/// binding API). Not shipped by this crate.
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(&self, pod_name: &str, node_name: &str) -> anyhow::Result<()>;
}

pub struct NullBinder;

#[async_trait]
impl Binder for NullBinder {
    async fn bind(&self, _pod_name: &str, _node_name: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Bound { pod_name: String, node_name: String },
    Unschedulable { pod_name: String },
    Requeued { pod_name: String },
    QueueShutDown,
}

pub struct PodScheduler {
    queue: Arc<SchedulingQueue>,
    cache: Arc<ObserverCache>,
    controller: Arc<PipelineController>,
    binder: Arc<dyn Binder>,
    pending: RwLock<HashMap<String, PendingPod>>,
    /// Single placement arbiter: every cache-mutating placement decision,
    /// single-pod or gang, serializes through this lock so the two paths
    /// never race over the same optimistic reservations.
    placement_lock: Mutex<()>,
}

impl PodScheduler {
    pub fn new(
        queue: Arc<SchedulingQueue>,
        cache: Arc<ObserverCache>,
        controller: Arc<PipelineController>,
        binder: Arc<dyn Binder>,
    ) -> Self {
        Self {
            queue,
            cache,
            controller,
            binder,
            pending: RwLock::new(HashMap::new()),
            placement_lock: Mutex::new(()),
        }
    }

    pub async fn register_pending(&self, pod: PendingPod) {
        self.pending.write().await.insert(pod.key(), pod);
    }

    /// Runs `schedule_one` in a loop until `cancellation` fires. `Get` itself
    /// only returns on a queue shutdown, so every blocking wait here also
    /// races the cancellation token to give callers a responsive stop path
    /// independent of the queue's own lifecycle.
    pub async fn run(&self, pipeline_name: &str, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    log::debug!("pod scheduler loop cancelled");
                    return;
                }
                outcome = self.schedule_one(pipeline_name) => {
                    match outcome {
                        Ok(ScheduleOutcome::QueueShutDown) => return,
                        Ok(_) => {}
                        Err(e) => log::warn!("schedule_one failed: {e}"),
                    }
                }
            }
        }
    }

    /// Runs one iteration of the single-pod scheduling loop: `Get` the next
    /// queue item, run the pipeline against the current node snapshot,
    /// assume-bind and issue the external bind call.
    pub async fn schedule_one(&self, pipeline_name: &str) -> Result<ScheduleOutcome, CortexError> {
        let Some(item) = self.queue.get().await else {
            return Ok(ScheduleOutcome::QueueShutDown);
        };
        let key = item.key();

        let Some(spec) = self.pending.read().await.get(&key).cloned() else {
            self.queue.add_backoff(&key).await;
            return Ok(ScheduleOutcome::Requeued { pod_name: item.name });
        };

        let _guard = self.placement_lock.lock().await;

        let pipeline = self
            .controller
            .get(pipeline_name)
            .ok_or_else(|| CortexError::Config(format!("unknown pipeline {pipeline_name}")))?;

        let nodes = self.cache.list_nodes().await;
        let subjects = nodes.iter().map(|n| n.name.clone()).collect();
        let request = PipelineRequest::new(pipeline_name, ResourceKind::Pod, subjects);
        let result = pipeline.run(request).await?;

        match result.target_host {
            None => {
                log::warn!(
                    "FailedScheduling: pod {key} had {} candidate(s), none selected",
                    result.ordered_hosts.len()
                );
                self.queue.add_unschedulable(&key).await;
                Ok(ScheduleOutcome::Unschedulable { pod_name: spec.name })
            }
            Some(target) => {
                self.cache.add_pod(&spec.name, &target, spec.resources.clone()).await;
                match self.binder.bind(&spec.name, &target).await {
                    Ok(()) => {
                        self.pending.write().await.remove(&key);
                        self.queue.done(&key).await;
                        log::debug!("bound pod {} to {target}", spec.name);
                        Ok(ScheduleOutcome::Bound {
                            pod_name: spec.name,
                            node_name: target,
                        })
                    }
                    Err(e) => {
                        self.cache.delete_pod(&spec.name).await;
                        self.queue.add_backoff(&key).await;
                        Err(CortexError::BindFailure(e.to_string()))
                    }
                }
            }
        }
    }

    /// Atomic gang placement: sums requested resources across all replicas,
    /// walks the topology coarsest-to-finest, and for the first level with a
    /// feasible candidate commits every replica's placement. No partial
    /// progress is left behind on failure.
    pub async fn process_pod_group_set(
        &self,
        gang: &PodGroupSet,
        pipeline_name: &str,
        topology: &Topology,
    ) -> Result<Vec<Placement>, CortexError> {
        let _guard = self.placement_lock.lock().await;

        let mut total = Resources::new();
        for group in &gang.groups {
            for _ in 0..group.replicas {
                total = &total + &group.resources;
            }
        }

        for level in topology.levels_coarsest_to_finest() {
            let mut best: Option<(Vec<(Placement, Resources)>, f64)> = None;

            for topo_node in topology.nodes_at(level) {
                if !total.fits_within(&topo_node.allocatable) {
                    continue;
                }

                let mut local_pool: HashMap<String, Resources> = HashMap::new();
                for leaf in &topo_node.leaf_nodes {
                    if let Some(node) = self.cache.get_node(leaf).await {
                        local_pool.insert(leaf.clone(), node.allocatable.clone());
                    }
                }

                let Some((placements, weight)) =
                    self.place_gang_against_pool(gang, pipeline_name, local_pool).await
                else {
                    continue;
                };

                let take = match &best {
                    None => true,
                    Some((_, best_weight)) => weight > *best_weight,
                };
                if take {
                    best = Some((placements, weight));
                }
            }

            if let Some((placements, _weight)) = best {
                return self.commit_gang_placements(placements).await;
            }
        }

        log::warn!("FailedScheduling: gang {} infeasible at every topology level", gang.key());
        Err(CortexError::BindFailure(format!(
            "no topology level had capacity for gang {}",
            gang.key()
        )))
    }

    /// Runs every replica of every group against a shrinking local pool
    /// copy, subtracting each chosen placement's resources before the next
    /// replica runs. A replica with no target aborts this whole candidate.
    async fn place_gang_against_pool(
        &self,
        gang: &PodGroupSet,
        pipeline_name: &str,
        mut local_pool: HashMap<String, Resources>,
    ) -> Option<(Vec<(Placement, Resources)>, f64)> {
        let pipeline = self.controller.get(pipeline_name)?;
        let mut placements = Vec::new();
        let mut weight = 0.0;

        for group in &gang.groups {
            for replica in 0..group.replicas {
                // Narrow to pool members the replica still fits in before
                // ranking: pipeline steps score preference among feasible
                // subjects, they don't see the local pool's resource levels.
                let subjects: Vec<String> = local_pool
                    .iter()
                    .filter(|(_, res)| group.resources.fits_within(res))
                    .map(|(name, _)| name.clone())
                    .collect();
                if subjects.is_empty() {
                    return None;
                }
                let request = PipelineRequest::new(pipeline_name, ResourceKind::Pod, subjects);
                let result = pipeline.run(request).await.ok()?;
                let target = result.target_host?;

                if let Some(pool) = local_pool.get_mut(&target) {
                    *pool = &*pool - &group.resources;
                }
                weight += result.aggregated_out_weights.get(&target).copied().unwrap_or(0.0);
                placements.push((
                    Placement {
                        pod_name: format!("{}-{}-{replica}", gang.name, group.name),
                        node_name: target,
                    },
                    group.resources.clone(),
                ));
            }
        }

        Some((placements, weight))
    }

    async fn commit_gang_placements(
        &self,
        placements: Vec<(Placement, Resources)>,
    ) -> Result<Vec<Placement>, CortexError> {
        let mut committed = Vec::with_capacity(placements.len());
        for (placement, resources) in &placements {
            self.cache.add_pod(&placement.pod_name, &placement.node_name, resources.clone()).await;
            match self.binder.bind(&placement.pod_name, &placement.node_name).await {
                Ok(()) => committed.push(placement.clone()),
                Err(e) => {
                    for done in &committed {
                        self.cache.delete_pod(&done.pod_name).await;
                    }
                    self.cache.delete_pod(&placement.pod_name).await;
                    return Err(CortexError::BindFailure(e.to_string()));
                }
            }
        }
        Ok(committed)
    }
}
