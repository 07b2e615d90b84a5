// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.


//! Shared state of one application master: configuration, the entity registries and the
//! collaborators handlers need. Entities are locked individually; a handler clones the
//! entity `Arc` out of its registry before taking the entity lock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;

use strata_core::error::{Result, StrataError};
use strata_core::ids::{ContainerId, DagId, TaskAttemptId, TaskId, VertexId};

use crate::config::SchedulerConfig;
use crate::dag::execution_dag::Dag;
use crate::dag::runtime_event::RuntimeEvent;
use crate::dag::task::Task;
use crate::dag::task_attempt::{TaskAttempt, TaskAttemptState};
use crate::dag::vertex::Vertex;
use crate::dag::DagState;
use crate::event::Event;
use crate::heartbeat::HeartbeatTracker;
use crate::metrics::SchedulerMetricsCollector;
use crate::rm::container::am_container::{AMContainer, PullResponse};
use crate::rm::container::launch_context::LaunchContextCache;
use crate::rm::node_map::AMNodeMap;
use crate::rm::rack_resolver::RackResolver;

/// Source of wall-clock time in milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Default)]
pub struct SystemClock {}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        strata_core::timestamp_millis()
    }
}

/// Last published state of the current DAG.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DagStatus {
    pub dag_id: DagId,
    pub state: DagState,
}

pub struct AppContext {
    config: Arc<SchedulerConfig>,
    app_id: u64,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn SchedulerMetricsCollector>,
    current_dag_id: RwLock<Option<DagId>>,
    dags: DashMap<DagId, Arc<RwLock<Dag>>>,
    vertices: DashMap<VertexId, Arc<RwLock<Vertex>>>,
    tasks: DashMap<TaskId, Arc<RwLock<Task>>>,
    attempts: DashMap<TaskAttemptId, Arc<RwLock<TaskAttempt>>>,
    containers: DashMap<ContainerId, Arc<RwLock<AMContainer>>>,
    rack_resolver: Arc<RackResolver>,
    node_map: Arc<AMNodeMap>,
    heartbeats: Arc<HeartbeatTracker>,
    launch_contexts: LaunchContextCache,
    dag_status: watch::Sender<Option<DagStatus>>,
}

impl AppContext {
    pub fn new(
        config: Arc<SchedulerConfig>,
        app_id: u64,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn SchedulerMetricsCollector>,
    ) -> Self {
        let rack_resolver = Arc::new(RackResolver::new(config.host_racks.clone()));
        let node_map = Arc::new(AMNodeMap::new(&config));
        let heartbeats = Arc::new(HeartbeatTracker::new(config.task_heartbeat_timeout_ms));
        let (dag_status, _) = watch::channel(None);
        Self {
            config,
            app_id,
            clock,
            metrics,
            current_dag_id: RwLock::new(None),
            dags: DashMap::new(),
            vertices: DashMap::new(),
            tasks: DashMap::new(),
            attempts: DashMap::new(),
            containers: DashMap::new(),
            rack_resolver,
            node_map,
            heartbeats,
            launch_contexts: LaunchContextCache::default(),
            dag_status,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn app_id(&self) -> u64 {
        self.app_id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn metrics(&self) -> &Arc<dyn SchedulerMetricsCollector> {
        &self.metrics
    }

    pub fn rack_resolver(&self) -> &Arc<RackResolver> {
        &self.rack_resolver
    }

    pub fn node_map(&self) -> &Arc<AMNodeMap> {
        &self.node_map
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatTracker> {
        &self.heartbeats
    }

    pub fn launch_contexts(&self) -> &LaunchContextCache {
        &self.launch_contexts
    }

    /// Makes `dag` the current DAG. Entities of earlier DAGs are dropped.
    pub fn set_current_dag(&self, dag: Dag) -> Arc<RwLock<Dag>> {
        let dag_id = dag.id();
        let previous = self.current_dag_id.write().replace(dag_id);
        if let Some(previous) = previous {
            self.forget_dag(previous);
        }
        let dag = Arc::new(RwLock::new(dag));
        self.dags.insert(dag_id, dag.clone());
        dag
    }

    pub fn current_dag_id(&self) -> Option<DagId> {
        *self.current_dag_id.read()
    }

    pub fn dag(&self, dag_id: DagId) -> Result<Arc<RwLock<Dag>>> {
        self.dags
            .get(&dag_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| StrataError::UnknownEntity(dag_id.to_string()))
    }

    pub fn current_dag(&self) -> Result<Arc<RwLock<Dag>>> {
        let dag_id = self.current_dag_id().ok_or_else(|| {
            StrataError::UnknownEntity("no DAG has been submitted".to_owned())
        })?;
        self.dag(dag_id)
    }

    pub fn register_vertex(&self, vertex: Vertex) {
        self.vertices
            .insert(vertex.id(), Arc::new(RwLock::new(vertex)));
    }

    pub fn vertex(&self, vertex_id: VertexId) -> Result<Arc<RwLock<Vertex>>> {
        self.vertices
            .get(&vertex_id)
            .map(|v| v.value().clone())
            .ok_or_else(|| StrataError::UnknownEntity(vertex_id.to_string()))
    }

    /// Vertices of `dag_id` in ID order.
    pub fn vertex_ids(&self, dag_id: DagId) -> Vec<VertexId> {
        let mut ids: Vec<VertexId> = self
            .vertices
            .iter()
            .map(|v| *v.key())
            .filter(|id| id.dag_id == dag_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn register_task(&self, task: Task) {
        self.tasks.insert(task.id(), Arc::new(RwLock::new(task)));
    }

    pub fn task(&self, task_id: TaskId) -> Result<Arc<RwLock<Task>>> {
        self.tasks
            .get(&task_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| StrataError::UnknownEntity(task_id.to_string()))
    }

    pub fn register_attempt(&self, attempt: TaskAttempt) {
        self.attempts
            .insert(attempt.id(), Arc::new(RwLock::new(attempt)));
    }

    pub fn attempt(&self, attempt_id: TaskAttemptId) -> Result<Arc<RwLock<TaskAttempt>>> {
        self.attempts
            .get(&attempt_id)
            .map(|a| a.value().clone())
            .ok_or_else(|| StrataError::UnknownEntity(attempt_id.to_string()))
    }

    pub fn attempt_state(&self, attempt_id: TaskAttemptId) -> Result<TaskAttemptState> {
        Ok(self.attempt(attempt_id)?.read().state())
    }

    pub fn register_container(&self, container: AMContainer) {
        self.containers
            .insert(container.id(), Arc::new(RwLock::new(container)));
    }

    pub fn container(&self, container_id: ContainerId) -> Result<Arc<RwLock<AMContainer>>> {
        self.containers
            .get(&container_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| StrataError::UnknownEntity(container_id.to_string()))
    }

    pub fn has_container(&self, container_id: ContainerId) -> bool {
        self.containers.contains_key(&container_id)
    }

    fn forget_dag(&self, dag_id: DagId) {
        self.dags.remove(&dag_id);
        self.vertices.retain(|id, _| id.dag_id != dag_id);
        self.tasks.retain(|id, _| id.dag_id() != dag_id);
        self.attempts.retain(|id, _| id.dag_id() != dag_id);
    }

    /// Serves a container asking for work. Returned events must be posted by the caller.
    pub fn pull_task(&self, container_id: ContainerId) -> Result<(PullResponse, Vec<Event>)> {
        let container = self.container(container_id)?;
        let mut container = container.write();
        Ok(container.pull_task_context())
    }

    /// Whether `attempt_id` may commit its output. The first live attempt to ask wins.
    pub fn can_commit(&self, attempt_id: TaskAttemptId) -> Result<bool> {
        let task = self.task(attempt_id.task_id)?;
        let mut task = task.write();
        Ok(task.can_commit(attempt_id))
    }

    /// Input events of `task_id` starting at `from_index`, at most `max_events` of them.
    pub fn task_input_events(
        &self,
        task_id: TaskId,
        from_index: usize,
        max_events: usize,
    ) -> Result<Vec<RuntimeEvent>> {
        let task = self.task(task_id)?;
        let task = task.read();
        Ok(task.input_events(from_index, max_events))
    }

    pub fn publish_dag_status(&self, status: DagStatus) {
        self.dag_status.send_replace(Some(status));
    }

    pub fn subscribe_dag_status(&self) -> watch::Receiver<Option<DagStatus>> {
        self.dag_status.subscribe()
    }
}
