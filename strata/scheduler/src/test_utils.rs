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


use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use strata_core::error::{Result, StrataError};
use strata_core::ids::{ContainerId, DagId, NodeId, TaskAttemptId, TaskId, VertexId};
use strata_core::resource::{Priority, Resource};

use crate::app_context::{AppContext, Clock};
use crate::config::SchedulerConfig;
use crate::dag::execution_dag::Dag;
use crate::dag::task::Task;
use crate::dag::task_attempt::TaskAttempt;
use crate::dag::task_spec::TaskTemplate;
use crate::dag::DagState;
use crate::event::DagEvent;
use crate::metrics::SchedulerMetricsCollector;
use crate::plan::{DagPlan, DataMovementType, TaskLocationHint, VertexPlan};
use crate::rm::container::launch_context::ContainerLaunchContext;
use crate::rm::container::launcher::ContainerLauncher;
use crate::rm::{AllocationRequest, ClusterClient, ResourceRequest};

pub const TEST_APP_ID: u64 = 1;

/// Sleep for `interval` between checks of `cond`, at most `iterations` times. Returns
/// whether the condition was met.
pub async fn await_condition<Fut: Future<Output = Result<bool>>, F: Fn() -> Fut>(
    interval: Duration,
    iterations: usize,
    cond: F,
) -> Result<bool> {
    let mut iteration = 0;

    while iteration < iterations {
        let check = cond().await?;

        if check {
            return Ok(true);
        } else {
            iteration += 1;
            tokio::time::sleep(interval).await;
        }
    }

    Ok(false)
}

pub fn test_dag_id() -> DagId {
    DagId::new(TEST_APP_ID, 1)
}

/// Attempt `attempt` of task `task` of the first vertex of the first test DAG.
pub fn attempt_id(task: u32, attempt: u32) -> TaskAttemptId {
    TaskAttemptId::new(TaskId::new(VertexId::new(test_dag_id(), 0), task), attempt)
}

/// `map` feeding `reduce` over a scatter-gather edge.
pub fn map_reduce_plan(maps: u32, reduces: u32) -> DagPlan {
    DagPlan::new("map-reduce")
        .add_vertex(VertexPlan::new("map", maps))
        .add_vertex(VertexPlan::new("reduce", reduces))
        .add_edge("map", "reduce", DataMovementType::ScatterGather)
}

pub fn task_template(vertex_name: &str, location_hint: TaskLocationHint) -> Arc<TaskTemplate> {
    Arc::new(TaskTemplate {
        dag_name: "dag".to_owned(),
        vertex_name: vertex_name.to_owned(),
        processor: format!("{vertex_name}-processor"),
        resource: Resource::new(1024, 1),
        location_hint,
        local_resources: Default::default(),
        inputs: vec![],
        outputs: vec![],
    })
}

/// A request for the first attempt of task `task` preferring `hosts`.
pub fn allocation_request(task: u32, hosts: &[&str], priority: u32) -> AllocationRequest {
    let attempt_id = attempt_id(task, 0);
    AllocationRequest {
        attempt_id,
        capability: Resource::new(1024, 1),
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        racks: vec![],
        priority: Priority(priority),
        spec: task_template("map", TaskLocationHint::hosts(hosts)).spec_for(attempt_id),
        rescheduled: false,
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// An application context over a manual clock, with helpers to create entities outside of a
/// running DAG.
pub struct TestHarness {
    ctx: Arc<AppContext>,
    clock: Arc<ManualClock>,
    metrics: Arc<TestMetricsCollector>,
    next_task: AtomicU32,
    next_dag: AtomicU32,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_000));
        let metrics = Arc::new(TestMetricsCollector::default());
        let ctx = Arc::new(AppContext::new(
            Arc::new(config),
            TEST_APP_ID,
            clock.clone(),
            metrics.clone(),
        ));
        Self {
            ctx,
            clock,
            metrics,
            next_task: AtomicU32::new(0),
            next_dag: AtomicU32::new(1),
        }
    }

    pub fn ctx(&self) -> &AppContext {
        &self.ctx
    }

    pub fn ctx_arc(&self) -> Arc<AppContext> {
        self.ctx.clone()
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    pub fn metrics(&self) -> &Arc<TestMetricsCollector> {
        &self.metrics
    }

    /// A registered task of the first test vertex, not attached to any DAG.
    pub fn standalone_task(&self) -> Arc<RwLock<Task>> {
        self.new_task(TaskLocationHint::default())
    }

    /// A registered attempt of a fresh standalone task.
    pub fn standalone_attempt(&self, location_hint: TaskLocationHint) -> Arc<RwLock<TaskAttempt>> {
        let task = self.new_task(location_hint.clone());
        let attempt_id = TaskAttemptId::new(task.read().id(), 0);
        let template = task_template("map", location_hint.clone());
        self.ctx.register_attempt(TaskAttempt::new(
            template.spec_for(attempt_id),
            location_hint,
            false,
            false,
        ));
        self.ctx
            .attempt(attempt_id)
            .expect("attempt was just registered")
    }

    /// Makes a DAG of `plan` current and initializes it, registering its vertices and tasks.
    pub fn init_dag(&self, plan: DagPlan) -> Result<DagId> {
        let dag_id = DagId::new(TEST_APP_ID, self.next_dag.fetch_add(1, Ordering::SeqCst));
        let dag = self
            .ctx
            .set_current_dag(Dag::new(dag_id, plan, self.ctx.now()));
        let mut dag = dag.write();
        dag.handle(DagEvent::Init, &self.ctx);
        if dag.state() != DagState::Inited {
            return Err(StrataError::General(format!(
                "{dag_id} did not initialize: {:?}",
                dag.diagnostics()
            )));
        }
        Ok(dag_id)
    }

    fn new_task(&self, location_hint: TaskLocationHint) -> Arc<RwLock<Task>> {
        let task_id = TaskId::new(
            VertexId::new(test_dag_id(), 0),
            self.next_task.fetch_add(1, Ordering::SeqCst),
        );
        self.ctx.register_task(Task::new(
            task_id,
            task_template("map", location_hint),
            self.ctx.config().max_task_attempts,
        ));
        self.ctx.task(task_id).expect("task was just registered")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct MockClusterState {
    requests: Vec<ResourceRequest>,
    removed: Vec<TaskAttemptId>,
    released: Vec<ContainerId>,
}

/// Records every call and reports a settable headroom.
pub struct MockClusterClient {
    state: Mutex<MockClusterState>,
    available: Mutex<Resource>,
    node_count: usize,
}

impl MockClusterClient {
    pub fn new(available: Resource) -> Self {
        Self {
            state: Mutex::new(MockClusterState::default()),
            available: Mutex::new(available),
            node_count: 3,
        }
    }

    pub fn requests(&self) -> Vec<ResourceRequest> {
        self.state.lock().requests.clone()
    }

    pub fn removed(&self) -> Vec<TaskAttemptId> {
        self.state.lock().removed.clone()
    }

    pub fn released(&self) -> Vec<ContainerId> {
        self.state.lock().released.clone()
    }

    pub fn set_available(&self, available: Resource) {
        *self.available.lock() = available;
    }
}

impl ClusterClient for MockClusterClient {
    fn add_container_request(&self, request: ResourceRequest) {
        self.state.lock().requests.push(request);
    }

    fn remove_container_request(&self, attempt_id: &TaskAttemptId) {
        self.state.lock().removed.push(*attempt_id);
    }

    fn release_assigned_container(&self, container_id: ContainerId) {
        self.state.lock().released.push(container_id);
    }

    fn available_resources(&self) -> Resource {
        *self.available.lock()
    }

    fn cluster_node_count(&self) -> usize {
        self.node_count
    }
}

/// Records launches and stops. Launches on `failing_host` fail.
#[derive(Default)]
pub struct RecordingLauncher {
    pub failing_host: Option<String>,
    pub(crate) launched: Mutex<Vec<ContainerId>>,
    pub(crate) stopped: Mutex<Vec<ContainerId>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<ContainerId> {
        self.launched.lock().clone()
    }

    pub fn stopped(&self) -> Vec<ContainerId> {
        self.stopped.lock().clone()
    }
}

impl ContainerLauncher for RecordingLauncher {
    fn launch(
        &self,
        container_id: ContainerId,
        node_id: &NodeId,
        _context: Arc<ContainerLaunchContext>,
    ) -> Result<()> {
        if self.failing_host.as_deref() == Some(node_id.host.as_str()) {
            return Err(StrataError::General(format!("{} is down", node_id.host)));
        }
        self.launched.lock().push(container_id);
        Ok(())
    }

    fn stop(&self, container_id: ContainerId, _node_id: &NodeId) -> Result<()> {
        self.stopped.lock().push(container_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct TestMetricsCollector {
    submitted: Mutex<Vec<DagId>>,
    finished: Mutex<Vec<(DagId, DagState)>>,
    launched: AtomicU64,
    speculative: AtomicU64,
    pending_requests: AtomicU64,
}

impl TestMetricsCollector {
    pub fn submitted_dags(&self) -> Vec<DagId> {
        self.submitted.lock().clone()
    }

    pub fn finished_dags(&self) -> Vec<(DagId, DagState)> {
        self.finished.lock().clone()
    }

    pub fn launched_attempts(&self) -> u64 {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn speculative_attempts(&self) -> u64 {
        self.speculative.load(Ordering::SeqCst)
    }

    pub fn pending_requests(&self) -> u64 {
        self.pending_requests.load(Ordering::SeqCst)
    }
}

impl SchedulerMetricsCollector for TestMetricsCollector {
    fn record_dag_submitted(&self, dag_id: DagId, _submitted_at: u64) {
        self.submitted.lock().push(dag_id);
    }

    fn record_dag_finished(
        &self,
        dag_id: DagId,
        state: DagState,
        _submitted_at: u64,
        _finished_at: u64,
    ) {
        self.finished.lock().push((dag_id, state));
    }

    fn record_attempt_launched(&self, _attempt_id: TaskAttemptId) {
        self.launched.fetch_add(1, Ordering::SeqCst);
    }

    fn record_speculative_attempt(&self, _attempt_id: TaskAttemptId) {
        self.speculative.fetch_add(1, Ordering::SeqCst);
    }

    fn set_pending_container_requests(&self, value: u64) {
        self.pending_requests.store(value, Ordering::SeqCst);
    }
}
