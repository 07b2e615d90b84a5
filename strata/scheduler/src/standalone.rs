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


//! An in-process cluster: grants container requests against a fixed set of nodes, runs
//! launched containers as tokio tasks and simulates the attempts they pull.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use strata_core::error::{Result, StrataError};
use strata_core::event_loop::EventSender;
use strata_core::ids::{ContainerId, NodeId, TaskAttemptId};
use strata_core::resource::Resource;

use crate::dag::runtime_event::{DataMovementEvent, RuntimeEvent, RuntimeEventPayload};
use crate::dag::task_spec::TaskSpec;
use crate::event::{Event, SchedulerEvent, TaskAttemptStatusUpdate};
use crate::rm::container::launch_context::ContainerLaunchContext;
use crate::rm::container::launcher::ContainerLauncher;
use crate::rm::container::am_container::PullResponse;
use crate::rm::{
    ClusterClient, Container, ContainerStatus, NodeReport, NodeState, ResourceRequest,
    EXIT_STATUS_ABORTED, EXIT_STATUS_NODE_LOST,
};
use crate::task_comm::{HeartbeatRequest, TaskCommunicator};

const POLL_INTERVAL_MS: u64 = 10;
const NODE_PORT: u16 = 8042;

#[derive(Clone, Debug)]
pub struct LocalClusterConfig {
    pub nodes: u32,
    pub containers_per_node: u32,
    pub container_resource: Resource,
    pub task_duration_ms: u64,
}

impl Default for LocalClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            containers_per_node: 4,
            container_resource: Resource::new(1024, 1),
            task_duration_ms: 200,
        }
    }
}

enum ClusterCommand {
    Schedule,
    Launch(ContainerId),
    Release(ContainerId),
    Exited {
        container_id: ContainerId,
        exit_status: i32,
        diagnostics: String,
    },
}

/// Tells the command loop that a container process ended. Returns false when the loop is
/// already gone.
fn report_exit(
    commands: &mpsc::UnboundedSender<ClusterCommand>,
    container_id: ContainerId,
    exit_status: i32,
    diagnostics: String,
) -> bool {
    let exited = ClusterCommand::Exited {
        container_id,
        exit_status,
        diagnostics,
    };
    match commands.send(exited) {
        Ok(()) => true,
        Err(e) => {
            debug!("Cluster stopped before {container_id} exit was reported: {e}");
            false
        }
    }
}

struct RunningContainer {
    node_id: NodeId,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ClusterState {
    pending: VecDeque<ResourceRequest>,
    used_slots: HashMap<NodeId, u32>,
    lost_nodes: BTreeSet<NodeId>,
    containers: HashMap<ContainerId, RunningContainer>,
    next_container_id: u64,
}

/// Both the cluster client and the container launcher of a standalone run.
pub struct LocalCluster {
    config: LocalClusterConfig,
    nodes: Vec<NodeId>,
    state: Mutex<ClusterState>,
    commands: mpsc::UnboundedSender<ClusterCommand>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ClusterCommand>>>,
    communicator: OnceCell<Arc<TaskCommunicator>>,
    sender: OnceCell<EventSender<Event>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LocalCluster {
    pub fn new(config: LocalClusterConfig) -> Self {
        let nodes = (0..config.nodes)
            .map(|i| NodeId::new(format!("host-{i}"), NODE_PORT))
            .collect();
        let (commands, receiver) = mpsc::unbounded_channel();
        Self {
            config,
            nodes,
            state: Mutex::new(ClusterState::default()),
            commands,
            receiver: Mutex::new(Some(receiver)),
            communicator: OnceCell::new(),
            sender: OnceCell::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn running_containers(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Starts serving commands. Granted and completed containers are posted to `sender`,
    /// launched containers talk to `communicator`.
    pub fn start(
        self: &Arc<Self>,
        communicator: Arc<TaskCommunicator>,
        sender: EventSender<Event>,
    ) -> Result<()> {
        let receiver = self.receiver.lock().take().ok_or_else(|| {
            StrataError::Internal("LocalCluster has already been started".to_owned())
        })?;
        self.communicator
            .set(communicator)
            .map_err(|_| StrataError::Internal("Task communicator already set".to_owned()))?;
        self.sender
            .set(sender)
            .map_err(|_| StrataError::Internal("Event sender already set".to_owned()))?;

        info!(
            "Starting local cluster with {} nodes of {} containers",
            self.config.nodes, self.config.containers_per_node
        );
        let cluster = self.clone();
        *self.handle.lock() = Some(tokio::spawn(async move {
            cluster.serve(receiver).await;
        }));
        Ok(())
    }

    /// Aborts the command loop and every running container.
    pub async fn stop(&self) {
        let mut handles: Vec<JoinHandle<()>> = {
            let mut state = self.state.lock();
            state
                .containers
                .values_mut()
                .filter_map(|c| c.handle.take())
                .collect()
        };
        handles.extend(self.handle.lock().take());
        for handle in &handles {
            handle.abort();
        }
        join_all(handles).await;
        info!("Local cluster stopped");
    }

    /// Marks `node_id` lost: its containers complete and the scheduler is told.
    pub async fn lose_node(&self, node_id: &NodeId) -> Result<()> {
        let lost: Vec<ContainerStatus> = {
            let mut state = self.state.lock();
            state.lost_nodes.insert(node_id.clone());
            let ids: Vec<ContainerId> = state
                .containers
                .iter()
                .filter(|(_, c)| &c.node_id == node_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| Self::remove_container(&mut state, id))
                .map(|container_id| ContainerStatus {
                    container_id,
                    exit_status: EXIT_STATUS_NODE_LOST,
                    diagnostics: format!("Node {node_id} was lost"),
                })
                .collect()
        };
        let sender = self.event_sender()?;
        sender
            .post_event(Event::Scheduler(SchedulerEvent::NodesUpdated(vec![
                NodeReport {
                    node_id: node_id.clone(),
                    rack: crate::rm::rack_resolver::DEFAULT_RACK.to_owned(),
                    state: NodeState::Lost,
                },
            ])))
            .await?;
        if !lost.is_empty() {
            sender
                .post_event(Event::Scheduler(SchedulerEvent::ContainersCompleted(lost)))
                .await?;
        }
        Ok(())
    }

    fn event_sender(&self) -> Result<&EventSender<Event>> {
        self.sender
            .get()
            .ok_or_else(|| StrataError::Internal("LocalCluster is not started".to_owned()))
    }

    fn send(&self, command: ClusterCommand) {
        if self.commands.send(command).is_err() {
            warn!("Local cluster command loop is gone");
        }
    }

    async fn serve(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<ClusterCommand>) {
        while let Some(command) = receiver.recv().await {
            let event = match command {
                ClusterCommand::Schedule => self.allocate(),
                ClusterCommand::Launch(container_id) => {
                    self.launch_container(container_id);
                    None
                }
                ClusterCommand::Release(container_id) => self.complete(
                    container_id,
                    EXIT_STATUS_ABORTED,
                    "Container released by the application".to_owned(),
                ),
                ClusterCommand::Exited {
                    container_id,
                    exit_status,
                    diagnostics,
                } => self.complete(container_id, exit_status, diagnostics),
            };
            if let Some(event) = event {
                let Some(sender) = self.sender.get() else {
                    continue;
                };
                if let Err(e) = sender.post_event(event).await {
                    warn!("Local cluster stops serving: {e}");
                    break;
                }
            }
        }
    }

    /// Grants pending requests in priority order while slots are free.
    fn allocate(&self) -> Option<Event> {
        let mut state = self.state.lock();
        let mut pending: Vec<ResourceRequest> = state.pending.drain(..).collect();
        pending.sort_by_key(|r| r.priority.0);

        let mut granted = vec![];
        let mut waiting = VecDeque::new();
        for request in pending {
            match self.pick_node(&state, &request) {
                Some(node_id) => {
                    *state.used_slots.entry(node_id.clone()).or_default() += 1;
                    state.next_container_id += 1;
                    let container_id = ContainerId(state.next_container_id);
                    state.containers.insert(
                        container_id,
                        RunningContainer {
                            node_id: node_id.clone(),
                            handle: None,
                        },
                    );
                    debug!("Granted {container_id} on {node_id} for {}", request.attempt_id);
                    granted.push(Container {
                        id: container_id,
                        node_id,
                        resource: self.config.container_resource,
                        priority: request.priority,
                    });
                }
                None => waiting.push_back(request),
            }
        }
        state.pending = waiting;
        (!granted.is_empty()).then(|| Event::Scheduler(SchedulerEvent::ContainersAllocated(granted)))
    }

    fn pick_node(&self, state: &ClusterState, request: &ResourceRequest) -> Option<NodeId> {
        if !request.capability.fits_in(&self.config.container_resource) {
            return None;
        }
        let free: Vec<&NodeId> = self
            .nodes
            .iter()
            .filter(|n| !state.lost_nodes.contains(*n))
            .filter(|n| {
                state.used_slots.get(*n).copied().unwrap_or_default()
                    < self.config.containers_per_node
            })
            .collect();
        free.iter()
            .find(|n| request.hosts.contains(&n.host))
            .or_else(|| free.choose(&mut rand::rng()))
            .map(|n| (*n).clone())
    }

    fn remove_container(state: &mut ClusterState, container_id: ContainerId) -> Option<ContainerId> {
        let container = state.containers.remove(&container_id)?;
        if let Some(handle) = container.handle {
            handle.abort();
        }
        if let Some(used) = state.used_slots.get_mut(&container.node_id) {
            *used = used.saturating_sub(1);
        }
        Some(container_id)
    }

    fn complete(
        &self,
        container_id: ContainerId,
        exit_status: i32,
        diagnostics: String,
    ) -> Option<Event> {
        let removed = Self::remove_container(&mut self.state.lock(), container_id)?;
        debug!("{removed} completed with exit status {exit_status}");
        self.send(ClusterCommand::Schedule);
        Some(Event::Scheduler(SchedulerEvent::ContainersCompleted(vec![
            ContainerStatus {
                container_id: removed,
                exit_status,
                diagnostics,
            },
        ])))
    }

    fn launch_container(&self, container_id: ContainerId) {
        let Some(communicator) = self.communicator.get().cloned() else {
            warn!("Cannot launch {container_id} before the cluster is started");
            return;
        };
        let mut state = self.state.lock();
        let Some(container) = state.containers.get_mut(&container_id) else {
            debug!("Ignore launch of released {container_id}");
            return;
        };
        if container.handle.is_some() {
            return;
        }
        let commands = self.commands.clone();
        let runner = ContainerRunner {
            container_id,
            communicator,
            task_duration_ms: self.config.task_duration_ms,
        };
        container.handle = Some(tokio::spawn(async move {
            let (exit_status, diagnostics) = match runner.run().await {
                Ok(()) => (0, "Container exited".to_owned()),
                Err(e) => (1, format!("Container failed: {e}")),
            };
            report_exit(&commands, container_id, exit_status, diagnostics);
        }));
    }
}

impl ClusterClient for LocalCluster {
    fn add_container_request(&self, request: ResourceRequest) {
        self.state.lock().pending.push_back(request);
        self.send(ClusterCommand::Schedule);
    }

    fn remove_container_request(&self, attempt_id: &TaskAttemptId) {
        self.state
            .lock()
            .pending
            .retain(|r| &r.attempt_id != attempt_id);
    }

    fn release_assigned_container(&self, container_id: ContainerId) {
        self.send(ClusterCommand::Release(container_id));
    }

    fn available_resources(&self) -> Resource {
        let state = self.state.lock();
        let free: u32 = self
            .nodes
            .iter()
            .filter(|n| !state.lost_nodes.contains(*n))
            .map(|n| {
                self.config
                    .containers_per_node
                    .saturating_sub(state.used_slots.get(n).copied().unwrap_or_default())
            })
            .sum();
        Resource::new(
            self.config.container_resource.memory_mb * free as u64,
            self.config.container_resource.vcores * free,
        )
    }

    fn cluster_node_count(&self) -> usize {
        self.nodes.len() - self.state.lock().lost_nodes.len()
    }
}

impl ContainerLauncher for LocalCluster {
    fn launch(
        &self,
        container_id: ContainerId,
        node_id: &NodeId,
        context: Arc<ContainerLaunchContext>,
    ) -> Result<()> {
        if self.state.lock().lost_nodes.contains(node_id) {
            return Err(StrataError::General(format!("Node {node_id} is lost")));
        }
        debug!(
            "Launching {container_id} on {node_id} with {} local resources",
            context.local_resources.len()
        );
        self.send(ClusterCommand::Launch(container_id));
        Ok(())
    }

    fn stop(&self, container_id: ContainerId, _node_id: &NodeId) -> Result<()> {
        self.send(ClusterCommand::Release(container_id));
        Ok(())
    }
}

/// The process of one launched container: pulls attempts until told to exit.
struct ContainerRunner {
    container_id: ContainerId,
    communicator: Arc<TaskCommunicator>,
    task_duration_ms: u64,
}

impl ContainerRunner {
    async fn run(&self) -> Result<()> {
        loop {
            match self.communicator.get_task(self.container_id).await? {
                PullResponse::NoTask => {
                    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await
                }
                PullResponse::Die => return Ok(()),
                PullResponse::Task(assignment) => self.run_attempt(assignment.spec).await?,
            }
        }
    }

    /// Waits for every physical input, works for the task duration, announces every output
    /// partition and commits.
    async fn run_attempt(&self, spec: Arc<TaskSpec>) -> Result<()> {
        let attempt_id = spec.attempt_id;
        let comm = &self.communicator;
        debug!("{} runs {attempt_id}", self.container_id);

        let expected_inputs = spec.total_physical_inputs() as usize;
        let mut inputs: BTreeSet<(String, u32)> = BTreeSet::new();
        let mut next_event = 0;
        loop {
            let response = comm
                .heartbeat(HeartbeatRequest::new(attempt_id, next_event))
                .await?;
            if response.should_die {
                return Ok(());
            }
            next_event += response.events.len();
            for event in response.events {
                let Some(destination) = event.destination_info else {
                    continue;
                };
                let source = destination.edge_vertex_name.unwrap_or_default();
                match event.payload {
                    RuntimeEventPayload::DataMovement(_) => {
                        inputs.insert((source, destination.index));
                    }
                    RuntimeEventPayload::InputFailed(_) => {
                        inputs.remove(&(source, destination.index));
                    }
                    RuntimeEventPayload::InputReadError(_) => {}
                }
            }
            if inputs.len() >= expected_inputs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }

        let jitter = rand::rng().random_range(0..=self.task_duration_ms / 10);
        let half = Duration::from_millis((self.task_duration_ms + jitter) / 2);
        tokio::time::sleep(half).await;
        let mut request = HeartbeatRequest::new(attempt_id, next_event);
        request.status = Some(TaskAttemptStatusUpdate {
            progress: 0.5,
            state_string: "running".to_owned(),
            fetch_failed_attempts: vec![],
        });
        if comm.heartbeat(request).await?.should_die {
            return Ok(());
        }
        tokio::time::sleep(half).await;

        let mut request = HeartbeatRequest::new(attempt_id, next_event);
        request.status = Some(TaskAttemptStatusUpdate {
            progress: 1.0,
            state_string: "finishing".to_owned(),
            fetch_failed_attempts: vec![],
        });
        request.events = output_events(&spec);
        if comm.heartbeat(request).await?.should_die {
            return Ok(());
        }

        comm.commit_pending(attempt_id).await?;
        loop {
            if comm.can_commit(attempt_id)? {
                break;
            }
            let response = comm
                .heartbeat(HeartbeatRequest::new(attempt_id, next_event))
                .await?;
            if response.should_die {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
        comm.done(attempt_id).await
    }
}

/// A data movement event for every partition of every output of `spec`.
fn output_events(spec: &TaskSpec) -> Vec<RuntimeEvent> {
    spec.outputs
        .iter()
        .flat_map(|output| {
            (0..output.physical_output_count).map(move |partition| {
                let mut event = RuntimeEvent::new(
                    RuntimeEventPayload::DataMovement(DataMovementEvent {
                        source_index: partition,
                        target_index: 0,
                        version: spec.attempt_id.id,
                        user_payload: format!("{}/{partition}", spec.attempt_id).into_bytes(),
                    }),
                    spec.vertex_name.clone(),
                    Some(output.destination_vertex_name.clone()),
                    spec.attempt_id,
                );
                event.source_info.index = partition;
                event
            })
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::task_spec::OutputSpec;
    use crate::test_utils::attempt_id;
    use strata_core::resource::Priority;

    fn request(attempt: TaskAttemptId, hosts: &[&str], priority: u32) -> ResourceRequest {
        ResourceRequest {
            attempt_id: attempt,
            capability: Resource::new(1024, 1),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            racks: vec![],
            priority: Priority(priority),
        }
    }

    #[tokio::test]
    async fn grants_preferred_hosts_within_capacity() -> Result<()> {
        let cluster = Arc::new(LocalCluster::new(LocalClusterConfig {
            nodes: 2,
            containers_per_node: 1,
            ..Default::default()
        }));
        cluster.add_container_request(request(attempt_id(0, 0), &["host-1"], 6));
        cluster.add_container_request(request(attempt_id(1, 0), &[], 3));
        cluster.add_container_request(request(attempt_id(2, 0), &[], 3));

        let Some(Event::Scheduler(SchedulerEvent::ContainersAllocated(granted))) =
            cluster.allocate()
        else {
            panic!("expected an allocation");
        };
        assert_eq!(granted.len(), 2);
        // the better priority goes first and may take the preferred host
        assert!(granted.iter().all(|c| c.priority == Priority(3)));
        assert_eq!(cluster.available_resources(), Resource::new(0, 0));
        assert_eq!(cluster.state.lock().pending.len(), 1);

        let freed = cluster.complete(granted[0].id, 0, String::new());
        assert!(freed.is_some());
        assert!(cluster.complete(granted[0].id, 0, String::new()).is_none());
        assert_eq!(cluster.available_resources(), Resource::new(1024, 1));
        Ok(())
    }

    #[test]
    fn announces_every_output_partition() {
        let mut spec = crate::dag::task_spec::TaskTemplate {
            dag_name: "dag".to_owned(),
            vertex_name: "map".to_owned(),
            processor: "map-processor".to_owned(),
            resource: Resource::new(1024, 1),
            location_hint: Default::default(),
            local_resources: Default::default(),
            inputs: vec![],
            outputs: vec![],
        }
        .spec_for(attempt_id(3, 1));
        Arc::make_mut(&mut spec).outputs.push(OutputSpec {
            destination_vertex_name: "reduce".to_owned(),
            descriptor: "scatter-gather".to_owned(),
            physical_output_count: 3,
        });
        let events = output_events(&spec);
        assert_eq!(events.len(), 3);
        assert!(events.iter().enumerate().all(|(i, e)| matches!(
            &e.payload,
            RuntimeEventPayload::DataMovement(dm) if dm.source_index == i as u32 && dm.version == 1
        )));
        assert_eq!(
            events[2].source_info.edge_vertex_name.as_deref(),
            Some("reduce")
        );
    }

    #[test]
    fn exit_after_shutdown_is_dropped() {
        let (commands, receiver) = mpsc::unbounded_channel();
        assert!(report_exit(&commands, ContainerId(1), 0, String::new()));
        drop(receiver);
        assert!(!report_exit(&commands, ContainerId(2), 1, "late".to_owned()));
    }
}
