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


//! Matches container requests of task attempts against containers offered by the cluster.
//!
//! All bookkeeping lives behind one mutex. Calls into the [`ClusterClient`] and upcalls into
//! the [`TaskSchedulerAppCallback`] are collected while the lock is held and made after it
//! is released, so neither side can call back into the scheduler under its lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use strata_core::ids::{ContainerId, TaskAttemptId};
use strata_core::resource::Priority;

use crate::app_context::Clock;
use crate::config::SchedulerConfig;
use crate::rm::node_map::NodeFilter;
use crate::rm::rack_resolver::RackResolver;
use crate::rm::{AllocationRequest, ClusterClient, Container, ContainerStatus, NodeReport, ResourceRequest};

/// Notifications from the task scheduler to the application master.
pub trait TaskSchedulerAppCallback: Send + Sync {
    /// `container` was assigned to the attempt of `request`.
    fn task_allocated(&self, request: AllocationRequest, container: Container);
    /// A container the application knew about has completed.
    fn container_completed(&self, attempt_id: Option<TaskAttemptId>, status: ContainerStatus);
    /// A container is being given back to the cluster by the scheduler.
    fn container_being_released(&self, container_id: ContainerId);
    fn nodes_updated(&self, reports: Vec<NodeReport>);
    fn app_shutdown_requested(&self);
    /// The attempt running in `container_id` should be killed to free resources.
    fn preempt_container(&self, attempt_id: TaskAttemptId, container_id: ContainerId);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Locality {
    NodeLocal,
    RackLocal,
    NonLocal,
}

enum Deferred {
    AddRequest(ResourceRequest),
    RemoveRequest(TaskAttemptId),
    Release(ContainerId),
    Allocated {
        request: AllocationRequest,
        container: Container,
    },
    Completed {
        attempt_id: Option<TaskAttemptId>,
        status: ContainerStatus,
    },
    BeingReleased(ContainerId),
    Preempt {
        attempt_id: TaskAttemptId,
        container_id: ContainerId,
    },
}

struct PendingRequest {
    seq: u64,
    request: AllocationRequest,
}

struct Allocation {
    container: Container,
    priority: Priority,
}

struct HeldContainer {
    container: Container,
    expires_at: u64,
}

#[derive(Default)]
struct SchedulerState {
    next_seq: u64,
    pending: HashMap<TaskAttemptId, PendingRequest>,
    task_allocations: HashMap<TaskAttemptId, Allocation>,
    container_assignments: HashMap<ContainerId, TaskAttemptId>,
    held_containers: HashMap<ContainerId, HeldContainer>,
    /// Containers given back to the cluster, with the attempt that last ran in them.
    released_containers: HashMap<ContainerId, Option<TaskAttemptId>>,
    preempted: HashSet<ContainerId>,
    stopped: bool,
}

pub struct TaskScheduler<C: ClusterClient> {
    client: Arc<C>,
    callback: Arc<dyn TaskSchedulerAppCallback>,
    node_filter: Arc<dyn NodeFilter>,
    rack_resolver: Arc<RackResolver>,
    clock: Arc<dyn Clock>,
    reuse_enabled: bool,
    reuse_rack_fallback: bool,
    reuse_non_local_fallback: bool,
    idle_release_timeout_ms: u64,
    state: Mutex<SchedulerState>,
}

impl<C: ClusterClient> TaskScheduler<C> {
    pub fn new(
        config: &SchedulerConfig,
        client: Arc<C>,
        callback: Arc<dyn TaskSchedulerAppCallback>,
        node_filter: Arc<dyn NodeFilter>,
        rack_resolver: Arc<RackResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            callback,
            node_filter,
            rack_resolver,
            clock,
            reuse_enabled: config.container_reuse_enabled,
            reuse_rack_fallback: config.container_reuse_rack_fallback,
            reuse_non_local_fallback: config.container_reuse_non_local_fallback,
            idle_release_timeout_ms: config.container_idle_release_timeout_ms,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().task_allocations.len()
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held_containers.len()
    }

    pub fn container_for(&self, attempt_id: &TaskAttemptId) -> Option<ContainerId> {
        self.state
            .lock()
            .task_allocations
            .get(attempt_id)
            .map(|a| a.container.id)
    }

    fn locality_of(&self, request: &AllocationRequest, container: &Container) -> Locality {
        if request.hosts.iter().any(|h| *h == container.node_id.host) {
            return Locality::NodeLocal;
        }
        let rack = self.rack_resolver.resolve(&container.node_id.host);
        if request.racks.iter().any(|r| *r == rack) {
            Locality::RackLocal
        } else {
            Locality::NonLocal
        }
    }

    /// The best pending request `container` may serve, trying node-local requests first,
    /// then rack-local, then any. Within a level the highest priority, then the oldest
    /// request wins.
    fn best_match(
        &self,
        state: &SchedulerState,
        container: &Container,
        allowed: &[Locality],
    ) -> Option<TaskAttemptId> {
        for level in allowed {
            let best = state
                .pending
                .values()
                .filter(|p| p.request.capability.fits_in(&container.resource))
                .filter(|p| {
                    *level == Locality::NonLocal || self.locality_of(&p.request, container) == *level
                })
                .min_by_key(|p| (p.request.priority.0, p.seq));
            if let Some(best) = best {
                return Some(best.request.attempt_id);
            }
        }
        None
    }

    fn reuse_levels(&self) -> Vec<Locality> {
        let mut levels = vec![Locality::NodeLocal];
        if self.reuse_rack_fallback {
            levels.push(Locality::RackLocal);
        }
        if self.reuse_non_local_fallback {
            levels.push(Locality::NonLocal);
        }
        levels
    }

    fn assign(
        &self,
        state: &mut SchedulerState,
        attempt_id: TaskAttemptId,
        container: Container,
        deferred: &mut Vec<Deferred>,
    ) {
        let Some(pending) = state.pending.remove(&attempt_id) else {
            return;
        };
        let request = pending.request;
        info!(
            "Assigning {} on {} to {attempt_id} ({:?}, priority {})",
            container.id,
            container.node_id,
            self.locality_of(&request, &container),
            request.priority
        );
        state
            .container_assignments
            .insert(container.id, attempt_id);
        state.task_allocations.insert(
            attempt_id,
            Allocation {
                container: container.clone(),
                priority: request.priority,
            },
        );
        deferred.push(Deferred::Allocated { request, container });
    }

    fn release(
        &self,
        state: &mut SchedulerState,
        container_id: ContainerId,
        last_attempt: Option<TaskAttemptId>,
        deferred: &mut Vec<Deferred>,
    ) {
        state.held_containers.remove(&container_id);
        state.preempted.remove(&container_id);
        state.released_containers.insert(container_id, last_attempt);
        deferred.push(Deferred::Release(container_id));
        deferred.push(Deferred::BeingReleased(container_id));
    }

    fn run(&self, deferred: Vec<Deferred>) {
        for call in deferred {
            match call {
                Deferred::AddRequest(request) => self.client.add_container_request(request),
                Deferred::RemoveRequest(attempt_id) => {
                    self.client.remove_container_request(&attempt_id)
                }
                Deferred::Release(container_id) => {
                    self.client.release_assigned_container(container_id)
                }
                Deferred::Allocated { request, container } => {
                    self.callback.task_allocated(request, container)
                }
                Deferred::Completed { attempt_id, status } => {
                    self.callback.container_completed(attempt_id, status)
                }
                Deferred::BeingReleased(container_id) => {
                    self.callback.container_being_released(container_id)
                }
                Deferred::Preempt {
                    attempt_id,
                    container_id,
                } => self.callback.preempt_container(attempt_id, container_id),
            }
        }
    }

    /// Asks for a container for an attempt. Held containers are tried before the cluster.
    pub fn allocate_task(&self, request: AllocationRequest) {
        let mut deferred = vec![];
        {
            let mut state = self.state.lock();
            let attempt_id = request.attempt_id;
            if state.stopped {
                warn!("Ignoring container request of {attempt_id}, the scheduler is stopped");
                return;
            }
            if state.pending.contains_key(&attempt_id)
                || state.task_allocations.contains_key(&attempt_id)
            {
                warn!("{attempt_id} already has a container request");
                return;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let resource_request = ResourceRequest {
                attempt_id,
                capability: request.capability,
                hosts: request.hosts.clone(),
                racks: request.racks.clone(),
                priority: request.priority,
            };
            state
                .pending
                .insert(attempt_id, PendingRequest { seq, request });

            let held = state
                .held_containers
                .values()
                .map(|h| h.container.clone())
                .find(|container| {
                    self.node_filter.is_usable(&container.node_id)
                        && self
                            .best_match(&state, container, &self.reuse_levels())
                            == Some(attempt_id)
                });
            match held {
                Some(container) => {
                    debug!("Reusing held {} for {attempt_id}", container.id);
                    state.held_containers.remove(&container.id);
                    self.assign(&mut state, attempt_id, container, &mut deferred);
                }
                None => deferred.push(Deferred::AddRequest(resource_request)),
            }
        }
        self.run(deferred);
    }

    /// Handles containers granted by the cluster. Offers no request can use, or offers on
    /// nodes that may not be used, go straight back to the cluster.
    pub fn on_containers_allocated(&self, containers: Vec<Container>) {
        let mut deferred = vec![];
        {
            let mut state = self.state.lock();
            let levels = [Locality::NodeLocal, Locality::RackLocal, Locality::NonLocal];
            for container in containers {
                if state.stopped || !self.node_filter.is_usable(&container.node_id) {
                    debug!("Releasing {} on unusable node {}", container.id, container.node_id);
                    deferred.push(Deferred::Release(container.id));
                    continue;
                }
                match self.best_match(&state, &container, &levels) {
                    Some(attempt_id) => self.assign(&mut state, attempt_id, container, &mut deferred),
                    None => {
                        debug!("No pending request matches {}, releasing it", container.id);
                        deferred.push(Deferred::Release(container.id));
                    }
                }
            }
        }
        self.run(deferred);
    }

    /// Gives up the request or container of an attempt. Returns false when the attempt held
    /// no container.
    pub fn deallocate_task(&self, attempt_id: TaskAttemptId, succeeded: bool) -> bool {
        let mut deferred = vec![];
        let allocated = {
            let mut state = self.state.lock();
            if state.pending.remove(&attempt_id).is_some() {
                debug!("Removing pending container request of {attempt_id}");
                deferred.push(Deferred::RemoveRequest(attempt_id));
                false
            } else if let Some(allocation) = state.task_allocations.remove(&attempt_id) {
                let container = allocation.container;
                state.container_assignments.remove(&container.id);
                state.preempted.remove(&container.id);
                if succeeded && self.reuse_enabled && !state.stopped {
                    self.reuse_or_hold(&mut state, container, attempt_id, &mut deferred);
                } else {
                    self.release(&mut state, container.id, Some(attempt_id), &mut deferred);
                }
                true
            } else {
                debug!("{attempt_id} has neither a request nor a container");
                false
            }
        };
        self.run(deferred);
        allocated
    }

    fn reuse_or_hold(
        &self,
        state: &mut SchedulerState,
        container: Container,
        last_attempt: TaskAttemptId,
        deferred: &mut Vec<Deferred>,
    ) {
        if self.node_filter.is_usable(&container.node_id) {
            if let Some(next) = self.best_match(state, &container, &self.reuse_levels()) {
                debug!("Reusing {} of {last_attempt} for {next}", container.id);
                self.assign(state, next, container, deferred);
                return;
            }
            if self.idle_release_timeout_ms > 0 {
                let expires_at = self.clock.now_millis() + self.idle_release_timeout_ms;
                debug!("Holding {} until {expires_at}", container.id);
                state.held_containers.insert(
                    container.id,
                    HeldContainer {
                        container,
                        expires_at,
                    },
                );
                return;
            }
        }
        self.release(state, container.id, Some(last_attempt), deferred);
    }

    /// A container asked to be given back, typically after a launch or stop failure.
    pub fn deallocate_container(&self, container_id: ContainerId) {
        let mut deferred = vec![];
        {
            let mut state = self.state.lock();
            if state.released_containers.contains_key(&container_id) {
                return;
            }
            let attempt_id = state.container_assignments.remove(&container_id);
            if let Some(attempt_id) = attempt_id {
                state.task_allocations.remove(&attempt_id);
            }
            state.held_containers.remove(&container_id);
            state.preempted.remove(&container_id);
            state.released_containers.insert(container_id, attempt_id);
            deferred.push(Deferred::Release(container_id));
        }
        self.run(deferred);
    }

    /// The application has finished with `container_id`; nothing about it is kept.
    pub fn container_finished(&self, container_id: ContainerId) {
        let mut state = self.state.lock();
        state.released_containers.remove(&container_id);
        state.held_containers.remove(&container_id);
        state.preempted.remove(&container_id);
        if let Some(attempt_id) = state.container_assignments.remove(&container_id) {
            state.task_allocations.remove(&attempt_id);
        }
    }

    /// Handles completion reports from the cluster.
    pub fn on_containers_completed(&self, statuses: Vec<ContainerStatus>) {
        let mut deferred = vec![];
        {
            let mut state = self.state.lock();
            for status in statuses {
                let container_id = status.container_id;
                if let Some(attempt_id) = state.released_containers.remove(&container_id) {
                    deferred.push(Deferred::Completed { attempt_id, status });
                } else if let Some(attempt_id) = state.container_assignments.remove(&container_id) {
                    state.task_allocations.remove(&attempt_id);
                    state.preempted.remove(&container_id);
                    deferred.push(Deferred::Completed {
                        attempt_id: Some(attempt_id),
                        status,
                    });
                } else if state.held_containers.remove(&container_id).is_some() {
                    deferred.push(Deferred::Completed {
                        attempt_id: None,
                        status,
                    });
                } else {
                    info!("Ignoring completion of unknown container {container_id}");
                }
            }
        }
        self.run(deferred);
    }

    /// Releases held containers whose idle timeout has passed.
    pub fn release_expired_held(&self, now: u64) {
        let mut deferred = vec![];
        {
            let mut state = self.state.lock();
            let expired: Vec<ContainerId> = state
                .held_containers
                .values()
                .filter(|h| h.expires_at <= now)
                .map(|h| h.container.id)
                .collect();
            for container_id in expired {
                debug!("Held {container_id} expired");
                self.release(&mut state, container_id, None, &mut deferred);
            }
        }
        self.run(deferred);
    }

    /// When the highest-priority pending request cannot fit into the cluster headroom,
    /// preempts the allocated container running the lowest-priority attempt, if that
    /// attempt has a worse priority than the request.
    pub fn preempt_if_needed(&self) {
        let headroom = self.client.available_resources();
        let mut deferred = vec![];
        {
            let mut state = self.state.lock();
            let Some(top) = state
                .pending
                .values()
                .min_by_key(|p| (p.request.priority.0, p.seq))
                .map(|p| (p.request.priority, p.request.capability))
            else {
                return;
            };
            let (priority, capability) = top;
            if capability.fits_in(&headroom) || !state.preempted.is_empty() {
                return;
            }
            let victim = state
                .task_allocations
                .iter()
                .filter(|(_, a)| priority.is_higher_than(&a.priority))
                .max_by_key(|(attempt_id, a)| (a.priority.0, **attempt_id))
                .map(|(attempt_id, a)| (*attempt_id, a.container.id));
            if let Some((attempt_id, container_id)) = victim {
                info!("Preempting {container_id} running {attempt_id} for a priority {priority} request");
                state.preempted.insert(container_id);
                deferred.push(Deferred::Preempt {
                    attempt_id,
                    container_id,
                });
            }
        }
        self.run(deferred);
    }

    pub fn nodes_updated(&self, reports: Vec<NodeReport>) {
        self.callback.nodes_updated(reports);
    }

    pub fn app_shutdown_requested(&self) {
        self.callback.app_shutdown_requested();
    }

    /// Stops matching. Pending requests are withdrawn and held containers released.
    pub fn stop(&self) {
        let mut deferred = vec![];
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            let pending: Vec<TaskAttemptId> = state.pending.drain().map(|(id, _)| id).collect();
            deferred.extend(pending.into_iter().map(Deferred::RemoveRequest));
            let held: Vec<ContainerId> = state.held_containers.keys().copied().collect();
            for container_id in held {
                self.release(&mut state, container_id, None, &mut deferred);
            }
        }
        info!("Task scheduler stopped");
        self.run(deferred);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app_context::SystemClock;
    use crate::test_utils::{allocation_request, ManualClock, MockClusterClient};
    use strata_core::ids::NodeId;
    use strata_core::resource::Resource;

    #[derive(Default)]
    struct RecordingCallback {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingCallback {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl TaskSchedulerAppCallback for RecordingCallback {
        fn task_allocated(&self, request: AllocationRequest, container: Container) {
            self.calls
                .lock()
                .push(format!("allocated {} {}", request.attempt_id.task_id.id, container.id));
        }

        fn container_completed(&self, attempt_id: Option<TaskAttemptId>, status: ContainerStatus) {
            self.calls.lock().push(format!(
                "completed {:?} {}",
                attempt_id.map(|a| a.task_id.id),
                status.container_id
            ));
        }

        fn container_being_released(&self, container_id: ContainerId) {
            self.calls.lock().push(format!("released {container_id}"));
        }

        fn nodes_updated(&self, _reports: Vec<NodeReport>) {}

        fn app_shutdown_requested(&self) {}

        fn preempt_container(&self, attempt_id: TaskAttemptId, container_id: ContainerId) {
            self.calls
                .lock()
                .push(format!("preempt {} {container_id}", attempt_id.task_id.id));
        }
    }

    struct AllNodes {}

    impl NodeFilter for AllNodes {
        fn is_usable(&self, node_id: &NodeId) -> bool {
            node_id.host != "bad-host"
        }
    }

    fn scheduler(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> (
        TaskScheduler<MockClusterClient>,
        Arc<MockClusterClient>,
        Arc<RecordingCallback>,
    ) {
        let client = Arc::new(MockClusterClient::new(Resource::new(8192, 8)));
        let callback = Arc::new(RecordingCallback::default());
        let resolver = Arc::new(RackResolver::new(config.host_racks.clone()));
        let scheduler = TaskScheduler::new(
            &config,
            client.clone(),
            callback.clone(),
            Arc::new(AllNodes {}),
            resolver,
            clock,
        );
        (scheduler, client, callback)
    }

    fn container(id: u64, host: &str) -> Container {
        Container {
            id: ContainerId(id),
            node_id: NodeId::new(host, 8042),
            resource: Resource::new(1024, 1),
            priority: Priority(3),
        }
    }

    #[test]
    fn unmatched_offer_is_released_without_upcall() {
        let (scheduler, client, callback) =
            scheduler(SchedulerConfig::default(), Arc::new(SystemClock::default()));
        scheduler.on_containers_allocated(vec![container(1, "host-1")]);
        assert_eq!(client.released(), vec![ContainerId(1)]);
        assert!(callback.calls().is_empty());

        // an offer on an unusable node is never matched
        scheduler.allocate_task(allocation_request(0, &[], 3));
        scheduler.on_containers_allocated(vec![container(2, "bad-host")]);
        assert_eq!(client.released(), vec![ContainerId(1), ContainerId(2)]);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn offers_prefer_local_then_priority() {
        let config = SchedulerConfig::default()
            .with_host_rack("host-1", "/rack-a")
            .with_host_rack("host-2", "/rack-a");
        let (scheduler, client, callback) = scheduler(config, Arc::new(SystemClock::default()));
        scheduler.allocate_task(allocation_request(0, &[], 3));
        scheduler.allocate_task(allocation_request(1, &["host-2"], 6));
        scheduler.allocate_task(allocation_request(2, &[], 2));
        assert_eq!(client.requests().len(), 3);

        // host-local beats a better priority elsewhere
        scheduler.on_containers_allocated(vec![container(1, "host-2")]);
        // then the best priority wins
        scheduler.on_containers_allocated(vec![container(2, "host-9")]);
        assert_eq!(
            callback.calls(),
            vec!["allocated 1 container_000001", "allocated 2 container_000002"]
        );
        assert!(client.removed().is_empty());
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn deallocating_pending_request_withdraws_it() {
        let (scheduler, client, _) =
            scheduler(SchedulerConfig::default(), Arc::new(SystemClock::default()));
        let request = allocation_request(0, &[], 3);
        let attempt_id = request.attempt_id;
        scheduler.allocate_task(request);
        assert!(!scheduler.deallocate_task(attempt_id, false));
        assert_eq!(client.removed(), vec![attempt_id]);
        assert!(!scheduler.deallocate_task(attempt_id, false));
    }

    #[test]
    fn successful_container_is_reused_for_pending_request() {
        let (scheduler, client, callback) =
            scheduler(SchedulerConfig::default(), Arc::new(SystemClock::default()));
        let first = allocation_request(0, &["host-1"], 3);
        let first_id = first.attempt_id;
        scheduler.allocate_task(first);
        scheduler.on_containers_allocated(vec![container(1, "host-1")]);
        scheduler.allocate_task(allocation_request(1, &["host-1"], 3));

        assert!(scheduler.deallocate_task(first_id, true));
        assert_eq!(
            callback.calls(),
            vec!["allocated 0 container_000001", "allocated 1 container_000001"]
        );
        assert!(client.released().is_empty());
    }

    #[test]
    fn idle_container_is_held_then_released() {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = SchedulerConfig::default().with_container_idle_release_timeout_ms(500);
        let (scheduler, client, callback) = scheduler(config, clock.clone());
        let first = allocation_request(0, &[], 3);
        let first_id = first.attempt_id;
        scheduler.allocate_task(first);
        scheduler.on_containers_allocated(vec![container(1, "host-1")]);
        scheduler.deallocate_task(first_id, true);
        assert_eq!(scheduler.held_count(), 1);

        scheduler.release_expired_held(1_200);
        assert_eq!(scheduler.held_count(), 1);
        scheduler.release_expired_held(1_500);
        assert_eq!(scheduler.held_count(), 0);
        assert_eq!(client.released(), vec![ContainerId(1)]);
        assert_eq!(
            callback.calls().last().map(String::as_str),
            Some("released container_000001")
        );

        scheduler.on_containers_completed(vec![ContainerStatus {
            container_id: ContainerId(1),
            exit_status: 0,
            diagnostics: String::new(),
        }]);
        assert_eq!(
            callback.calls().last().map(String::as_str),
            Some("completed None container_000001")
        );
    }

    #[test]
    fn unknown_completion_is_ignored() {
        let (scheduler, _, callback) =
            scheduler(SchedulerConfig::default(), Arc::new(SystemClock::default()));
        scheduler.on_containers_completed(vec![ContainerStatus {
            container_id: ContainerId(42),
            exit_status: 0,
            diagnostics: String::new(),
        }]);
        assert!(callback.calls().is_empty());
    }

    #[test]
    fn lower_priority_work_is_preempted() {
        let (scheduler, client, callback) =
            scheduler(SchedulerConfig::default(), Arc::new(SystemClock::default()));
        scheduler.allocate_task(allocation_request(0, &[], 9));
        scheduler.on_containers_allocated(vec![container(1, "host-1")]);
        scheduler.allocate_task(allocation_request(1, &[], 3));

        client.set_available(Resource::new(0, 0));
        scheduler.preempt_if_needed();
        assert_eq!(
            callback.calls().last().map(String::as_str),
            Some("preempt 0 container_000001")
        );
        // only one preemption in flight
        scheduler.preempt_if_needed();
        assert_eq!(callback.calls().len(), 2);
    }
}
