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


//! ```text
//! ALLOCATED --launch request--> LAUNCHING --launched--> IDLE <--succeeded-- RUNNING
//!                                   |                    |  --pulled task-->  |
//!                                   |                    v                    v
//!                                   +----(stop)-----> STOP_REQUESTED --> STOPPING --> COMPLETED
//! ```
//! A container runs at most one attempt at a time. Attempts assigned while it is idle queue
//! up and are pulled in assignment order. An attempt assigned while the container is running,
//! or while it is launching with an attempt already queued, puts the container in error and
//! stops it.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, error, info, warn};

use strata_core::error::{Result, StrataError};
use strata_core::ids::{ContainerId, NodeId, TaskAttemptId};
use strata_core::resource::Resource;

use crate::app_context::AppContext;
use crate::dag::invalid_transition;
use crate::dag::task_spec::TaskSpec;
use crate::dispatcher::EventHandler;
use crate::event::{
    AMContainerEvent, Event, HeartbeatEvent, LauncherEvent, SchedulerEvent, TaskAttemptEvent,
};
use crate::plan::LocalResources;
use crate::rm::container::launch_context::ContainerLaunchContext;
use crate::rm::Container;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AMContainerState {
    Allocated,
    Launching,
    Idle,
    Running,
    StopRequested,
    Stopping,
    Completed,
}

impl Display for AMContainerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AMContainerState::Allocated => "ALLOCATED",
            AMContainerState::Launching => "LAUNCHING",
            AMContainerState::Idle => "IDLE",
            AMContainerState::Running => "RUNNING",
            AMContainerState::StopRequested => "STOP_REQUESTED",
            AMContainerState::Stopping => "STOPPING",
            AMContainerState::Completed => "COMPLETED",
        };
        write!(f, "{name}")
    }
}

/// Work handed to a container that asked for it.
#[derive(Clone, Debug)]
pub struct TaskAssignment {
    pub spec: Arc<TaskSpec>,
    /// Local resources the container has not localized yet.
    pub additional_resources: LocalResources,
}

#[derive(Clone, Debug)]
pub enum PullResponse {
    /// Nothing to run yet, ask again later.
    NoTask,
    /// The container should exit.
    Die,
    Task(TaskAssignment),
}

pub struct AMContainer {
    id: ContainerId,
    node_id: NodeId,
    resource: Resource,
    state: AMContainerState,
    in_error: bool,
    /// Assigned attempts not pulled yet, oldest first.
    pending: VecDeque<(TaskAttemptId, Arc<TaskSpec>)>,
    running: Option<TaskAttemptId>,
    /// Attempts told that this container is going away, still owed a terminated event.
    terminating: VecDeque<TaskAttemptId>,
    completed_attempts: Vec<TaskAttemptId>,
    localized: LocalResources,
    launch_context: Option<Arc<ContainerLaunchContext>>,
    heartbeat_registered: bool,
    completion_notified: bool,
    exit_status: Option<i32>,
    diagnostics: Vec<String>,
}

impl AMContainer {
    pub fn new(container: Container) -> Self {
        Self {
            id: container.id,
            node_id: container.node_id,
            resource: container.resource,
            state: AMContainerState::Allocated,
            in_error: false,
            pending: VecDeque::new(),
            running: None,
            terminating: VecDeque::new(),
            completed_attempts: vec![],
            localized: LocalResources::new(),
            launch_context: None,
            heartbeat_registered: false,
            completion_notified: false,
            exit_status: None,
            diagnostics: vec![],
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn state(&self) -> AMContainerState {
        self.state
    }

    pub fn is_in_error(&self) -> bool {
        self.in_error
    }

    /// The attempt the next pull hands out.
    pub fn pending_attempt(&self) -> Option<TaskAttemptId> {
        self.pending.front().map(|(id, _)| *id)
    }

    pub fn pending_attempts(&self) -> Vec<TaskAttemptId> {
        self.pending.iter().map(|(id, _)| *id).collect()
    }

    pub fn running_attempt(&self) -> Option<TaskAttemptId> {
        self.running
    }

    pub fn completed_attempts(&self) -> &[TaskAttemptId] {
        &self.completed_attempts
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Serves a request for work from the process running in this container.
    pub fn pull_task_context(&mut self) -> (PullResponse, Vec<Event>) {
        match self.state {
            AMContainerState::StopRequested
            | AMContainerState::Stopping
            | AMContainerState::Completed => return (PullResponse::Die, vec![]),
            _ if self.in_error => return (PullResponse::Die, vec![]),
            AMContainerState::Idle => {}
            _ => return (PullResponse::NoTask, vec![]),
        }
        let Some((attempt_id, spec)) = self.pending.pop_front() else {
            return (PullResponse::NoTask, vec![]);
        };
        let additional_resources: LocalResources = spec
            .local_resources
            .iter()
            .filter(|(name, resource)| self.localized.get(*name) != Some(*resource))
            .map(|(name, resource)| (name.clone(), resource.clone()))
            .collect();
        self.localized.extend(additional_resources.clone());
        self.running = Some(attempt_id);
        self.state = AMContainerState::Running;
        debug!("{} pulled {attempt_id}", self.id);
        let events = vec![Event::TaskAttempt(
            attempt_id,
            TaskAttemptEvent::StartedRemotely {
                container_id: self.id,
                node_id: self.node_id.clone(),
            },
        )];
        (
            PullResponse::Task(TaskAssignment {
                spec,
                additional_resources,
            }),
            events,
        )
    }

    pub fn handle(&mut self, event: AMContainerEvent, ctx: &AppContext) -> Vec<Event> {
        use AMContainerEvent as E;
        use AMContainerState as S;

        let previous = self.state;
        let event_name = event.name();
        let events = match (self.state, event) {
            (S::Completed, E::Completed { .. }) => {
                debug!("{} already completed", self.id);
                vec![]
            }
            (_, E::Completed {
                exit_status,
                diagnostics,
            }) => self.complete(exit_status, diagnostics),

            (S::Allocated, E::LaunchRequest { context }) => {
                self.localized = context.local_resources.clone();
                self.state = S::Launching;
                self.heartbeat_registered = true;
                let events = vec![
                    Event::Launcher(LauncherEvent::Launch {
                        container_id: self.id,
                        node_id: self.node_id.clone(),
                        context: context.clone(),
                    }),
                    Event::Heartbeat(HeartbeatEvent::RegisterContainer(self.id)),
                ];
                self.launch_context = Some(context);
                events
            }
            (S::Allocated, E::AssignTaskAttempt { attempt_id, .. }) => {
                self.in_error = true;
                let diagnostics = format!("{attempt_id} assigned to {} before launch", self.id);
                error!("{diagnostics}");
                self.diagnostics.push(diagnostics.clone());
                self.state = S::Completed;
                self.completion_notified = true;
                vec![
                    Event::TaskAttempt(attempt_id, TaskAttemptEvent::ContainerTerminated { diagnostics }),
                    self.deallocate(),
                    Event::Scheduler(SchedulerEvent::ContainerCompleted {
                        container_id: self.id,
                    }),
                ]
            }
            (S::Allocated, E::StopRequest | E::NodeFailed { .. }) => {
                self.state = S::Completed;
                self.completion_notified = true;
                vec![
                    self.deallocate(),
                    Event::Scheduler(SchedulerEvent::ContainerCompleted {
                        container_id: self.id,
                    }),
                ]
            }

            (S::Launching, E::AssignTaskAttempt { attempt_id, .. })
                if !self.pending.is_empty() =>
            {
                self.double_assignment(attempt_id)
            }
            (S::Launching | S::Idle, E::AssignTaskAttempt { attempt_id, spec }) => {
                debug!("{attempt_id} queued on {}", self.id);
                self.pending.push_back((attempt_id, spec));
                vec![]
            }
            (S::Launching, E::Launched) => {
                self.state = S::Idle;
                vec![]
            }
            (S::Launching, E::LaunchFailed { diagnostics }) => {
                self.diagnostics.push(diagnostics.clone());
                self.state = S::Stopping;
                let mut events = self.terminate_current(&diagnostics);
                events.push(self.deallocate());
                events
            }

            (S::Running, E::AssignTaskAttempt { attempt_id, .. }) => {
                self.double_assignment(attempt_id)
            }
            (S::Running, E::TaskAttemptSucceeded { attempt_id }) if self.running == Some(attempt_id) => {
                self.running = None;
                self.completed_attempts.push(attempt_id);
                self.state = S::Idle;
                vec![]
            }
            (S::Idle, E::TaskAttemptSucceeded { .. }) => vec![],

            (S::Launching | S::Idle | S::Running, E::StopRequest) => {
                self.request_stop(&format!("{} stop requested", self.id))
            }
            (S::Launching | S::Idle | S::Running, E::TimedOut) => {
                let reason = format!("{} timed out", self.id);
                self.diagnostics.push(reason.clone());
                self.request_stop(&reason)
            }
            (S::Launching | S::Idle | S::Running, E::NodeFailed { diagnostics }) => {
                self.diagnostics.push(diagnostics.clone());
                self.state = S::Stopping;
                let mut events = self.fail_node_attempts(&diagnostics, true);
                events.push(self.deallocate());
                events
            }

            (S::StopRequested, E::NmStopSent) => {
                self.state = S::Stopping;
                vec![]
            }
            (S::StopRequested, E::NmStopFailed) => {
                self.state = S::Stopping;
                vec![self.deallocate()]
            }
            (S::StopRequested | S::Stopping, E::AssignTaskAttempt { attempt_id, .. }) => {
                self.in_error = true;
                warn!("{attempt_id} assigned to {} which is stopping", self.id);
                self.terminate(
                    attempt_id,
                    &format!("{} is stopping", self.id),
                )
            }
            (S::StopRequested | S::Stopping, E::TaskAttemptSucceeded { attempt_id }) => {
                if self.running == Some(attempt_id) {
                    self.running = None;
                }
                self.terminating.retain(|id| *id != attempt_id);
                self.completed_attempts.push(attempt_id);
                vec![]
            }
            (S::StopRequested | S::Stopping, E::NodeFailed { diagnostics }) => {
                self.diagnostics.push(diagnostics.clone());
                self.fail_node_attempts(&diagnostics, false)
            }
            (
                S::StopRequested | S::Stopping,
                E::StopRequest | E::TimedOut | E::Launched | E::LaunchFailed { .. },
            )
            | (S::Stopping, E::NmStopSent | E::NmStopFailed) => vec![],

            (S::Completed, E::AssignTaskAttempt { attempt_id, .. }) => {
                self.in_error = true;
                warn!("{attempt_id} assigned to completed {}", self.id);
                vec![Event::TaskAttempt(
                    attempt_id,
                    TaskAttemptEvent::ContainerTerminated {
                        diagnostics: format!("{} already completed", self.id),
                    },
                )]
            }
            (S::Completed, E::NodeFailed { diagnostics }) => self
                .completed_attempts
                .iter()
                .map(|attempt_id| {
                    Event::TaskAttempt(
                        *attempt_id,
                        TaskAttemptEvent::NodeFailed {
                            diagnostics: diagnostics.clone(),
                        },
                    )
                })
                .collect(),
            (S::Completed, _) => vec![],

            (state, _) => {
                self.in_error = true;
                match ctx.current_dag_id() {
                    Some(dag_id) => invalid_transition(dag_id, &self.id, &state, event_name),
                    None => {
                        error!("Invalid event {event_name} on {} in state {state}", self.id);
                        vec![]
                    }
                }
            }
        };

        if previous != self.state {
            if self.state == AMContainerState::Completed {
                info!("{} on {} completed", self.id, self.node_id);
            }
            debug!(
                "{} transitioned from {previous} to {} on {event_name}",
                self.id, self.state
            );
        }
        events
    }

    fn deallocate(&self) -> Event {
        Event::Scheduler(SchedulerEvent::ContainerDeallocate {
            container_id: self.id,
        })
    }

    fn terminate(&mut self, attempt_id: TaskAttemptId, diagnostics: &str) -> Vec<Event> {
        if !self.terminating.contains(&attempt_id) {
            self.terminating.push_back(attempt_id);
        }
        vec![Event::TaskAttempt(
            attempt_id,
            TaskAttemptEvent::ContainerTerminating {
                diagnostics: diagnostics.to_owned(),
            },
        )]
    }

    /// Tells the pending and running attempts that the container is going away.
    fn terminate_current(&mut self, diagnostics: &str) -> Vec<Event> {
        let current = self.take_current();
        current
            .into_iter()
            .flat_map(|attempt_id| self.terminate(attempt_id, diagnostics))
            .collect()
    }

    /// Empties the queue and the running slot, queued attempts first.
    fn take_current(&mut self) -> Vec<TaskAttemptId> {
        self.pending
            .drain(..)
            .map(|(id, _)| id)
            .chain(self.running.take())
            .collect()
    }

    fn request_stop(&mut self, reason: &str) -> Vec<Event> {
        self.state = AMContainerState::StopRequested;
        let mut events = vec![Event::Launcher(LauncherEvent::Stop {
            container_id: self.id,
            node_id: self.node_id.clone(),
        })];
        events.extend(self.terminate_current(reason));
        events
    }

    fn double_assignment(&mut self, attempt_id: TaskAttemptId) -> Vec<Event> {
        self.in_error = true;
        let diagnostics = format!(
            "{attempt_id} assigned to {} which already has {:?}",
            self.id,
            self.pending_attempt().or(self.running)
        );
        error!("{diagnostics}");
        self.diagnostics.push(diagnostics.clone());
        let mut events = self.request_stop(&diagnostics);
        events.extend(self.terminate(attempt_id, &diagnostics));
        events
    }

    /// Node failure: current attempts will never finish here, and completed attempts lost
    /// their output.
    fn fail_node_attempts(&mut self, diagnostics: &str, include_current: bool) -> Vec<Event> {
        let mut failed: Vec<TaskAttemptId> = self.completed_attempts.clone();
        if include_current {
            for attempt_id in self.take_current() {
                if !self.terminating.contains(&attempt_id) {
                    self.terminating.push_back(attempt_id);
                }
                failed.push(attempt_id);
            }
        } else {
            failed.extend(self.terminating.iter().copied());
        }
        failed
            .into_iter()
            .map(|attempt_id| {
                Event::TaskAttempt(
                    attempt_id,
                    TaskAttemptEvent::NodeFailed {
                        diagnostics: diagnostics.to_owned(),
                    },
                )
            })
            .collect()
    }

    fn complete(&mut self, exit_status: i32, diagnostics: String) -> Vec<Event> {
        self.state = AMContainerState::Completed;
        self.exit_status = Some(exit_status);
        if !diagnostics.is_empty() {
            self.diagnostics.push(diagnostics.clone());
        }
        let mut owed: Vec<TaskAttemptId> = self.terminating.drain(..).collect();
        owed.extend(self.take_current());
        let reason = format!(
            "{} completed with exit status {exit_status}. {diagnostics}",
            self.id
        );
        let mut events: Vec<Event> = owed
            .into_iter()
            .map(|attempt_id| {
                Event::TaskAttempt(
                    attempt_id,
                    TaskAttemptEvent::ContainerTerminated {
                        diagnostics: reason.trim_end().to_owned(),
                    },
                )
            })
            .collect();
        if self.heartbeat_registered {
            self.heartbeat_registered = false;
            events.push(Event::Heartbeat(HeartbeatEvent::UnregisterContainer(self.id)));
        }
        if !self.completion_notified {
            self.completion_notified = true;
            events.push(Event::Scheduler(SchedulerEvent::ContainerCompleted {
                container_id: self.id,
            }));
        }
        events
    }
}

/// Routes container events to the addressed [`AMContainer`]. Events for containers that
/// were never registered are dropped.
pub struct AMContainerEventHandler {
    ctx: Arc<AppContext>,
}

impl AMContainerEventHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl EventHandler for AMContainerEventHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Container(container_id, event) = event else {
            return Err(StrataError::Internal(format!(
                "AMContainerEventHandler received {event:?}"
            )));
        };
        let Ok(container) = self.ctx.container(container_id) else {
            warn!("Ignore {} for unknown {container_id}", event.name());
            return Ok(vec![]);
        };
        let mut container = container.write();
        Ok(container.handle(event, &self.ctx))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::task_spec::TaskSpec;
    use crate::plan::LocalResource;
    use crate::test_utils::{attempt_id, TestHarness};
    use strata_core::error::Result;
    use strata_core::resource::Priority;

    fn container() -> AMContainer {
        AMContainer::new(Container {
            id: ContainerId(1),
            node_id: NodeId::new("host-1", 8042),
            resource: Resource::new(1024, 1),
            priority: Priority(3),
        })
    }

    fn spec(attempt_id: TaskAttemptId, resources: &[(&str, &str)]) -> Arc<TaskSpec> {
        Arc::new(TaskSpec {
            attempt_id,
            dag_name: "dag".to_owned(),
            vertex_name: "map".to_owned(),
            processor: "map-processor".to_owned(),
            resource: Resource::new(1024, 1),
            local_resources: resources
                .iter()
                .map(|(name, uri)| {
                    (
                        name.to_string(),
                        LocalResource {
                            uri: uri.to_string(),
                            size: 1,
                            timestamp: 1,
                        },
                    )
                })
                .collect(),
            inputs: vec![],
            outputs: vec![],
        })
    }

    fn assign(attempt_id: TaskAttemptId, resources: &[(&str, &str)]) -> AMContainerEvent {
        AMContainerEvent::AssignTaskAttempt {
            attempt_id,
            spec: spec(attempt_id, resources),
        }
    }

    fn launched(container: &mut AMContainer, ctx: &AppContext) {
        let context = Arc::new(ContainerLaunchContext::for_dag(&crate::plan::DagPlan::new("dag")));
        container.handle(AMContainerEvent::LaunchRequest { context }, ctx);
        container.handle(AMContainerEvent::Launched, ctx);
    }

    fn attempt_events(events: &[Event]) -> Vec<(TaskAttemptId, &'static str)> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::TaskAttempt(id, event) => Some((*id, event.name())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn runs_attempts_one_at_a_time() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let mut container = container();
        let first = attempt_id(0, 0);
        let second = attempt_id(1, 0);

        assert!(matches!(container.pull_task_context().0, PullResponse::NoTask));
        launched(&mut container, ctx);
        container.handle(assign(first, &[("jar", "a.jar")]), ctx);

        let (response, events) = container.pull_task_context();
        let PullResponse::Task(assignment) = response else {
            panic!("expected a task, got {response:?}");
        };
        assert_eq!(assignment.additional_resources.len(), 1);
        assert_eq!(attempt_events(&events), vec![(first, "TaskAttemptStartedRemotely")]);
        assert_eq!(container.state(), AMContainerState::Running);

        container.handle(AMContainerEvent::TaskAttemptSucceeded { attempt_id: first }, ctx);
        assert_eq!(container.state(), AMContainerState::Idle);
        container.handle(assign(second, &[("jar", "a.jar"), ("conf", "b.xml")]), ctx);
        let (response, _) = container.pull_task_context();
        let PullResponse::Task(assignment) = response else {
            panic!("expected a task, got {response:?}");
        };
        // only the resource not localized for the first attempt
        assert_eq!(
            assignment.additional_resources.keys().collect::<Vec<_>>(),
            vec!["conf"]
        );
        assert_eq!(container.completed_attempts(), &[first]);
        Ok(())
    }

    #[test]
    fn idle_container_queues_assignments_in_order() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let mut container = container();
        let first = attempt_id(0, 0);
        let second = attempt_id(1, 0);
        launched(&mut container, ctx);

        assert!(container.handle(assign(first, &[]), ctx).is_empty());
        assert!(container.handle(assign(second, &[]), ctx).is_empty());
        assert!(!container.is_in_error());
        assert_eq!(container.state(), AMContainerState::Idle);
        assert_eq!(container.pending_attempts(), vec![first, second]);

        let (_, events) = container.pull_task_context();
        assert_eq!(attempt_events(&events), vec![(first, "TaskAttemptStartedRemotely")]);
        // the next one waits until the running attempt is done
        assert!(matches!(container.pull_task_context().0, PullResponse::NoTask));

        container.handle(AMContainerEvent::TaskAttemptSucceeded { attempt_id: first }, ctx);
        let (_, events) = container.pull_task_context();
        assert_eq!(attempt_events(&events), vec![(second, "TaskAttemptStartedRemotely")]);
        assert!(container.pending_attempts().is_empty());
        assert_eq!(container.running_attempt(), Some(second));
        Ok(())
    }

    #[test]
    fn second_assignment_while_launching_is_rejected() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let mut container = container();
        let first = attempt_id(0, 0);
        let second = attempt_id(1, 0);
        let context = Arc::new(ContainerLaunchContext::for_dag(&crate::plan::DagPlan::new("dag")));
        container.handle(AMContainerEvent::LaunchRequest { context }, ctx);
        container.handle(assign(first, &[]), ctx);

        let events = container.handle(assign(second, &[]), ctx);
        assert!(container.is_in_error());
        assert_eq!(container.state(), AMContainerState::StopRequested);
        assert_eq!(
            attempt_events(&events),
            vec![
                (first, "TaskAttemptContainerTerminating"),
                (second, "TaskAttemptContainerTerminating")
            ]
        );
        Ok(())
    }

    #[test]
    fn double_assignment_stops_the_container() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let mut container = container();
        let first = attempt_id(0, 0);
        let second = attempt_id(1, 0);
        launched(&mut container, ctx);
        container.handle(assign(first, &[]), ctx);
        container.pull_task_context();

        let events = container.handle(assign(second, &[]), ctx);
        assert!(container.is_in_error());
        assert_eq!(container.state(), AMContainerState::StopRequested);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Launcher(LauncherEvent::Stop { .. }))));
        assert_eq!(
            attempt_events(&events),
            vec![
                (first, "TaskAttemptContainerTerminating"),
                (second, "TaskAttemptContainerTerminating")
            ]
        );
        assert!(matches!(container.pull_task_context().0, PullResponse::Die));

        container.handle(AMContainerEvent::NmStopSent, ctx);
        let events = container.handle(
            AMContainerEvent::Completed {
                exit_status: crate::rm::EXIT_STATUS_ABORTED,
                diagnostics: String::new(),
            },
            ctx,
        );
        assert_eq!(
            attempt_events(&events),
            vec![
                (first, "TaskAttemptContainerTerminated"),
                (second, "TaskAttemptContainerTerminated")
            ]
        );
        Ok(())
    }

    #[test]
    fn duplicate_completion_is_a_no_op() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let mut container = container();
        launched(&mut container, ctx);
        container.handle(assign(attempt_id(0, 0), &[]), ctx);
        container.pull_task_context();

        let completed = || AMContainerEvent::Completed {
            exit_status: 1,
            diagnostics: "process exited".to_owned(),
        };
        let events = container.handle(completed(), ctx);
        assert_eq!(container.state(), AMContainerState::Completed);
        assert_eq!(attempt_events(&events).len(), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Scheduler(SchedulerEvent::ContainerCompleted { .. })
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Heartbeat(HeartbeatEvent::UnregisterContainer(_)))));

        assert!(container.handle(completed(), ctx).is_empty());
        assert_eq!(container.exit_status(), Some(1));
        Ok(())
    }

    #[test]
    fn node_failure_reaches_completed_attempts() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let mut container = container();
        let first = attempt_id(0, 0);
        launched(&mut container, ctx);
        container.handle(assign(first, &[]), ctx);
        container.pull_task_context();
        container.handle(AMContainerEvent::TaskAttemptSucceeded { attempt_id: first }, ctx);
        container.handle(
            AMContainerEvent::Completed {
                exit_status: 0,
                diagnostics: String::new(),
            },
            ctx,
        );

        let events = container.handle(
            AMContainerEvent::NodeFailed {
                diagnostics: "host-1 lost".to_owned(),
            },
            ctx,
        );
        assert_eq!(attempt_events(&events), vec![(first, "TaskAttemptNodeFailed")]);

        // work assigned after completion is turned away
        let late = attempt_id(1, 0);
        let events = container.handle(assign(late, &[]), ctx);
        assert!(container.is_in_error());
        assert_eq!(attempt_events(&events), vec![(late, "TaskAttemptContainerTerminated")]);
        Ok(())
    }
}
