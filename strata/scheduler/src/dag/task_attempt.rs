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


use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, info};

use strata_core::ids::{ContainerId, NodeId, TaskAttemptId};
use strata_core::resource::Priority;

use crate::app_context::AppContext;
use crate::dag::counters::DagCounter;
use crate::dag::invalid_transition;
use crate::dag::task_spec::TaskSpec;
use crate::event::{
    AMNodeEvent, DagEvent, DagSchedulerUpdate, Event, HeartbeatEvent, SchedulerEvent,
    SpeculatorEvent, TaskAttemptEvent, TaskAttemptStatusUpdate, TaskEvent, VertexEvent,
};
use crate::plan::TaskLocationHint;
use crate::rm::AllocationRequest;

/// ```text
/// NEW --> START_WAIT --> RUNNING --> [OUTPUT_CONSUMABLE] --> [COMMIT_PENDING] --> SUCCEEDED
/// START_WAIT | RUNNING* --(fail)--> FAIL_IN_PROGRESS --(container gone)--> FAILED
/// START_WAIT | RUNNING* --(kill)--> KILL_IN_PROGRESS --(container gone)--> KILLED
/// SUCCEEDED --(too many fetch failures)--> FAILED
/// SUCCEEDED --(node failed)--> KILLED
/// ```
/// `RUNNING*` stands for any state in which the attempt occupies a container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskAttemptState {
    New,
    /// Scheduled, waiting for a container to start it.
    StartWait,
    Running,
    /// Output may be consumed before the attempt completes.
    OutputConsumable,
    CommitPending,
    Succeeded,
    /// Failing, waiting for its container to be cleaned up.
    FailInProgress,
    Failed,
    /// Being killed, waiting for its container to be cleaned up.
    KillInProgress,
    Killed,
}

impl TaskAttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskAttemptState::Succeeded | TaskAttemptState::Failed | TaskAttemptState::Killed
        )
    }

    /// Running on a container and expected to heartbeat.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            TaskAttemptState::Running
                | TaskAttemptState::OutputConsumable
                | TaskAttemptState::CommitPending
        )
    }
}

impl Display for TaskAttemptState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskAttemptState::New => "NEW",
            TaskAttemptState::StartWait => "START_WAIT",
            TaskAttemptState::Running => "RUNNING",
            TaskAttemptState::OutputConsumable => "OUTPUT_CONSUMABLE",
            TaskAttemptState::CommitPending => "COMMIT_PENDING",
            TaskAttemptState::Succeeded => "SUCCEEDED",
            TaskAttemptState::FailInProgress => "FAIL_IN_PROGRESS",
            TaskAttemptState::Failed => "FAILED",
            TaskAttemptState::KillInProgress => "KILL_IN_PROGRESS",
            TaskAttemptState::Killed => "KILLED",
        };
        write!(f, "{name}")
    }
}

/// Where an attempt ran relative to its location hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locality {
    DataLocal,
    RackLocal,
    Other,
}

pub struct TaskAttempt {
    id: TaskAttemptId,
    state: TaskAttemptState,
    spec: Arc<TaskSpec>,
    location_hint: TaskLocationHint,
    /// Replaces an earlier attempt, so it carries no locality preference.
    rescheduled: bool,
    speculative: bool,
    container_id: Option<ContainerId>,
    node_id: Option<NodeId>,
    locality: Option<Locality>,
    scheduled_time: Option<u64>,
    launch_time: Option<u64>,
    finish_time: Option<u64>,
    status: TaskAttemptStatusUpdate,
    diagnostics: Vec<String>,
    heartbeat_registered: bool,
    awaiting_container: bool,
    failed_output_consumers: HashSet<TaskAttemptId>,
}

impl TaskAttempt {
    pub fn new(
        spec: Arc<TaskSpec>,
        location_hint: TaskLocationHint,
        rescheduled: bool,
        speculative: bool,
    ) -> Self {
        Self {
            id: spec.attempt_id,
            state: TaskAttemptState::New,
            spec,
            location_hint,
            rescheduled,
            speculative,
            container_id: None,
            node_id: None,
            locality: None,
            scheduled_time: None,
            launch_time: None,
            finish_time: None,
            status: TaskAttemptStatusUpdate::default(),
            diagnostics: vec![],
            heartbeat_registered: false,
            awaiting_container: false,
            failed_output_consumers: HashSet::new(),
        }
    }

    pub fn id(&self) -> TaskAttemptId {
        self.id
    }

    pub fn state(&self) -> TaskAttemptState {
        self.state
    }

    pub fn spec(&self) -> &Arc<TaskSpec> {
        &self.spec
    }

    pub fn is_speculative(&self) -> bool {
        self.speculative
    }

    pub fn container_id(&self) -> Option<ContainerId> {
        self.container_id
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    pub fn locality(&self) -> Option<Locality> {
        self.locality
    }

    pub fn launch_time(&self) -> Option<u64> {
        self.launch_time
    }

    pub fn finish_time(&self) -> Option<u64> {
        self.finish_time
    }

    pub fn progress(&self) -> f32 {
        self.status.progress
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn is_heartbeat_registered(&self) -> bool {
        self.heartbeat_registered
    }

    pub fn handle(&mut self, event: TaskAttemptEvent, ctx: &AppContext) -> Vec<Event> {
        use TaskAttemptEvent as E;
        use TaskAttemptState as S;

        let previous = self.state;
        let event_name = event.name();
        let events = match (self.state, event) {
            (_, E::Diagnostics { diagnostics }) => {
                self.diagnostics.push(diagnostics);
                vec![]
            }

            (S::New, E::Schedule) => self.schedule(ctx),
            (S::New, E::KillRequest { diagnostics }) => {
                self.terminate(ctx, S::Killed, diagnostics)
            }
            (S::New, E::FailRequest { diagnostics }) => {
                self.terminate(ctx, S::Failed, diagnostics)
            }

            (
                S::StartWait,
                E::StartedRemotely {
                    container_id,
                    node_id,
                },
            ) => self.started_remotely(ctx, container_id, node_id),
            (
                s,
                E::KillRequest { diagnostics } | E::NodeFailed { diagnostics },
            ) if s == S::StartWait || s.is_running() => {
                self.begin_termination(ctx, S::KillInProgress, diagnostics)
            }
            (
                s,
                E::FailRequest { diagnostics }
                | E::Failed { diagnostics }
                | E::ContainerTerminating { diagnostics }
                | E::TooManyFetchFailures { diagnostics },
            ) if s == S::StartWait || s.is_running() => {
                self.begin_termination(ctx, S::FailInProgress, diagnostics)
            }
            (s, E::TimedOut) if s == S::StartWait || s.is_running() => {
                let diagnostics = format!(
                    "Attempt timed out after {} ms without a heartbeat",
                    ctx.config().task_heartbeat_timeout_ms
                );
                self.begin_termination(ctx, S::FailInProgress, diagnostics)
            }
            (s, E::ContainerTerminated { diagnostics }) if s == S::StartWait || s.is_running() => {
                let mut events = self.begin_termination(ctx, S::FailInProgress, diagnostics);
                events.extend(self.terminate(ctx, S::Failed, String::new()));
                events
            }

            (s, E::StatusUpdate(status)) if s.is_running() => self.status_update(ctx, status),
            (S::Running, E::OutputConsumable) => {
                self.state = S::OutputConsumable;
                vec![]
            }
            (S::Running | S::OutputConsumable, E::CommitPending) => {
                self.state = S::CommitPending;
                vec![]
            }
            (S::OutputConsumable | S::CommitPending, E::OutputConsumable)
            | (S::CommitPending, E::CommitPending) => vec![],
            (s, E::Done) if s.is_running() => self.succeed(ctx),

            (
                s,
                E::OutputFailed {
                    consumer,
                    num_consumers,
                },
            ) if s.is_running() || s == S::Succeeded => {
                self.output_failed(ctx, consumer, num_consumers)
            }

            // The only mutation of a terminal attempt: consumers could not read its output.
            (S::Succeeded, E::TooManyFetchFailures { diagnostics }) => {
                info!("{} demoted from SUCCEEDED after fetch failures", self.id);
                self.terminate(ctx, S::Failed, diagnostics)
            }
            (S::Succeeded, E::KillRequest { diagnostics } | E::NodeFailed { diagnostics }) => {
                self.terminate(ctx, S::Killed, diagnostics)
            }
            (
                S::Succeeded,
                E::StatusUpdate(_)
                | E::OutputConsumable
                | E::CommitPending
                | E::Done
                | E::Failed { .. }
                | E::TimedOut
                | E::FailRequest { .. }
                | E::ContainerTerminating { .. }
                | E::ContainerTerminated { .. },
            ) => vec![],

            (S::FailInProgress, E::ContainerTerminated { diagnostics }) => {
                self.terminate(ctx, S::Failed, diagnostics)
            }
            (S::KillInProgress, E::ContainerTerminated { diagnostics }) => {
                self.terminate(ctx, S::Killed, diagnostics)
            }
            (S::FailInProgress | S::KillInProgress, e) if !matches!(e, E::Schedule) => {
                debug!("{} ignores {event_name} while terminating", self.id);
                vec![]
            }
            (S::Failed | S::Killed, _) => {
                debug!("{} ignores {event_name} in terminal state {}", self.id, self.state);
                vec![]
            }

            (state, _) => invalid_transition(self.id.dag_id(), &self.id, &state, event_name),
        };

        if previous != self.state {
            if self.state.is_terminal() {
                info!(
                    "{} TaskAttempt transitioned from {previous} to {} on {event_name}",
                    self.id, self.state
                );
            } else {
                debug!(
                    "{} TaskAttempt transitioned from {previous} to {} on {event_name}",
                    self.id, self.state
                );
            }
        }
        events
    }

    fn schedule(&mut self, ctx: &AppContext) -> Vec<Event> {
        self.state = TaskAttemptState::StartWait;
        self.scheduled_time = Some(ctx.now());
        self.awaiting_container = true;

        let (hosts, racks) = if self.rescheduled {
            (vec![], vec![])
        } else {
            let hosts = self.location_hint.hosts.clone();
            let mut racks = self.location_hint.racks.clone();
            for host in &hosts {
                let rack = ctx.rack_resolver().resolve(host);
                if !racks.contains(&rack) {
                    racks.push(rack);
                }
            }
            (hosts, racks)
        };
        let request = AllocationRequest {
            attempt_id: self.id,
            capability: self.spec.resource,
            hosts,
            racks,
            priority: Priority::default(),
            spec: self.spec.clone(),
            rescheduled: self.rescheduled,
        };
        vec![
            Event::Dag(
                self.id.dag_id(),
                DagEvent::SchedulerUpdate(DagSchedulerUpdate::AttemptScheduled(Box::new(
                    request,
                ))),
            ),
            Event::Speculator(SpeculatorEvent::ContainerNeedUpdate {
                vertex_id: self.id.vertex_id(),
                delta: 1,
            }),
        ]
    }

    fn container_no_longer_needed(&mut self) -> Option<Event> {
        if self.awaiting_container {
            self.awaiting_container = false;
            Some(Event::Speculator(SpeculatorEvent::ContainerNeedUpdate {
                vertex_id: self.id.vertex_id(),
                delta: -1,
            }))
        } else {
            None
        }
    }

    fn classify_locality(&self, ctx: &AppContext, node_id: &NodeId) -> Option<Locality> {
        let hint = &self.location_hint;
        if hint.is_empty() {
            return None;
        }
        if hint.hosts.iter().any(|h| h == &node_id.host) {
            return Some(Locality::DataLocal);
        }
        let rack = ctx.rack_resolver().resolve(&node_id.host);
        let hinted_rack = hint.racks.contains(&rack)
            || hint
                .hosts
                .iter()
                .any(|h| ctx.rack_resolver().resolve(h) == rack);
        if hinted_rack {
            Some(Locality::RackLocal)
        } else {
            Some(Locality::Other)
        }
    }

    fn started_remotely(
        &mut self,
        ctx: &AppContext,
        container_id: ContainerId,
        node_id: NodeId,
    ) -> Vec<Event> {
        self.state = TaskAttemptState::Running;
        self.launch_time = Some(ctx.now());
        self.locality = self.classify_locality(ctx, &node_id);
        self.container_id = Some(container_id);
        self.node_id = Some(node_id);
        self.heartbeat_registered = true;
        ctx.metrics().record_attempt_launched(self.id);

        let mut updates = vec![(DagCounter::TotalLaunchedTasks, 1)];
        match self.locality {
            Some(Locality::DataLocal) => updates.push((DagCounter::DataLocalTasks, 1)),
            Some(Locality::RackLocal) => updates.push((DagCounter::RackLocalTasks, 1)),
            Some(Locality::Other) => updates.push((DagCounter::OtherLocalTasks, 1)),
            None => {}
        }

        let mut events = vec![
            Event::Dag(self.id.dag_id(), DagEvent::CounterUpdate { updates }),
            Event::Task(
                self.id.task_id,
                TaskEvent::AttemptLaunched {
                    attempt_id: self.id,
                },
            ),
            Event::Heartbeat(HeartbeatEvent::RegisterAttempt(self.id)),
            Event::Speculator(SpeculatorEvent::AttemptStarted {
                attempt_id: self.id,
                timestamp: ctx.now(),
            }),
        ];
        events.extend(self.container_no_longer_needed());
        events
    }

    fn status_update(&mut self, ctx: &AppContext, status: TaskAttemptStatusUpdate) -> Vec<Event> {
        let mut events = vec![Event::Speculator(SpeculatorEvent::AttemptStatus {
            attempt_id: self.id,
            progress: status.progress,
            state: self.state,
            timestamp: ctx.now(),
        })];
        if !status.fetch_failed_attempts.is_empty() {
            events.push(Event::Vertex(
                self.id.vertex_id(),
                VertexEvent::FetchFailure {
                    consumer: self.id,
                    failed: status.fetch_failed_attempts.clone(),
                },
            ));
        }
        self.status = status;
        events
    }

    fn unregister_heartbeat(&mut self) -> Option<Event> {
        if self.heartbeat_registered {
            self.heartbeat_registered = false;
            Some(Event::Heartbeat(HeartbeatEvent::UnregisterAttempt(self.id)))
        } else {
            None
        }
    }

    fn succeed(&mut self, ctx: &AppContext) -> Vec<Event> {
        self.state = TaskAttemptState::Succeeded;
        self.finish_time = Some(ctx.now());
        self.status.progress = 1.0;

        let mut events: Vec<Event> = self.unregister_heartbeat().into_iter().collect();
        events.push(Event::Scheduler(SchedulerEvent::TaskAttemptEnded {
            attempt_id: self.id,
            container_id: self.container_id,
            succeeded: true,
        }));
        events.push(Event::Task(
            self.id.task_id,
            TaskEvent::AttemptSucceeded {
                attempt_id: self.id,
            },
        ));
        events.push(Event::Speculator(SpeculatorEvent::AttemptStatus {
            attempt_id: self.id,
            progress: 1.0,
            state: TaskAttemptState::Succeeded,
            timestamp: ctx.now(),
        }));
        events.push(Event::Dag(
            self.id.dag_id(),
            DagEvent::SchedulerUpdate(DagSchedulerUpdate::AttemptSucceeded(self.id)),
        ));
        if let Some(node_id) = &self.node_id {
            events.push(Event::Node(
                node_id.clone(),
                AMNodeEvent::TaskAttemptEnded {
                    attempt_id: self.id,
                    failed: false,
                },
            ));
        }
        events
    }

    /// Moves to FAIL_IN_PROGRESS or KILL_IN_PROGRESS and asks the scheduler to clean up the
    /// container or the pending request. The attempt becomes terminal once the container
    /// is gone.
    fn begin_termination(
        &mut self,
        _ctx: &AppContext,
        target: TaskAttemptState,
        diagnostics: String,
    ) -> Vec<Event> {
        if !diagnostics.is_empty() {
            self.diagnostics.push(diagnostics);
        }
        self.state = target;
        let mut events: Vec<Event> = self.container_no_longer_needed().into_iter().collect();
        events.extend(self.unregister_heartbeat());
        events.push(Event::Scheduler(SchedulerEvent::TaskAttemptEnded {
            attempt_id: self.id,
            container_id: self.container_id,
            succeeded: false,
        }));
        events
    }

    /// Enters FAILED or KILLED and tells the task. The task only ever hears about terminal
    /// attempts.
    fn terminate(
        &mut self,
        ctx: &AppContext,
        terminal: TaskAttemptState,
        diagnostics: String,
    ) -> Vec<Event> {
        if !diagnostics.is_empty() {
            self.diagnostics.push(diagnostics);
        }
        self.state = terminal;
        self.finish_time = Some(ctx.now());

        let failed = terminal == TaskAttemptState::Failed;
        let counter = if failed {
            DagCounter::NumFailedTasks
        } else {
            DagCounter::NumKilledTasks
        };
        let diagnostics = self.diagnostics.join(", ");
        let mut events: Vec<Event> = self.container_no_longer_needed().into_iter().collect();
        events.extend(self.unregister_heartbeat());
        events.push(Event::Dag(
            self.id.dag_id(),
            DagEvent::CounterUpdate {
                updates: vec![(counter, 1)],
            },
        ));
        events.push(Event::Task(
            self.id.task_id,
            if failed {
                TaskEvent::AttemptFailed {
                    attempt_id: self.id,
                    diagnostics,
                }
            } else {
                TaskEvent::AttemptKilled {
                    attempt_id: self.id,
                    diagnostics,
                }
            },
        ));
        if let Some(node_id) = &self.node_id {
            events.push(Event::Node(
                node_id.clone(),
                AMNodeEvent::TaskAttemptEnded {
                    attempt_id: self.id,
                    failed,
                },
            ));
        }
        if self.launch_time.is_some() {
            events.push(Event::Speculator(SpeculatorEvent::AttemptStatus {
                attempt_id: self.id,
                progress: self.status.progress,
                state: terminal,
                timestamp: ctx.now(),
            }));
        }
        events
    }

    fn output_failed(
        &mut self,
        ctx: &AppContext,
        consumer: TaskAttemptId,
        num_consumers: u32,
    ) -> Vec<Event> {
        self.failed_output_consumers.insert(consumer);
        let reports = self.failed_output_consumers.len();
        let fraction = reports as f32 / num_consumers.max(1) as f32;
        let config = ctx.config();
        if fraction <= config.max_allowed_output_failures_fraction
            && (reports as u32) < config.max_allowed_output_failures
        {
            debug!("{} has {reports} output failure reports", self.id);
            return vec![];
        }
        vec![Event::TaskAttempt(
            self.id,
            TaskAttemptEvent::TooManyFetchFailures {
                diagnostics: format!(
                    "{reports} of {num_consumers} consumers failed to read the output of {}, last {consumer}",
                    self.id
                ),
            },
        )]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::TestHarness;
    use strata_core::error::Result;

    fn task_events(events: &[Event]) -> Vec<&'static str> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Task(_, event) => Some(event.name()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn kill_in_start_wait_never_registers_heartbeat() -> Result<()> {
        let harness = TestHarness::new();
        let attempt = harness.standalone_attempt(TaskLocationHint::default());
        let mut attempt = attempt.write();
        let ctx = harness.ctx();

        let events = attempt.handle(TaskAttemptEvent::Schedule, ctx);
        assert_eq!(attempt.state(), TaskAttemptState::StartWait);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Dag(_, DagEvent::SchedulerUpdate(DagSchedulerUpdate::AttemptScheduled(_)))
        )));

        let events = attempt.handle(
            TaskAttemptEvent::KillRequest {
                diagnostics: "killed by user".to_owned(),
            },
            ctx,
        );
        assert_eq!(attempt.state(), TaskAttemptState::KillInProgress);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Scheduler(SchedulerEvent::TaskAttemptEnded {
                container_id: None,
                succeeded: false,
                ..
            })
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::Heartbeat(_))));
        // the task has not been told yet
        assert!(task_events(&events).is_empty());

        let events = attempt.handle(
            TaskAttemptEvent::ContainerTerminated {
                diagnostics: "not allocated".to_owned(),
            },
            ctx,
        );
        assert_eq!(attempt.state(), TaskAttemptState::Killed);
        assert_eq!(task_events(&events), vec!["TaskAttemptKilled"]);
        assert!(!attempt.is_heartbeat_registered());
        assert_eq!(
            attempt.diagnostics(),
            &["killed by user".to_owned(), "not allocated".to_owned()]
        );
        Ok(())
    }

    #[test]
    fn started_remotely_records_locality() -> Result<()> {
        let harness = TestHarness::new();
        let attempt = harness.standalone_attempt(TaskLocationHint::hosts(&["host-1"]));
        let mut attempt = attempt.write();
        let ctx = harness.ctx();

        attempt.handle(TaskAttemptEvent::Schedule, ctx);
        let events = attempt.handle(
            TaskAttemptEvent::StartedRemotely {
                container_id: ContainerId(1),
                node_id: NodeId::new("host-1", 8042),
            },
            ctx,
        );
        assert_eq!(attempt.state(), TaskAttemptState::Running);
        assert_eq!(attempt.locality(), Some(Locality::DataLocal));
        assert!(attempt.is_heartbeat_registered());
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Dag(_, DagEvent::CounterUpdate { updates })
                if updates.contains(&(DagCounter::DataLocalTasks, 1))
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Heartbeat(HeartbeatEvent::RegisterAttempt(_))
        )));
        assert_eq!(task_events(&events), vec!["TaskAttemptLaunched"]);
        Ok(())
    }

    #[test]
    fn late_demotion_after_success() -> Result<()> {
        let harness = TestHarness::new();
        let attempt = harness.standalone_attempt(TaskLocationHint::default());
        let mut attempt = attempt.write();
        let ctx = harness.ctx();

        attempt.handle(TaskAttemptEvent::Schedule, ctx);
        attempt.handle(
            TaskAttemptEvent::StartedRemotely {
                container_id: ContainerId(1),
                node_id: NodeId::new("host-1", 8042),
            },
            ctx,
        );
        let events = attempt.handle(TaskAttemptEvent::Done, ctx);
        assert_eq!(attempt.state(), TaskAttemptState::Succeeded);
        assert_eq!(task_events(&events), vec!["TaskAttemptSucceeded"]);

        // late status updates are ignored
        assert!(attempt
            .handle(
                TaskAttemptEvent::StatusUpdate(TaskAttemptStatusUpdate::default()),
                ctx
            )
            .is_empty());

        let consumer = TaskAttemptId::new(
            strata_core::ids::TaskId::new(
                strata_core::ids::VertexId::new(attempt.id().dag_id(), 9),
                0,
            ),
            0,
        );
        let events = attempt.handle(
            TaskAttemptEvent::OutputFailed {
                consumer,
                num_consumers: 1,
            },
            ctx,
        );
        assert!(matches!(
            events.as_slice(),
            [Event::TaskAttempt(_, TaskAttemptEvent::TooManyFetchFailures { .. })]
        ));

        let events = attempt.handle(
            TaskAttemptEvent::TooManyFetchFailures {
                diagnostics: "fetch failures".to_owned(),
            },
            ctx,
        );
        assert_eq!(attempt.state(), TaskAttemptState::Failed);
        assert_eq!(task_events(&events), vec!["TaskAttemptFailed"]);
        Ok(())
    }

    #[test]
    fn invalid_event_raises_internal_error() -> Result<()> {
        let harness = TestHarness::new();
        let attempt = harness.standalone_attempt(TaskLocationHint::default());
        let mut attempt = attempt.write();
        let events = attempt.handle(TaskAttemptEvent::Done, harness.ctx());
        assert_eq!(attempt.state(), TaskAttemptState::New);
        assert!(matches!(
            events.as_slice(),
            [Event::Dag(_, DagEvent::InternalError { .. })]
        ));
        Ok(())
    }
}
