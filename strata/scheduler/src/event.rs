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


//! The closed set of events driving the engine. Each top-level variant belongs to exactly one
//! category and is delivered to the single handler registered for it.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use strata_core::ids::{ContainerId, DagId, NodeId, TaskAttemptId, TaskId, VertexId};

use crate::dag::counters::DagCounter;
use crate::dag::runtime_event::RuntimeEvent;
use crate::dag::task::TaskState;
use crate::dag::task_attempt::TaskAttemptState;
use crate::dag::task_spec::TaskSpec;
use crate::dag::vertex::VertexState;
use crate::rm::container::launch_context::ContainerLaunchContext;
use crate::rm::{AllocationRequest, Container, ContainerStatus, NodeReport};

/// Event categories. Exactly one handler is registered per category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Dag,
    Vertex,
    Task,
    TaskAttempt,
    Container,
    Node,
    Scheduler,
    Launcher,
    Heartbeat,
    Speculator,
}

#[derive(Clone)]
pub enum Event {
    Dag(DagId, DagEvent),
    Vertex(VertexId, VertexEvent),
    Task(TaskId, TaskEvent),
    TaskAttempt(TaskAttemptId, TaskAttemptEvent),
    Container(ContainerId, AMContainerEvent),
    Node(NodeId, AMNodeEvent),
    Scheduler(SchedulerEvent),
    Launcher(LauncherEvent),
    Heartbeat(HeartbeatEvent),
    Speculator(SpeculatorEvent),
}

impl Event {
    pub fn category(&self) -> EventCategory {
        match self {
            Event::Dag(..) => EventCategory::Dag,
            Event::Vertex(..) => EventCategory::Vertex,
            Event::Task(..) => EventCategory::Task,
            Event::TaskAttempt(..) => EventCategory::TaskAttempt,
            Event::Container(..) => EventCategory::Container,
            Event::Node(..) => EventCategory::Node,
            Event::Scheduler(_) => EventCategory::Scheduler,
            Event::Launcher(_) => EventCategory::Launcher,
            Event::Heartbeat(_) => EventCategory::Heartbeat,
            Event::Speculator(_) => EventCategory::Speculator,
        }
    }
}

impl Debug for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Dag(dag_id, event) => {
                write!(f, "{} : dag_id={dag_id}.", event.name())
            }
            Event::Vertex(vertex_id, event) => {
                write!(f, "{} : vertex_id={vertex_id}.", event.name())
            }
            Event::Task(task_id, event) => {
                write!(f, "{} : task_id={task_id}.", event.name())
            }
            Event::TaskAttempt(attempt_id, event) => {
                write!(f, "{} : attempt_id={attempt_id}.", event.name())
            }
            Event::Container(container_id, event) => {
                write!(f, "{} : container_id={container_id}.", event.name())
            }
            Event::Node(node_id, event) => {
                write!(f, "{} : node_id={node_id}.", event.name())
            }
            Event::Scheduler(event) => write!(f, "Scheduler{}.", event.name()),
            Event::Launcher(LauncherEvent::Launch { container_id, .. }) => {
                write!(f, "LauncherLaunch : container_id={container_id}.")
            }
            Event::Launcher(LauncherEvent::Stop { container_id, .. }) => {
                write!(f, "LauncherStop : container_id={container_id}.")
            }
            Event::Heartbeat(event) => write!(f, "Heartbeat : {event:?}."),
            Event::Speculator(event) => write!(f, "Speculator : {event:?}."),
        }
    }
}

/// Updates forwarded to the DAG-level ordering policy.
#[derive(Clone, Debug)]
pub enum DagSchedulerUpdate {
    /// An attempt asks to be placed. The policy assigns its priority.
    AttemptScheduled(Box<AllocationRequest>),
    AttemptSucceeded(TaskAttemptId),
}

#[derive(Clone, Debug)]
pub enum DagEvent {
    Init,
    Start,
    Kill { diagnostics: String },
    VertexCompleted { vertex_id: VertexId, state: VertexState },
    DiagnosticsUpdate { diagnostics: String },
    CounterUpdate { updates: Vec<(DagCounter, u64)> },
    SchedulerUpdate(DagSchedulerUpdate),
    InternalError { diagnostics: String },
}

impl DagEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DagEvent::Init => "DagInit",
            DagEvent::Start => "DagStart",
            DagEvent::Kill { .. } => "DagKill",
            DagEvent::VertexCompleted { .. } => "DagVertexCompleted",
            DagEvent::DiagnosticsUpdate { .. } => "DagDiagnosticsUpdate",
            DagEvent::CounterUpdate { .. } => "DagCounterUpdate",
            DagEvent::SchedulerUpdate(_) => "DagSchedulerUpdate",
            DagEvent::InternalError { .. } => "DagInternalError",
        }
    }
}

#[derive(Clone, Debug)]
pub enum VertexEvent {
    Init,
    Start,
    Kill { diagnostics: String },
    /// A source vertex of this vertex moved to RUNNING.
    SourceVertexStarted { source: VertexId },
    /// A task of a source vertex succeeded.
    SourceTaskCompleted { task_id: TaskId },
    TaskCompleted {
        task_id: TaskId,
        state: TaskState,
        diagnostics: Vec<String>,
    },
    /// A succeeded task lost the output of `failed_attempt` and runs again.
    TaskRescheduled {
        task_id: TaskId,
        failed_attempt: TaskAttemptId,
    },
    /// Runtime events reported by an attempt of this vertex.
    RouteEvents { events: Vec<RuntimeEvent> },
    /// An attempt of this vertex could not fetch output of the `failed` producer attempts.
    FetchFailure {
        consumer: TaskAttemptId,
        failed: Vec<TaskAttemptId>,
    },
}

impl VertexEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VertexEvent::Init => "VertexInit",
            VertexEvent::Start => "VertexStart",
            VertexEvent::Kill { .. } => "VertexKill",
            VertexEvent::SourceVertexStarted { .. } => "VertexSourceVertexStarted",
            VertexEvent::SourceTaskCompleted { .. } => "VertexSourceTaskCompleted",
            VertexEvent::TaskCompleted { .. } => "VertexTaskCompleted",
            VertexEvent::TaskRescheduled { .. } => "VertexTaskRescheduled",
            VertexEvent::RouteEvents { .. } => "VertexRouteEvents",
            VertexEvent::FetchFailure { .. } => "VertexFetchFailure",
        }
    }
}

#[derive(Clone, Debug)]
pub enum TaskEvent {
    Schedule,
    Kill { diagnostics: String },
    AttemptLaunched { attempt_id: TaskAttemptId },
    AttemptSucceeded { attempt_id: TaskAttemptId },
    AttemptFailed {
        attempt_id: TaskAttemptId,
        diagnostics: String,
    },
    AttemptKilled {
        attempt_id: TaskAttemptId,
        diagnostics: String,
    },
    AddSpeculativeAttempt,
    /// A routed runtime event for the input log of this task.
    AddInputEvent(Box<RuntimeEvent>),
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Schedule => "TaskSchedule",
            TaskEvent::Kill { .. } => "TaskKill",
            TaskEvent::AttemptLaunched { .. } => "TaskAttemptLaunched",
            TaskEvent::AttemptSucceeded { .. } => "TaskAttemptSucceeded",
            TaskEvent::AttemptFailed { .. } => "TaskAttemptFailed",
            TaskEvent::AttemptKilled { .. } => "TaskAttemptKilled",
            TaskEvent::AddSpeculativeAttempt => "TaskAddSpeculativeAttempt",
            TaskEvent::AddInputEvent(_) => "TaskAddInputEvent",
        }
    }
}

/// Status reported by a running attempt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskAttemptStatusUpdate {
    pub progress: f32,
    pub state_string: String,
    /// Producer attempts whose output this attempt failed to fetch.
    pub fetch_failed_attempts: Vec<TaskAttemptId>,
}

#[derive(Clone, Debug)]
pub enum TaskAttemptEvent {
    Schedule,
    StartedRemotely {
        container_id: ContainerId,
        node_id: NodeId,
    },
    StatusUpdate(TaskAttemptStatusUpdate),
    OutputConsumable,
    CommitPending,
    Done,
    Failed { diagnostics: String },
    TimedOut,
    FailRequest { diagnostics: String },
    KillRequest { diagnostics: String },
    NodeFailed { diagnostics: String },
    ContainerTerminating { diagnostics: String },
    ContainerTerminated { diagnostics: String },
    TooManyFetchFailures { diagnostics: String },
    /// A consumer reported it could not read this attempt's output.
    OutputFailed {
        consumer: TaskAttemptId,
        num_consumers: u32,
    },
    Diagnostics { diagnostics: String },
}

impl TaskAttemptEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TaskAttemptEvent::Schedule => "TaskAttemptSchedule",
            TaskAttemptEvent::StartedRemotely { .. } => "TaskAttemptStartedRemotely",
            TaskAttemptEvent::StatusUpdate(_) => "TaskAttemptStatusUpdate",
            TaskAttemptEvent::OutputConsumable => "TaskAttemptOutputConsumable",
            TaskAttemptEvent::CommitPending => "TaskAttemptCommitPending",
            TaskAttemptEvent::Done => "TaskAttemptDone",
            TaskAttemptEvent::Failed { .. } => "TaskAttemptFailed",
            TaskAttemptEvent::TimedOut => "TaskAttemptTimedOut",
            TaskAttemptEvent::FailRequest { .. } => "TaskAttemptFailRequest",
            TaskAttemptEvent::KillRequest { .. } => "TaskAttemptKillRequest",
            TaskAttemptEvent::NodeFailed { .. } => "TaskAttemptNodeFailed",
            TaskAttemptEvent::ContainerTerminating { .. } => {
                "TaskAttemptContainerTerminating"
            }
            TaskAttemptEvent::ContainerTerminated { .. } => {
                "TaskAttemptContainerTerminated"
            }
            TaskAttemptEvent::TooManyFetchFailures { .. } => {
                "TaskAttemptTooManyFetchFailures"
            }
            TaskAttemptEvent::OutputFailed { .. } => "TaskAttemptOutputFailed",
            TaskAttemptEvent::Diagnostics { .. } => "TaskAttemptDiagnostics",
        }
    }
}

#[derive(Clone, Debug)]
pub enum AMContainerEvent {
    LaunchRequest {
        context: Arc<ContainerLaunchContext>,
    },
    AssignTaskAttempt {
        attempt_id: TaskAttemptId,
        spec: Arc<TaskSpec>,
    },
    Launched,
    LaunchFailed { diagnostics: String },
    /// The running attempt finished successfully and the container may be reused.
    TaskAttemptSucceeded { attempt_id: TaskAttemptId },
    StopRequest,
    NmStopSent,
    NmStopFailed,
    TimedOut,
    NodeFailed { diagnostics: String },
    Completed {
        exit_status: i32,
        diagnostics: String,
    },
}

impl AMContainerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AMContainerEvent::LaunchRequest { .. } => "ContainerLaunchRequest",
            AMContainerEvent::AssignTaskAttempt { .. } => "ContainerAssignTaskAttempt",
            AMContainerEvent::Launched => "ContainerLaunched",
            AMContainerEvent::LaunchFailed { .. } => "ContainerLaunchFailed",
            AMContainerEvent::TaskAttemptSucceeded { .. } => "ContainerTaskAttemptSucceeded",
            AMContainerEvent::StopRequest => "ContainerStopRequest",
            AMContainerEvent::NmStopSent => "ContainerNmStopSent",
            AMContainerEvent::NmStopFailed => "ContainerNmStopFailed",
            AMContainerEvent::TimedOut => "ContainerTimedOut",
            AMContainerEvent::NodeFailed { .. } => "ContainerNodeFailed",
            AMContainerEvent::Completed { .. } => "ContainerCompleted",
        }
    }
}

#[derive(Clone, Debug)]
pub enum AMNodeEvent {
    ContainerAllocated { container_id: ContainerId },
    TaskAttemptEnded {
        attempt_id: TaskAttemptId,
        failed: bool,
    },
    HealthUpdate { healthy: bool },
}

impl AMNodeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AMNodeEvent::ContainerAllocated { .. } => "NodeContainerAllocated",
            AMNodeEvent::TaskAttemptEnded { .. } => "NodeTaskAttemptEnded",
            AMNodeEvent::HealthUpdate { .. } => "NodeHealthUpdate",
        }
    }
}

#[derive(Clone, Debug)]
pub enum SchedulerEvent {
    AllocateTask(Box<AllocationRequest>),
    /// An attempt no longer needs its container or its pending request.
    TaskAttemptEnded {
        attempt_id: TaskAttemptId,
        container_id: Option<ContainerId>,
        succeeded: bool,
    },
    ContainerDeallocate { container_id: ContainerId },
    /// The container reached COMPLETED and is forgotten by the scheduler.
    ContainerCompleted { container_id: ContainerId },
    ContainersAllocated(Vec<Container>),
    ContainersCompleted(Vec<ContainerStatus>),
    NodesUpdated(Vec<NodeReport>),
    ShutdownRequested,
    Tick,
}

impl SchedulerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerEvent::AllocateTask(_) => "AllocateTask",
            SchedulerEvent::TaskAttemptEnded { .. } => "TaskAttemptEnded",
            SchedulerEvent::ContainerDeallocate { .. } => "ContainerDeallocate",
            SchedulerEvent::ContainerCompleted { .. } => "ContainerCompleted",
            SchedulerEvent::ContainersAllocated(_) => "ContainersAllocated",
            SchedulerEvent::ContainersCompleted(_) => "ContainersCompleted",
            SchedulerEvent::NodesUpdated(_) => "NodesUpdated",
            SchedulerEvent::ShutdownRequested => "ShutdownRequested",
            SchedulerEvent::Tick => "Tick",
        }
    }
}

#[derive(Clone, Debug)]
pub enum LauncherEvent {
    Launch {
        container_id: ContainerId,
        node_id: NodeId,
        context: Arc<ContainerLaunchContext>,
    },
    Stop {
        container_id: ContainerId,
        node_id: NodeId,
    },
}

#[derive(Clone, Debug)]
pub enum HeartbeatEvent {
    RegisterContainer(ContainerId),
    UnregisterContainer(ContainerId),
    RegisterAttempt(TaskAttemptId),
    UnregisterAttempt(TaskAttemptId),
}

#[derive(Clone, Debug)]
pub enum SpeculatorEvent {
    AttemptStarted {
        attempt_id: TaskAttemptId,
        timestamp: u64,
    },
    AttemptStatus {
        attempt_id: TaskAttemptId,
        progress: f32,
        state: TaskAttemptState,
        timestamp: u64,
    },
    /// Attempts of `vertex_id` waiting for a container changed by `delta`.
    ContainerNeedUpdate { vertex_id: VertexId, delta: i32 },
}
