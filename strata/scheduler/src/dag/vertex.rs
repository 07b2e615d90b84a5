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


use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use strata_core::ids::{TaskAttemptId, TaskId, VertexId};

use crate::app_context::AppContext;
use crate::dag::edge::Edge;
use crate::dag::invalid_transition;
use crate::dag::runtime_event::{
    InputFailedEvent, RuntimeEvent, RuntimeEventPayload,
};
use crate::dag::task::{Task, TaskState};
use crate::dag::task_spec::TaskTemplate;
use crate::dag::vertex_manager::SlowStartManager;
use crate::event::{DagEvent, Event, TaskAttemptEvent, TaskEvent, VertexEvent};
use crate::plan::{LocalResources, VertexPlan};

/// ```text
/// NEW --init--> INITED --start--> RUNNING --> SUCCEEDED
///                                    |
///                                    +--(task failed)--> FAILED
///                                    +--(kill)--> KILL_WAIT --> KILLED
/// ```
/// A vertex with inputs starts once all of its source vertices have started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexState {
    New,
    Inited,
    Running,
    Succeeded,
    Failed,
    KillWait,
    Killed,
}

impl VertexState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VertexState::Succeeded | VertexState::Failed | VertexState::Killed
        )
    }
}

impl Display for VertexState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VertexState::New => "NEW",
            VertexState::Inited => "INITED",
            VertexState::Running => "RUNNING",
            VertexState::Succeeded => "SUCCEEDED",
            VertexState::Failed => "FAILED",
            VertexState::KillWait => "KILL_WAIT",
            VertexState::Killed => "KILLED",
        };
        write!(f, "{name}")
    }
}

pub struct Vertex {
    id: VertexId,
    name: String,
    dag_name: String,
    state: VertexState,
    plan: VertexPlan,
    dag_local_resources: LocalResources,
    input_edges: BTreeMap<VertexId, Arc<Mutex<Edge>>>,
    output_edges: BTreeMap<VertexId, Arc<Mutex<Edge>>>,
    tasks: Vec<TaskId>,
    started_sources: HashSet<VertexId>,
    slow_start: SlowStartManager,
    completed_tasks: HashSet<TaskId>,
    succeeded_tasks: HashSet<TaskId>,
    failed_tasks: HashSet<TaskId>,
    killed_tasks: HashSet<TaskId>,
    fetch_failures: HashMap<TaskAttemptId, u32>,
    diagnostics: Vec<String>,
    start_time: Option<u64>,
    finish_time: Option<u64>,
}

impl Vertex {
    pub fn new(
        id: VertexId,
        plan: VertexPlan,
        dag_name: impl Into<String>,
        dag_local_resources: LocalResources,
        min_src_fraction: f32,
        max_src_fraction: f32,
    ) -> Self {
        Self {
            id,
            name: plan.name.clone(),
            dag_name: dag_name.into(),
            state: VertexState::New,
            slow_start: SlowStartManager::new(min_src_fraction, max_src_fraction, plan.parallelism),
            plan,
            dag_local_resources,
            input_edges: BTreeMap::new(),
            output_edges: BTreeMap::new(),
            tasks: vec![],
            started_sources: HashSet::new(),
            completed_tasks: HashSet::new(),
            succeeded_tasks: HashSet::new(),
            failed_tasks: HashSet::new(),
            killed_tasks: HashSet::new(),
            fetch_failures: HashMap::new(),
            diagnostics: vec![],
            start_time: None,
            finish_time: None,
        }
    }

    pub fn add_input_edge(&mut self, source: VertexId, edge: Arc<Mutex<Edge>>) {
        self.input_edges.insert(source, edge);
    }

    pub fn add_output_edge(&mut self, destination: VertexId, edge: Arc<Mutex<Edge>>) {
        self.output_edges.insert(destination, edge);
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> VertexState {
        self.state
    }

    pub fn parallelism(&self) -> u32 {
        self.plan.parallelism
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn num_completed_tasks(&self) -> usize {
        self.completed_tasks.len()
    }

    pub fn num_succeeded_tasks(&self) -> usize {
        self.succeeded_tasks.len()
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn scheduled_tasks(&self) -> u32 {
        self.slow_start.scheduled()
    }

    pub fn handle(&mut self, event: VertexEvent, ctx: &AppContext) -> Vec<Event> {
        use VertexEvent as E;
        use VertexState as S;

        let previous = self.state;
        let event_name = event.name();
        let events = match (self.state, event) {
            (S::New, E::Init) => self.init(ctx),
            (S::New | S::Inited, E::Kill { diagnostics }) => {
                self.diagnostics.push(diagnostics);
                self.finish(ctx, S::Killed)
            }
            (S::New, E::SourceVertexStarted { source }) => {
                self.started_sources.insert(source);
                vec![]
            }
            (S::New | S::Inited, E::SourceTaskCompleted { task_id }) => {
                self.slow_start.on_source_task_completed(task_id);
                vec![]
            }

            (S::Inited, E::Start) => self.start(ctx),
            (S::Inited, E::SourceVertexStarted { source }) => {
                self.started_sources.insert(source);
                if self.started_sources.len() == self.input_edges.len() {
                    vec![Event::Vertex(self.id, E::Start)]
                } else {
                    vec![]
                }
            }

            (S::Running, E::SourceTaskCompleted { task_id }) => {
                self.slow_start.on_source_task_completed(task_id);
                self.schedule_tasks()
            }
            (
                S::Running,
                E::TaskCompleted {
                    task_id,
                    state,
                    diagnostics,
                },
            ) => self.task_completed(ctx, task_id, state, diagnostics),
            (S::Running, E::Kill { diagnostics }) => {
                self.diagnostics.push(diagnostics.clone());
                let events = self.kill_incomplete_tasks(&diagnostics);
                if events.is_empty() {
                    self.finish(ctx, S::Killed)
                } else {
                    self.state = S::KillWait;
                    events
                }
            }

            (S::KillWait, E::TaskCompleted { task_id, state, .. }) => {
                self.record_completion(task_id, state);
                if self.completed_tasks.len() == self.tasks.len() {
                    self.finish(ctx, S::Killed)
                } else {
                    vec![]
                }
            }

            (S::Succeeded, E::TaskCompleted { task_id, state: TaskState::Failed, diagnostics }) => {
                // a re-executed task exhausted its attempts after the vertex had succeeded
                self.record_completion(task_id, TaskState::Failed);
                self.diagnostics.extend(diagnostics);
                self.finish(ctx, S::Failed)
            }
            (S::Succeeded, E::TaskCompleted { task_id, state: TaskState::Succeeded, .. }) => {
                self.notify_consumers(task_id)
            }

            (S::Running | S::Succeeded | S::KillWait, E::RouteEvents { events }) => {
                self.route_events(events)
            }
            (S::Running | S::Succeeded | S::KillWait, E::TaskRescheduled { task_id, failed_attempt }) => {
                info!("{} of vertex {} lost its output, retracting it", task_id, self.name);
                self.retract_output(failed_attempt)
            }
            (S::Running | S::Succeeded | S::KillWait, E::FetchFailure { consumer, failed }) => {
                self.fetch_failure(ctx, consumer, failed)
            }

            (
                S::Running | S::Succeeded | S::KillWait,
                E::Start | E::SourceVertexStarted { .. } | E::SourceTaskCompleted { .. },
            )
            | (S::Succeeded | S::KillWait, E::Kill { .. } | E::TaskCompleted { .. }) => vec![],
            (S::Failed | S::Killed, _) => {
                debug!("Vertex {} ignores {event_name} in {}", self.name, self.state);
                vec![]
            }

            (state, _) => invalid_transition(self.id.dag_id, &self.id, &state, event_name),
        };

        if previous != self.state {
            info!(
                "Vertex {} [{}] transitioned from {previous} to {} on {event_name}",
                self.name, self.id, self.state
            );
        }
        events
    }

    fn init(&mut self, ctx: &AppContext) -> Vec<Event> {
        let mut local_resources = self.dag_local_resources.clone();
        local_resources.extend(self.plan.local_resources.clone());

        for index in 0..self.plan.parallelism {
            let task_id = TaskId::new(self.id, index);
            let template = TaskTemplate {
                dag_name: self.dag_name.clone(),
                vertex_name: self.name.clone(),
                processor: self.plan.processor.clone(),
                resource: self.plan.resource,
                location_hint: self
                    .plan
                    .location_hints
                    .get(index as usize)
                    .cloned()
                    .unwrap_or_default(),
                local_resources: local_resources.clone(),
                inputs: self
                    .input_edges
                    .values()
                    .map(|e| e.lock().destination_spec(index))
                    .collect(),
                outputs: self
                    .output_edges
                    .values()
                    .map(|e| e.lock().source_spec(index))
                    .collect(),
            };
            ctx.register_task(Task::new(
                task_id,
                Arc::new(template),
                ctx.config().max_task_attempts,
            ));
            self.tasks.push(task_id);
        }

        let total_source_tasks = self
            .input_edges
            .values()
            .map(|e| e.lock().source_parallelism())
            .sum();
        self.slow_start.set_total_source_tasks(total_source_tasks);
        self.state = VertexState::Inited;

        // tasks exist now, so events held back for them can be delivered
        let mut events = vec![];
        let input_edges: Vec<_> = self.input_edges.values().cloned().collect();
        for edge in input_edges {
            match edge.lock().stop_event_buffering() {
                Ok(flushed) => events.extend(flushed),
                Err(e) => self.routing_problem(format!("Fail to flush buffered events: {e}")),
            }
        }
        events
    }

    fn start(&mut self, ctx: &AppContext) -> Vec<Event> {
        self.state = VertexState::Running;
        self.start_time = Some(ctx.now());
        let mut events: Vec<Event> = self
            .output_edges
            .keys()
            .map(|destination| {
                Event::Vertex(
                    *destination,
                    VertexEvent::SourceVertexStarted { source: self.id },
                )
            })
            .collect();
        if self.tasks.is_empty() {
            events.extend(self.finish(ctx, VertexState::Succeeded));
            return events;
        }
        events.extend(self.schedule_tasks());
        events
    }

    fn schedule_tasks(&mut self) -> Vec<Event> {
        let range = self.slow_start.take_schedulable();
        if !range.is_empty() {
            debug!(
                "Vertex {} scheduling tasks {range:?} after {} source completions",
                self.name,
                self.slow_start.completed_source_tasks()
            );
        }
        range
            .map(|index| Event::Task(TaskId::new(self.id, index), TaskEvent::Schedule))
            .collect()
    }

    fn record_completion(&mut self, task_id: TaskId, state: TaskState) -> bool {
        let first = self.completed_tasks.insert(task_id);
        match state {
            TaskState::Succeeded => {
                self.succeeded_tasks.insert(task_id);
            }
            TaskState::Failed => {
                self.failed_tasks.insert(task_id);
            }
            TaskState::Killed => {
                self.killed_tasks.insert(task_id);
            }
            _ => {}
        }
        first
    }

    fn notify_consumers(&self, task_id: TaskId) -> Vec<Event> {
        self.output_edges
            .keys()
            .map(|destination| {
                Event::Vertex(*destination, VertexEvent::SourceTaskCompleted { task_id })
            })
            .collect()
    }

    fn task_completed(
        &mut self,
        ctx: &AppContext,
        task_id: TaskId,
        state: TaskState,
        diagnostics: Vec<String>,
    ) -> Vec<Event> {
        self.record_completion(task_id, state);
        match state {
            TaskState::Succeeded => {
                let mut events = self.notify_consumers(task_id);
                events.extend(self.check_completion(ctx));
                events
            }
            TaskState::Failed => {
                self.diagnostics.extend(diagnostics);
                let mut events = self.kill_incomplete_tasks(&format!(
                    "Vertex {} failed as task {task_id} failed",
                    self.name
                ));
                events.extend(self.finish(ctx, VertexState::Failed));
                events
            }
            _ => self.check_completion(ctx),
        }
    }

    fn check_completion(&mut self, ctx: &AppContext) -> Vec<Event> {
        if self.completed_tasks.len() < self.tasks.len() {
            return vec![];
        }
        if self.killed_tasks.is_empty() {
            self.finish(ctx, VertexState::Succeeded)
        } else {
            self.finish(ctx, VertexState::Killed)
        }
    }

    fn kill_incomplete_tasks(&self, diagnostics: &str) -> Vec<Event> {
        self.tasks
            .iter()
            .filter(|task_id| !self.completed_tasks.contains(task_id))
            .map(|task_id| {
                Event::Task(
                    *task_id,
                    TaskEvent::Kill {
                        diagnostics: diagnostics.to_owned(),
                    },
                )
            })
            .collect()
    }

    fn finish(&mut self, ctx: &AppContext, state: VertexState) -> Vec<Event> {
        self.state = state;
        self.finish_time = Some(ctx.now());
        let mut events = vec![];
        if state == VertexState::Failed {
            events.push(Event::Dag(
                self.id.dag_id,
                DagEvent::DiagnosticsUpdate {
                    diagnostics: format!(
                        "Vertex failed, vertexName={}, vertexId={}, diagnostics=[{}]",
                        self.name,
                        self.id,
                        self.diagnostics.join(", ")
                    ),
                },
            ));
        }
        events.push(Event::Dag(
            self.id.dag_id,
            DagEvent::VertexCompleted {
                vertex_id: self.id,
                state,
            },
        ));
        events
    }

    fn routing_problem(&mut self, message: String) {
        warn!("Vertex {}: {message}", self.name);
        self.diagnostics.push(message);
    }

    fn route_events(&mut self, runtime_events: Vec<RuntimeEvent>) -> Vec<Event> {
        let mut events = vec![];
        for runtime_event in runtime_events {
            let Some(other) = runtime_event.source_info.edge_vertex_name.clone() else {
                self.routing_problem(format!(
                    "{} event without an edge vertex",
                    runtime_event.payload.kind()
                ));
                continue;
            };
            let edge = match runtime_event.payload {
                RuntimeEventPayload::InputReadError(_) => self
                    .input_edges
                    .values()
                    .find(|e| e.lock().source_name() == other)
                    .cloned(),
                _ => self
                    .output_edges
                    .values()
                    .find(|e| e.lock().destination_name() == other)
                    .cloned(),
            };
            let result = match edge {
                Some(edge) => edge.lock().send_event(runtime_event),
                None => {
                    self.routing_problem(format!("No edge between {} and {other}", self.name));
                    continue;
                }
            };
            match result {
                Ok(routed) => events.extend(routed),
                Err(e) => self.routing_problem(format!("Fail to route event: {e}")),
            }
        }
        events
    }

    /// Tells consumers to drop the output written by `failed_attempt`.
    fn retract_output(&mut self, failed_attempt: TaskAttemptId) -> Vec<Event> {
        let mut events = vec![];
        let mut problems = vec![];
        for edge in self.output_edges.values() {
            let mut edge = edge.lock();
            let retraction = RuntimeEvent::new(
                RuntimeEventPayload::InputFailed(InputFailedEvent {
                    target_index: 0,
                    version: failed_attempt.id,
                }),
                self.name.clone(),
                Some(edge.destination_name().to_owned()),
                failed_attempt,
            );
            match edge.send_event(retraction) {
                Ok(routed) => events.extend(routed),
                Err(e) => problems.push(format!("Fail to retract output: {e}")),
            }
        }
        for problem in problems {
            self.routing_problem(problem);
        }
        events
    }

    fn fetch_failure(
        &mut self,
        ctx: &AppContext,
        consumer: TaskAttemptId,
        failed: Vec<TaskAttemptId>,
    ) -> Vec<Event> {
        let threshold = ctx.config().max_fetch_failure_notifications;
        let mut events = vec![];
        for producer in failed {
            let count = self.fetch_failures.entry(producer).or_default();
            *count += 1;
            debug!("{consumer} reported fetch failure {count} for {producer}");
            if *count == threshold {
                events.push(Event::TaskAttempt(
                    producer,
                    TaskAttemptEvent::TooManyFetchFailures {
                        diagnostics: format!(
                            "{count} fetch failure notifications about {producer}, last from {consumer}"
                        ),
                    },
                ));
            }
        }
        events
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::runtime_event::DataMovementEvent;
    use crate::test_utils::{map_reduce_plan, TestHarness};
    use strata_core::error::Result;

    fn scheduled(events: &[Event]) -> Vec<TaskId> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Task(id, TaskEvent::Schedule) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Inits both vertices of a map-reduce DAG and starts the map vertex.
    fn running_map_reduce(
        harness: &TestHarness,
        maps: u32,
        reduces: u32,
    ) -> Result<(Arc<parking_lot::RwLock<Vertex>>, Arc<parking_lot::RwLock<Vertex>>, Vec<Event>)>
    {
        let ctx = harness.ctx();
        let dag_id = harness.init_dag(map_reduce_plan(maps, reduces))?;
        let map = ctx.vertex(VertexId::new(dag_id, 0))?;
        let reduce = ctx.vertex(VertexId::new(dag_id, 1))?;
        map.write().handle(VertexEvent::Init, ctx);
        reduce.write().handle(VertexEvent::Init, ctx);
        let events = map.write().handle(VertexEvent::Start, ctx);
        Ok((map, reduce, events))
    }

    #[test]
    fn slow_start_gates_consumer_tasks() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let (map, reduce, events) = running_map_reduce(&harness, 4, 2)?;
        let map_id = map.read().id();
        let reduce_id = reduce.read().id();
        assert_eq!(scheduled(&events).len(), 4);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Vertex(id, VertexEvent::SourceVertexStarted { source })
                if *id == reduce_id && *source == map_id
        )));

        let mut reduce = reduce.write();
        let events = reduce.handle(VertexEvent::SourceVertexStarted { source: map_id }, ctx);
        assert!(matches!(
            events.as_slice(),
            [Event::Vertex(_, VertexEvent::Start)]
        ));
        assert!(scheduled(&reduce.handle(VertexEvent::Start, ctx)).is_empty());
        assert_eq!(reduce.state(), VertexState::Running);

        let completed = |index| VertexEvent::SourceTaskCompleted {
            task_id: TaskId::new(map_id, index),
        };
        assert_eq!(
            scheduled(&reduce.handle(completed(0), ctx)),
            vec![TaskId::new(reduce_id, 0)]
        );
        assert!(scheduled(&reduce.handle(completed(1), ctx)).is_empty());
        // a repeated completion counts once
        assert!(scheduled(&reduce.handle(completed(1), ctx)).is_empty());
        assert_eq!(
            scheduled(&reduce.handle(completed(2), ctx)),
            vec![TaskId::new(reduce_id, 1)]
        );
        assert_eq!(reduce.scheduled_tasks(), 2);
        Ok(())
    }

    #[test]
    fn failed_task_fails_the_vertex() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let (map, _, _) = running_map_reduce(&harness, 2, 1)?;
        let mut map = map.write();
        let map_id = map.id();

        let events = map.handle(
            VertexEvent::TaskCompleted {
                task_id: TaskId::new(map_id, 0),
                state: TaskState::Failed,
                diagnostics: vec!["attempt 0 failed".to_owned()],
            },
            ctx,
        );
        assert_eq!(map.state(), VertexState::Failed);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Task(id, TaskEvent::Kill { .. }) if *id == TaskId::new(map_id, 1)
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Dag(_, DagEvent::DiagnosticsUpdate { diagnostics })
                if diagnostics.starts_with("Vertex failed, vertexName=map")
        )));
        assert!(matches!(
            events.last(),
            Some(Event::Dag(_, DagEvent::VertexCompleted { state: VertexState::Failed, .. }))
        ));

        // a terminal vertex ignores everything
        assert!(map.handle(VertexEvent::Start, ctx).is_empty());
        Ok(())
    }

    #[test]
    fn routes_output_and_counts_fetch_failures() -> Result<()> {
        let harness = TestHarness::new();
        let ctx = harness.ctx();
        let (map, reduce, _) = running_map_reduce(&harness, 2, 2)?;
        let reduce_id = reduce.read().id();
        let mut map = map.write();
        let producer = TaskAttemptId::new(TaskId::new(map.id(), 0), 0);

        let data = RuntimeEvent::new(
            RuntimeEventPayload::DataMovement(DataMovementEvent {
                source_index: 1,
                target_index: 0,
                version: 0,
                user_payload: vec![],
            }),
            "map",
            Some("reduce".to_owned()),
            producer,
        );
        let events = map.handle(VertexEvent::RouteEvents { events: vec![data] }, ctx);
        assert!(matches!(
            events.as_slice(),
            [Event::Task(id, TaskEvent::AddInputEvent(_))] if *id == TaskId::new(reduce_id, 1)
        ));

        let consumer = TaskAttemptId::new(TaskId::new(reduce_id, 1), 0);
        let threshold = ctx.config().max_fetch_failure_notifications;
        let mut raised = 0;
        for _ in 0..threshold + 1 {
            let events = map.handle(
                VertexEvent::FetchFailure {
                    consumer,
                    failed: vec![producer],
                },
                ctx,
            );
            raised += events
                .iter()
                .filter(|e| matches!(e, Event::TaskAttempt(id, TaskAttemptEvent::TooManyFetchFailures { .. }) if *id == producer))
                .count();
        }
        assert_eq!(raised, 1);

        let unknown = RuntimeEvent::new(
            RuntimeEventPayload::DataMovement(DataMovementEvent {
                source_index: 0,
                target_index: 0,
                version: 0,
                user_payload: vec![],
            }),
            "map",
            Some("sink".to_owned()),
            producer,
        );
        assert!(map
            .handle(VertexEvent::RouteEvents { events: vec![unknown] }, ctx)
            .is_empty());
        assert!(map.diagnostics()[0].contains("No edge between map and sink"));
        Ok(())
    }
}
