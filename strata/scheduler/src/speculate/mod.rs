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


//! Launches duplicate attempts for tasks that run much slower than their siblings.

pub mod estimator;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;

use strata_core::error::{Result, StrataError};
use strata_core::event_loop::EventSender;
use strata_core::ids::{TaskAttemptId, TaskId, VertexId};

use crate::app_context::AppContext;
use crate::dispatcher::EventHandler;
use crate::event::{Event, SpeculatorEvent, TaskEvent};
use crate::speculate::estimator::{ProgressRateEstimator, TaskRuntimeEstimator};

/// Verdict on one task in a speculation scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeculationValue {
    OnSchedule,
    AlreadySpeculating,
    TooNew,
    ProgressIsGood,
    NotRunning,
    TooLateToSpeculate,
    /// Milliseconds a fresh attempt would save over the running one.
    Worth(u64),
}

#[derive(Debug, Default)]
struct VertexSpeculationState {
    /// Attempts waiting for a container. Nothing of the vertex is speculated meanwhile.
    container_needs: i64,
    /// Tasks that were already judged slow once. They stay candidates while history is
    /// too thin to compute a threshold.
    may_have_speculated: HashSet<TaskId>,
    running_attempts: HashMap<TaskId, HashSet<TaskAttemptId>>,
}

pub struct Speculator {
    ctx: Arc<AppContext>,
    estimator: Mutex<Box<dyn TaskRuntimeEstimator>>,
    vertices: Mutex<HashMap<VertexId, VertexSpeculationState>>,
    wakeup: Notify,
    stopped: AtomicBool,
}

impl Speculator {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let estimator = ProgressRateEstimator::new(ctx.config().speculation_slow_task_threshold);
        Self::with_estimator(ctx, Box::new(estimator))
    }

    pub fn with_estimator(ctx: Arc<AppContext>, estimator: Box<dyn TaskRuntimeEstimator>) -> Self {
        Self {
            ctx,
            estimator: Mutex::new(estimator),
            vertices: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn handle_event(&self, event: SpeculatorEvent) {
        match event {
            SpeculatorEvent::AttemptStarted {
                attempt_id,
                timestamp,
            } => {
                self.estimator.lock().enroll_attempt(attempt_id, timestamp);
                self.vertices
                    .lock()
                    .entry(attempt_id.vertex_id())
                    .or_default()
                    .running_attempts
                    .entry(attempt_id.task_id)
                    .or_default()
                    .insert(attempt_id);
            }
            SpeculatorEvent::AttemptStatus {
                attempt_id,
                progress,
                state,
                timestamp,
            } => {
                self.estimator
                    .lock()
                    .update_attempt(attempt_id, progress, state, timestamp);
                if state.is_terminal() {
                    let mut vertices = self.vertices.lock();
                    if let Some(vertex) = vertices.get_mut(&attempt_id.vertex_id()) {
                        if let Some(running) = vertex.running_attempts.get_mut(&attempt_id.task_id)
                        {
                            running.remove(&attempt_id);
                            if running.is_empty() {
                                vertex.running_attempts.remove(&attempt_id.task_id);
                            }
                        }
                    }
                }
            }
            SpeculatorEvent::ContainerNeedUpdate { vertex_id, delta } => {
                let mut vertices = self.vertices.lock();
                let vertex = vertices.entry(vertex_id).or_default();
                vertex.container_needs = (vertex.container_needs + delta as i64).max(0);
            }
        }
    }

    /// Judges one task of a vertex with `total_tasks` tasks at time `now`.
    fn speculation_value(
        &self,
        estimator: &dyn TaskRuntimeEstimator,
        vertex: &VertexSpeculationState,
        task_id: TaskId,
        total_tasks: u32,
        now: u64,
    ) -> SpeculationValue {
        let threshold = estimator.threshold_runtime(&task_id, total_tasks);
        if !vertex.may_have_speculated.contains(&task_id) && threshold.is_none() {
            return SpeculationValue::OnSchedule;
        }
        let running = match vertex.running_attempts.get(&task_id) {
            Some(running) if running.len() > 1 => return SpeculationValue::AlreadySpeculating,
            Some(running) => running.iter().next().copied(),
            None => None,
        };
        let Some(attempt_id) = running else {
            return SpeculationValue::NotRunning;
        };

        let Some(start) = estimator.attempt_enrollment_time(&attempt_id) else {
            return SpeculationValue::TooNew;
        };
        if start > now {
            return SpeculationValue::TooNew;
        }
        let Some(runtime) = estimator.estimated_runtime(&attempt_id) else {
            return SpeculationValue::TooNew;
        };
        let estimated_end = start + runtime;
        if estimated_end < now {
            return SpeculationValue::ProgressIsGood;
        }
        if let Some(threshold) = threshold {
            if runtime <= threshold {
                return SpeculationValue::OnSchedule;
            }
        }
        let Some(replacement_runtime) =
            estimator.estimated_new_attempt_runtime(&task_id.vertex_id)
        else {
            return SpeculationValue::TooNew;
        };
        let replacement_end = now + replacement_runtime;
        if replacement_end >= estimated_end {
            return SpeculationValue::TooLateToSpeculate;
        }
        SpeculationValue::Worth(estimated_end - replacement_end)
    }

    /// Runs one scan over every tracked vertex and returns the speculative attempts to add.
    /// At most one task per vertex is picked per scan.
    pub fn compute_speculations(&self, now: u64) -> Vec<Event> {
        let config = self.ctx.config();
        let mut estimator = self.estimator.lock();
        let mut vertices = self.vertices.lock();
        let mut events = vec![];
        let mut finished = vec![];
        for (vertex_id, vertex) in vertices.iter_mut() {
            let total_tasks = match self.ctx.vertex(*vertex_id) {
                Ok(v) => {
                    let v = v.read();
                    if v.state().is_terminal() {
                        finished.push(*vertex_id);
                        continue;
                    }
                    v.parallelism()
                }
                Err(e) => {
                    debug!("Stop tracking {vertex_id} due to {e}");
                    finished.push(*vertex_id);
                    continue;
                }
            };
            if vertex.container_needs > 0 {
                continue;
            }
            let running_tasks = vertex.running_attempts.len();
            let allowed = (config.min_allowed_speculative_tasks as f64)
                .max(config.speculative_total_task_ratio * total_tasks as f64)
                .max(config.speculative_running_task_ratio * running_tasks as f64);

            let mut already_speculating = 0usize;
            let mut best: Option<(TaskId, u64)> = None;
            let tasks: Vec<TaskId> = vertex.running_attempts.keys().copied().collect();
            for task_id in tasks {
                match self.speculation_value(&**estimator, vertex, task_id, total_tasks, now) {
                    SpeculationValue::AlreadySpeculating => already_speculating += 1,
                    SpeculationValue::Worth(value) => {
                        if best.map_or(true, |(_, best_value)| value > best_value) {
                            best = Some((task_id, value));
                        }
                    }
                    _ => {}
                }
            }
            if let Some((task_id, value)) = best {
                if allowed > already_speculating as f64 {
                    vertex.may_have_speculated.insert(task_id);
                    info!(
                        "Launching a speculative attempt for {task_id}, expected to save {value}ms"
                    );
                    events.push(Event::Task(task_id, TaskEvent::AddSpeculativeAttempt));
                }
            }
        }
        for vertex_id in finished {
            vertices.remove(&vertex_id);
            estimator.forget_vertex(&vertex_id);
        }
        events
    }

    pub fn tracked_vertices(&self) -> usize {
        self.vertices.lock().len()
    }

    /// Scans periodically until stopped, posting the chosen speculative attempts to `sender`.
    pub async fn run(self: Arc<Self>, sender: EventSender<Event>) {
        let config = self.ctx.config();
        let no_speculate = config.speculation_interval_no_speculate_ms;
        let after_speculate = config.speculation_interval_after_speculate_ms;
        info!("Starting Speculator");
        while !self.stopped.load(Ordering::SeqCst) {
            let started = Instant::now();
            let events = self.compute_speculations(self.ctx.now());
            let scan_ms = started.elapsed().as_millis() as u64;
            let interval = if events.is_empty() {
                no_speculate
            } else {
                after_speculate
            };
            if let Err(e) = sender.post_events(events).await {
                warn!("Speculator fails to post events due to {e}");
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(interval.max(scan_ms))) => {}
                _ = self.wakeup.notified() => {}
            }
        }
        info!("Speculator stopped");
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();
    }
}

/// Feeds dispatched speculator events into a shared [`Speculator`].
pub struct SpeculatorEventHandler {
    speculator: Arc<Speculator>,
}

impl SpeculatorEventHandler {
    pub fn new(speculator: Arc<Speculator>) -> Self {
        Self { speculator }
    }
}

impl EventHandler for SpeculatorEventHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        match event {
            Event::Speculator(event) => {
                self.speculator.handle_event(event);
                Ok(vec![])
            }
            other => Err(StrataError::Internal(format!(
                "Speculator handler received {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::task_attempt::TaskAttemptState;
    use crate::plan::{DagPlan, VertexPlan};
    use crate::test_utils::TestHarness;

    fn started(attempt_id: TaskAttemptId, timestamp: u64) -> SpeculatorEvent {
        SpeculatorEvent::AttemptStarted {
            attempt_id,
            timestamp,
        }
    }

    fn status(
        attempt_id: TaskAttemptId,
        progress: f32,
        state: TaskAttemptState,
        timestamp: u64,
    ) -> SpeculatorEvent {
        SpeculatorEvent::AttemptStatus {
            attempt_id,
            progress,
            state,
            timestamp,
        }
    }

    #[test]
    fn speculates_the_straggler_only() -> Result<()> {
        let harness = TestHarness::new();
        let dag_id = harness.init_dag(DagPlan::new("dag").add_vertex(VertexPlan::new("map", 4)))?;
        let vertex_id = VertexId::new(dag_id, 0);
        let attempt = |task: u32| TaskAttemptId::new(TaskId::new(vertex_id, task), 0);
        let speculator = Speculator::new(harness.ctx_arc());

        for task in 0..2 {
            speculator.handle_event(started(attempt(task), 0));
            speculator.handle_event(status(attempt(task), 1.0, TaskAttemptState::Succeeded, 1000));
        }
        // only finished tasks so far
        assert!(speculator.compute_speculations(500).is_empty());

        speculator.handle_event(started(attempt(2), 0));
        speculator.handle_event(status(attempt(2), 0.1, TaskAttemptState::Running, 2000));
        speculator.handle_event(started(attempt(3), 1000));
        speculator.handle_event(status(attempt(3), 0.9, TaskAttemptState::Running, 2000));

        let events = speculator.compute_speculations(2000);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Event::Task(task_id, TaskEvent::AddSpeculativeAttempt) if *task_id == attempt(2).task_id
        ));
        Ok(())
    }

    #[test]
    fn waits_while_attempts_need_containers() -> Result<()> {
        let harness = TestHarness::new();
        let dag_id = harness.init_dag(DagPlan::new("dag").add_vertex(VertexPlan::new("map", 2)))?;
        let vertex_id = VertexId::new(dag_id, 0);
        let attempt = |task: u32, id: u32| TaskAttemptId::new(TaskId::new(vertex_id, task), id);
        let speculator = Speculator::new(harness.ctx_arc());

        speculator.handle_event(started(attempt(0, 0), 0));
        speculator.handle_event(status(attempt(0, 0), 1.0, TaskAttemptState::Succeeded, 100));
        speculator.handle_event(started(attempt(1, 0), 0));
        speculator.handle_event(status(attempt(1, 0), 0.01, TaskAttemptState::Running, 1000));
        speculator.handle_event(SpeculatorEvent::ContainerNeedUpdate { vertex_id, delta: 1 });
        assert!(speculator.compute_speculations(1000).is_empty());

        speculator.handle_event(SpeculatorEvent::ContainerNeedUpdate {
            vertex_id,
            delta: -1,
        });
        assert_eq!(speculator.compute_speculations(1000).len(), 1);

        // a second attempt is running, so the task is already covered
        speculator.handle_event(started(attempt(1, 1), 1000));
        assert!(speculator.compute_speculations(1100).is_empty());
        Ok(())
    }

    #[test]
    fn only_the_chosen_task_is_remembered() -> Result<()> {
        let harness = TestHarness::new();
        let dag_id = harness.init_dag(DagPlan::new("dag").add_vertex(VertexPlan::new("map", 4)))?;
        let vertex_id = VertexId::new(dag_id, 0);
        let attempt = |task: u32| TaskAttemptId::new(TaskId::new(vertex_id, task), 0);
        let speculator = Speculator::new(harness.ctx_arc());

        speculator.handle_event(started(attempt(0), 0));
        speculator.handle_event(status(attempt(0), 1.0, TaskAttemptState::Succeeded, 1000));
        // both are slow, task 1 is the slower one
        speculator.handle_event(started(attempt(1), 0));
        speculator.handle_event(status(attempt(1), 0.1, TaskAttemptState::Running, 2000));
        speculator.handle_event(started(attempt(2), 0));
        speculator.handle_event(status(attempt(2), 0.2, TaskAttemptState::Running, 2000));

        let events = speculator.compute_speculations(2000);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Event::Task(task_id, TaskEvent::AddSpeculativeAttempt) if *task_id == attempt(1).task_id
        ));
        let vertices = speculator.vertices.lock();
        let remembered: Vec<&TaskId> = vertices[&vertex_id].may_have_speculated.iter().collect();
        assert_eq!(remembered, vec![&attempt(1).task_id]);
        Ok(())
    }

    #[test]
    fn forgets_vertices_of_replaced_dags() -> Result<()> {
        let harness = TestHarness::new();
        let dag_id = harness.init_dag(DagPlan::new("dag").add_vertex(VertexPlan::new("map", 2)))?;
        let attempt = TaskAttemptId::new(TaskId::new(VertexId::new(dag_id, 0), 0), 0);
        let speculator = Speculator::new(harness.ctx_arc());
        speculator.handle_event(started(attempt, 0));
        speculator.compute_speculations(100);
        assert_eq!(speculator.tracked_vertices(), 1);

        harness.init_dag(DagPlan::new("next").add_vertex(VertexPlan::new("map", 2)))?;
        assert!(speculator.compute_speculations(200).is_empty());
        assert_eq!(speculator.tracked_vertices(), 0);
        assert_eq!(speculator.estimator.lock().attempt_enrollment_time(&attempt), None);
        Ok(())
    }
}
