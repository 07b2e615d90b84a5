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


use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, info, warn};

use strata_core::ids::{TaskAttemptId, TaskId};

use crate::app_context::AppContext;
use crate::dag::counters::DagCounter;
use crate::dag::invalid_transition;
use crate::dag::runtime_event::RuntimeEvent;
use crate::dag::task_attempt::TaskAttempt;
use crate::dag::task_spec::TaskTemplate;
use crate::event::{DagEvent, Event, TaskAttemptEvent, TaskEvent, VertexEvent};

/// ```text
/// NEW --> SCHEDULED --> RUNNING --> SUCCEEDED
///                          |  ^          |
///                          |  +----------+ (successful attempt lost its output)
///                          +--> FAILED (retry budget exhausted)
/// SCHEDULED | RUNNING --(kill)--> KILL_WAIT --> KILLED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    New,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    KillWait,
    Killed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Killed
        )
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::New => "NEW",
            TaskState::Scheduled => "SCHEDULED",
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::KillWait => "KILL_WAIT",
            TaskState::Killed => "KILLED",
        };
        write!(f, "{name}")
    }
}

/// What the task knows about one of its attempts. Updated only from attempt events, so an
/// attempt counts as live until it has reported a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Live,
    Succeeded,
    Failed,
    Killed,
}

pub struct Task {
    id: TaskId,
    state: TaskState,
    template: Arc<TaskTemplate>,
    max_attempts: u32,
    attempts: BTreeMap<u32, AttemptOutcome>,
    next_attempt_number: u32,
    failed_attempts: u32,
    successful_attempt: Option<TaskAttemptId>,
    success_counted: bool,
    commit_attempt: Option<TaskAttemptId>,
    input_events: Vec<RuntimeEvent>,
    diagnostics: Vec<String>,
    scheduled_time: Option<u64>,
    finish_time: Option<u64>,
}

impl Task {
    pub fn new(id: TaskId, template: Arc<TaskTemplate>, max_attempts: u32) -> Self {
        Self {
            id,
            state: TaskState::New,
            template,
            max_attempts,
            attempts: BTreeMap::new(),
            next_attempt_number: 0,
            failed_attempts: 0,
            successful_attempt: None,
            success_counted: false,
            commit_attempt: None,
            input_events: vec![],
            diagnostics: vec![],
            scheduled_time: None,
            finish_time: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn successful_attempt(&self) -> Option<TaskAttemptId> {
        self.successful_attempt
    }

    pub fn attempt_ids(&self) -> Vec<TaskAttemptId> {
        self.attempts
            .keys()
            .map(|n| TaskAttemptId::new(self.id, *n))
            .collect()
    }

    pub fn live_attempts(&self) -> Vec<TaskAttemptId> {
        self.attempts
            .iter()
            .filter(|(_, outcome)| **outcome == AttemptOutcome::Live)
            .map(|(n, _)| TaskAttemptId::new(self.id, *n))
            .collect()
    }

    pub fn failed_attempt_count(&self) -> u32 {
        self.failed_attempts
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn finish_time(&self) -> Option<u64> {
        self.finish_time
    }

    pub fn input_events(&self, from_index: usize, max_events: usize) -> Vec<RuntimeEvent> {
        self.input_events
            .iter()
            .skip(from_index)
            .take(max_events)
            .cloned()
            .collect()
    }

    pub fn num_input_events(&self) -> usize {
        self.input_events.len()
    }

    /// The first live attempt to ask may commit. It keeps the right until it ends.
    pub fn can_commit(&mut self, attempt_id: TaskAttemptId) -> bool {
        if self.attempts.get(&attempt_id.id) != Some(&AttemptOutcome::Live) {
            return false;
        }
        match self.commit_attempt {
            None => {
                info!("{attempt_id} given the right to commit for {}", self.id);
                self.commit_attempt = Some(attempt_id);
                true
            }
            Some(committer) => committer == attempt_id,
        }
    }

    pub fn handle(&mut self, event: TaskEvent, ctx: &AppContext) -> Vec<Event> {
        use TaskEvent as E;
        use TaskState as S;

        let previous = self.state;
        let event_name = event.name();
        let events = match (self.state, event) {
            (_, E::AddInputEvent(event)) => {
                self.input_events.push(*event);
                vec![]
            }

            (S::New, E::Schedule) => {
                self.state = S::Scheduled;
                self.scheduled_time = Some(ctx.now());
                self.add_attempt(ctx, false, false)
            }
            (S::New, E::Kill { diagnostics }) => {
                self.diagnostics.push(diagnostics);
                self.finish(ctx, S::Killed)
            }

            (S::Scheduled | S::Running, E::AttemptLaunched { .. }) => {
                self.state = S::Running;
                vec![]
            }
            (S::Scheduled | S::Running, E::AttemptSucceeded { attempt_id }) => {
                self.attempt_succeeded(ctx, attempt_id)
            }
            (
                S::Scheduled | S::Running,
                E::AttemptFailed {
                    attempt_id,
                    diagnostics,
                },
            ) => self.attempt_failed(ctx, attempt_id, diagnostics),
            (S::Scheduled | S::Running, E::AttemptKilled { attempt_id, .. }) => {
                self.record(attempt_id, AttemptOutcome::Killed);
                if self.live_attempts().is_empty() {
                    self.add_attempt(ctx, true, false)
                } else {
                    vec![]
                }
            }
            // the only path to two live attempts of one task
            (S::Running, E::AddSpeculativeAttempt) => {
                if self.live_attempts().len() == 1 {
                    let events = self.add_attempt(ctx, false, true);
                    info!("Speculative attempt added for {}", self.id);
                    events
                } else {
                    debug!("{} already has a duplicate attempt", self.id);
                    vec![]
                }
            }
            (S::Scheduled, E::AddSpeculativeAttempt) => vec![],
            (S::Scheduled | S::Running, E::Kill { diagnostics }) => {
                self.diagnostics.push(diagnostics.clone());
                let live = self.live_attempts();
                if live.is_empty() {
                    self.finish(ctx, S::Killed)
                } else {
                    self.state = S::KillWait;
                    kill_attempts(live, &diagnostics)
                }
            }

            (
                S::Succeeded,
                E::AttemptFailed {
                    attempt_id,
                    diagnostics,
                },
            ) if self.successful_attempt == Some(attempt_id) => {
                self.record(attempt_id, AttemptOutcome::Failed);
                self.failed_attempts += 1;
                self.diagnostics.push(diagnostics);
                self.reexecute(ctx, attempt_id)
            }
            (S::Succeeded, E::AttemptKilled { attempt_id, .. })
                if self.successful_attempt == Some(attempt_id) =>
            {
                self.record(attempt_id, AttemptOutcome::Killed);
                self.reexecute(ctx, attempt_id)
            }
            (
                S::Succeeded | S::Failed | S::Killed,
                e @ (E::AttemptSucceeded { .. }
                | E::AttemptFailed { .. }
                | E::AttemptKilled { .. }),
            ) => {
                self.record_ended(&e);
                vec![]
            }
            (
                S::Succeeded | S::Failed | S::Killed | S::KillWait,
                E::AttemptLaunched { .. } | E::Kill { .. } | E::AddSpeculativeAttempt,
            ) => vec![],

            (
                S::KillWait,
                e @ (E::AttemptSucceeded { .. }
                | E::AttemptFailed { .. }
                | E::AttemptKilled { .. }),
            ) => {
                self.record_ended(&e);
                if self.live_attempts().is_empty() {
                    self.finish(ctx, S::Killed)
                } else {
                    vec![]
                }
            }

            (state, _) => invalid_transition(self.id.dag_id(), &self.id, &state, event_name),
        };

        if previous != self.state {
            debug!(
                "{} Task transitioned from {previous} to {} on {event_name}",
                self.id, self.state
            );
        }
        events
    }

    fn record(&mut self, attempt_id: TaskAttemptId, outcome: AttemptOutcome) {
        self.attempts.insert(attempt_id.id, outcome);
        if outcome != AttemptOutcome::Live && self.commit_attempt == Some(attempt_id) {
            self.commit_attempt = None;
        }
    }

    fn record_ended(&mut self, event: &TaskEvent) {
        let (attempt_id, outcome) = match event {
            TaskEvent::AttemptSucceeded { attempt_id } => (*attempt_id, AttemptOutcome::Succeeded),
            TaskEvent::AttemptFailed { attempt_id, .. } => (*attempt_id, AttemptOutcome::Failed),
            TaskEvent::AttemptKilled { attempt_id, .. } => (*attempt_id, AttemptOutcome::Killed),
            _ => return,
        };
        self.record(attempt_id, outcome);
    }

    fn add_attempt(&mut self, ctx: &AppContext, rescheduled: bool, speculative: bool) -> Vec<Event> {
        let attempt_id = TaskAttemptId::new(self.id, self.next_attempt_number);
        self.next_attempt_number += 1;
        let attempt = TaskAttempt::new(
            self.template.spec_for(attempt_id),
            self.template.location_hint.clone(),
            rescheduled,
            speculative,
        );
        ctx.register_attempt(attempt);
        self.attempts.insert(attempt_id.id, AttemptOutcome::Live);
        if speculative {
            ctx.metrics().record_speculative_attempt(attempt_id);
        }
        debug!("{attempt_id} created for {}", self.id);
        vec![Event::TaskAttempt(attempt_id, TaskAttemptEvent::Schedule)]
    }

    fn attempt_succeeded(&mut self, ctx: &AppContext, attempt_id: TaskAttemptId) -> Vec<Event> {
        self.record(attempt_id, AttemptOutcome::Succeeded);
        self.successful_attempt = Some(attempt_id);
        let mut events = kill_attempts(
            self.live_attempts(),
            &format!("Attempt {attempt_id} of the task already succeeded"),
        );
        events.extend(self.finish(ctx, TaskState::Succeeded));
        events
    }

    fn attempt_failed(
        &mut self,
        ctx: &AppContext,
        attempt_id: TaskAttemptId,
        diagnostics: String,
    ) -> Vec<Event> {
        self.record(attempt_id, AttemptOutcome::Failed);
        self.failed_attempts += 1;
        self.diagnostics.push(diagnostics);
        if !self.live_attempts().is_empty() {
            return vec![];
        }
        if self.failed_attempts < self.max_attempts {
            info!(
                "{} failed {} of {} allowed attempts, scheduling a new attempt",
                self.id, self.failed_attempts, self.max_attempts
            );
            self.add_attempt(ctx, true, false)
        } else {
            self.diagnostics.push(format!(
                "Task failed, taskId={}, failedAttempts={}",
                self.id, self.failed_attempts
            ));
            self.finish(ctx, TaskState::Failed)
        }
    }

    /// The output of the successful attempt is gone. Runs the task again unless the retry
    /// budget is spent.
    fn reexecute(&mut self, ctx: &AppContext, lost_attempt: TaskAttemptId) -> Vec<Event> {
        self.successful_attempt = None;
        self.commit_attempt = None;
        if self.failed_attempts >= self.max_attempts {
            warn!("{} lost its output and has no attempts left", self.id);
            return self.finish(ctx, TaskState::Failed);
        }
        info!("{} lost the output of {lost_attempt}, re-executing", self.id);
        self.state = TaskState::Running;
        self.finish_time = None;
        let mut events = vec![Event::Vertex(
            self.id.vertex_id,
            VertexEvent::TaskRescheduled {
                task_id: self.id,
                failed_attempt: lost_attempt,
            },
        )];
        events.extend(self.add_attempt(ctx, true, false));
        events
    }

    fn finish(&mut self, ctx: &AppContext, state: TaskState) -> Vec<Event> {
        self.state = state;
        self.finish_time = Some(ctx.now());
        info!("{} finished as {state}", self.id);
        let mut events = vec![];
        if state == TaskState::Succeeded && !self.success_counted {
            self.success_counted = true;
            events.push(Event::Dag(
                self.id.dag_id(),
                DagEvent::CounterUpdate {
                    updates: vec![(DagCounter::NumSucceededTasks, 1)],
                },
            ));
        }
        events.push(Event::Vertex(
            self.id.vertex_id,
            VertexEvent::TaskCompleted {
                task_id: self.id,
                state,
                diagnostics: self.diagnostics.clone(),
            },
        ));
        events
    }
}

fn kill_attempts(attempts: Vec<TaskAttemptId>, diagnostics: &str) -> Vec<Event> {
    attempts
        .into_iter()
        .map(|attempt_id| {
            Event::TaskAttempt(
                attempt_id,
                TaskAttemptEvent::KillRequest {
                    diagnostics: diagnostics.to_owned(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::TestHarness;
    use strata_core::error::Result;

    fn new_attempts(events: &[Event]) -> Vec<TaskAttemptId> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::TaskAttempt(id, TaskAttemptEvent::Schedule) => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn failed(attempt_id: TaskAttemptId) -> TaskEvent {
        TaskEvent::AttemptFailed {
            attempt_id,
            diagnostics: format!("{attempt_id} failed"),
        }
    }

    #[test]
    fn retries_until_budget_is_spent() -> Result<()> {
        let harness = TestHarness::with_config(
            crate::config::SchedulerConfig::default().with_max_task_attempts(2),
        );
        let task = harness.standalone_task();
        let mut task = task.write();
        let ctx = harness.ctx();

        let first = new_attempts(&task.handle(TaskEvent::Schedule, ctx));
        assert_eq!(first.len(), 1);
        task.handle(TaskEvent::AttemptLaunched { attempt_id: first[0] }, ctx);
        assert_eq!(task.state(), TaskState::Running);

        let second = new_attempts(&task.handle(failed(first[0]), ctx));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, 1);
        // the retry is the only live attempt
        assert_eq!(task.live_attempts(), second);
        assert_eq!(task.state(), TaskState::Running);

        let events = task.handle(failed(second[0]), ctx);
        assert!(new_attempts(&events).is_empty());
        assert_eq!(task.state(), TaskState::Failed);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Vertex(_, VertexEvent::TaskCompleted { state: TaskState::Failed, diagnostics, .. })
                if diagnostics.len() == 3
        )));
        Ok(())
    }

    #[test]
    fn killed_attempt_does_not_consume_budget() -> Result<()> {
        let harness = TestHarness::with_config(
            crate::config::SchedulerConfig::default().with_max_task_attempts(1),
        );
        let task = harness.standalone_task();
        let mut task = task.write();
        let ctx = harness.ctx();

        let first = new_attempts(&task.handle(TaskEvent::Schedule, ctx));
        let events = task.handle(
            TaskEvent::AttemptKilled {
                attempt_id: first[0],
                diagnostics: "preempted".to_owned(),
            },
            ctx,
        );
        assert_eq!(new_attempts(&events).len(), 1);
        assert_eq!(task.failed_attempt_count(), 0);
        Ok(())
    }

    #[test]
    fn speculative_success_kills_the_original() -> Result<()> {
        let harness = TestHarness::new();
        let task = harness.standalone_task();
        let mut task = task.write();
        let ctx = harness.ctx();

        let original = new_attempts(&task.handle(TaskEvent::Schedule, ctx))[0];
        task.handle(TaskEvent::AttemptLaunched { attempt_id: original }, ctx);
        let speculative = new_attempts(&task.handle(TaskEvent::AddSpeculativeAttempt, ctx))[0];
        // at most one duplicate
        assert!(new_attempts(&task.handle(TaskEvent::AddSpeculativeAttempt, ctx)).is_empty());

        assert!(task.can_commit(speculative));
        assert!(!task.can_commit(original));

        let events = task.handle(TaskEvent::AttemptSucceeded { attempt_id: speculative }, ctx);
        assert_eq!(task.state(), TaskState::Succeeded);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::TaskAttempt(id, TaskAttemptEvent::KillRequest { .. }) if *id == original
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Dag(_, DagEvent::CounterUpdate { updates })
                if updates == &vec![(DagCounter::NumSucceededTasks, 1)]
        )));

        // the original reporting KILLED later changes nothing
        task.handle(
            TaskEvent::AttemptKilled {
                attempt_id: original,
                diagnostics: String::new(),
            },
            ctx,
        );
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.successful_attempt(), Some(speculative));
        Ok(())
    }

    #[test]
    fn lost_output_reexecutes_task() -> Result<()> {
        let harness = TestHarness::new();
        let task = harness.standalone_task();
        let mut task = task.write();
        let ctx = harness.ctx();

        let first = new_attempts(&task.handle(TaskEvent::Schedule, ctx))[0];
        task.handle(TaskEvent::AttemptLaunched { attempt_id: first }, ctx);
        task.handle(TaskEvent::AttemptSucceeded { attempt_id: first }, ctx);

        let events = task.handle(failed(first), ctx);
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(new_attempts(&events).len(), 1);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Vertex(_, VertexEvent::TaskRescheduled { failed_attempt, .. })
                if *failed_attempt == first
        )));

        let second = TaskAttemptId::new(task.id(), 1);
        task.handle(TaskEvent::AttemptLaunched { attempt_id: second }, ctx);
        let events = task.handle(TaskEvent::AttemptSucceeded { attempt_id: second }, ctx);
        // success is counted once per task
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::Dag(_, DagEvent::CounterUpdate { .. }))));
        Ok(())
    }

    #[test]
    fn kill_waits_for_live_attempts() -> Result<()> {
        let harness = TestHarness::new();
        let task = harness.standalone_task();
        let mut task = task.write();
        let ctx = harness.ctx();

        let first = new_attempts(&task.handle(TaskEvent::Schedule, ctx))[0];
        let events = task.handle(
            TaskEvent::Kill {
                diagnostics: "vertex killed".to_owned(),
            },
            ctx,
        );
        assert_eq!(task.state(), TaskState::KillWait);
        assert_eq!(events.len(), 1);
        let events = task.handle(
            TaskEvent::AttemptKilled {
                attempt_id: first,
                diagnostics: String::new(),
            },
            ctx,
        );
        assert_eq!(task.state(), TaskState::Killed);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Vertex(_, VertexEvent::TaskCompleted { state: TaskState::Killed, .. })
        )));
        Ok(())
    }
}
