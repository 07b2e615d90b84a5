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


//! Runtime estimates the speculator bases its decisions on.

use std::collections::{HashMap, HashSet};

use strata_core::ids::{TaskAttemptId, TaskId, VertexId};

use crate::dag::task_attempt::TaskAttemptState;

/// At least this many tasks of a vertex must have succeeded before any of its tasks is
/// judged slow.
const MINIMUM_COMPLETE_NUMBER_TO_SPECULATE: usize = 1;
/// Same as above, as a share of the vertex's tasks.
const MINIMUM_COMPLETE_PROPORTION_TO_SPECULATE: f64 = 0.05;

pub trait TaskRuntimeEstimator: Send + Sync {
    fn enroll_attempt(&mut self, attempt_id: TaskAttemptId, timestamp: u64);

    fn update_attempt(
        &mut self,
        attempt_id: TaskAttemptId,
        progress: f32,
        state: TaskAttemptState,
        timestamp: u64,
    );

    /// When the attempt started, if it is known.
    fn attempt_enrollment_time(&self, attempt_id: &TaskAttemptId) -> Option<u64>;

    /// Expected total runtime of a running attempt.
    fn estimated_runtime(&self, attempt_id: &TaskAttemptId) -> Option<u64>;

    /// Expected runtime of a fresh attempt of a task of `vertex_id`.
    fn estimated_new_attempt_runtime(&self, vertex_id: &VertexId) -> Option<u64>;

    /// The runtime past which an attempt of `task_id` counts as slow. `None` when there is
    /// not enough history to judge.
    fn threshold_runtime(&self, task_id: &TaskId, total_tasks: u32) -> Option<u64>;

    /// Drops the history of `vertex_id` and of its attempts.
    fn forget_vertex(&mut self, vertex_id: &VertexId);
}

#[derive(Debug, Default)]
struct AttemptProgress {
    start: u64,
    progress: f32,
    updated_at: u64,
}

#[derive(Debug, Default)]
struct VertexRuntimes {
    succeeded_tasks: HashSet<TaskId>,
    total_runtime: u64,
}

impl VertexRuntimes {
    fn mean(&self) -> Option<u64> {
        if self.succeeded_tasks.is_empty() {
            None
        } else {
            Some(self.total_runtime / self.succeeded_tasks.len() as u64)
        }
    }
}

/// Extrapolates each attempt's runtime linearly from its progress, and compares it with the
/// mean runtime of the vertex's successful tasks.
pub struct ProgressRateEstimator {
    slow_task_threshold: f64,
    attempts: HashMap<TaskAttemptId, AttemptProgress>,
    vertices: HashMap<VertexId, VertexRuntimes>,
}

impl ProgressRateEstimator {
    pub fn new(slow_task_threshold: f64) -> Self {
        Self {
            slow_task_threshold,
            attempts: HashMap::new(),
            vertices: HashMap::new(),
        }
    }

    pub fn completed_tasks(&self, vertex_id: &VertexId) -> usize {
        self.vertices
            .get(vertex_id)
            .map(|v| v.succeeded_tasks.len())
            .unwrap_or_default()
    }

    pub fn tracked_attempts(&self) -> usize {
        self.attempts.len()
    }
}

impl TaskRuntimeEstimator for ProgressRateEstimator {
    fn enroll_attempt(&mut self, attempt_id: TaskAttemptId, timestamp: u64) {
        self.attempts.entry(attempt_id).or_insert(AttemptProgress {
            start: timestamp,
            progress: 0.0,
            updated_at: timestamp,
        });
    }

    fn update_attempt(
        &mut self,
        attempt_id: TaskAttemptId,
        progress: f32,
        state: TaskAttemptState,
        timestamp: u64,
    ) {
        if state.is_terminal() {
            let Some(attempt) = self.attempts.remove(&attempt_id) else {
                return;
            };
            if state == TaskAttemptState::Succeeded {
                let runtime = timestamp.saturating_sub(attempt.start);
                let vertex = self.vertices.entry(attempt_id.vertex_id()).or_default();
                if vertex.succeeded_tasks.insert(attempt_id.task_id) {
                    vertex.total_runtime += runtime;
                }
            }
            return;
        }
        if let Some(attempt) = self.attempts.get_mut(&attempt_id) {
            attempt.progress = progress;
            attempt.updated_at = timestamp;
        }
    }

    fn attempt_enrollment_time(&self, attempt_id: &TaskAttemptId) -> Option<u64> {
        self.attempts.get(attempt_id).map(|a| a.start)
    }

    fn estimated_runtime(&self, attempt_id: &TaskAttemptId) -> Option<u64> {
        let attempt = self.attempts.get(attempt_id)?;
        if attempt.progress <= 0.0 {
            return None;
        }
        let elapsed = attempt.updated_at.saturating_sub(attempt.start) as f64;
        Some((elapsed / attempt.progress as f64) as u64)
    }

    fn estimated_new_attempt_runtime(&self, vertex_id: &VertexId) -> Option<u64> {
        self.vertices.get(vertex_id)?.mean()
    }

    fn threshold_runtime(&self, task_id: &TaskId, total_tasks: u32) -> Option<u64> {
        let vertex = self.vertices.get(&task_id.vertex_id)?;
        let completed = vertex.succeeded_tasks.len();
        if completed < MINIMUM_COMPLETE_NUMBER_TO_SPECULATE
            || (completed as f64) < MINIMUM_COMPLETE_PROPORTION_TO_SPECULATE * total_tasks as f64
        {
            return None;
        }
        let mean = vertex.mean()? as f64;
        Some((mean * (1.0 + self.slow_task_threshold)) as u64)
    }

    fn forget_vertex(&mut self, vertex_id: &VertexId) {
        self.vertices.remove(vertex_id);
        self.attempts.retain(|id, _| id.vertex_id() != *vertex_id);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::attempt_id;

    #[test]
    fn estimates_from_progress_and_history() {
        let mut estimator = ProgressRateEstimator::new(0.25);
        let done = attempt_id(0, 0);
        let slow = attempt_id(1, 0);
        estimator.enroll_attempt(done, 0);
        estimator.enroll_attempt(slow, 0);
        assert_eq!(estimator.threshold_runtime(&slow.task_id, 4), None);

        estimator.update_attempt(done, 1.0, TaskAttemptState::Succeeded, 1000);
        estimator.update_attempt(slow, 0.25, TaskAttemptState::Running, 1000);
        assert_eq!(estimator.estimated_runtime(&slow), Some(4000));
        assert_eq!(estimator.estimated_new_attempt_runtime(&slow.vertex_id()), Some(1000));
        assert_eq!(estimator.threshold_runtime(&slow.task_id, 4), Some(1250));
        // too little history for a large vertex
        assert_eq!(estimator.threshold_runtime(&slow.task_id, 100), None);
        // finished attempts are not tracked any more, their runtime is
        assert_eq!(estimator.tracked_attempts(), 1);
        assert_eq!(estimator.attempt_enrollment_time(&done), None);
    }

    #[test]
    fn forgets_finished_vertices() {
        let mut estimator = ProgressRateEstimator::new(0.25);
        let done = attempt_id(0, 0);
        let running = attempt_id(1, 0);
        estimator.enroll_attempt(done, 0);
        estimator.enroll_attempt(running, 0);
        estimator.update_attempt(done, 1.0, TaskAttemptState::Succeeded, 1000);
        estimator.update_attempt(running, 0.5, TaskAttemptState::Running, 1000);

        estimator.forget_vertex(&running.vertex_id());
        assert_eq!(estimator.tracked_attempts(), 0);
        assert_eq!(estimator.completed_tasks(&running.vertex_id()), 0);
        assert_eq!(estimator.estimated_new_attempt_runtime(&running.vertex_id()), None);
    }
}
