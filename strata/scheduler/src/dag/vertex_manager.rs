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


//! Slow start: how many tasks of a consumer vertex may run given how many of its source
//! tasks have completed.

use std::collections::HashSet;
use std::ops::Range;

use strata_core::ids::TaskId;

pub struct SlowStartManager {
    min_src_fraction: f32,
    max_src_fraction: f32,
    num_tasks: u32,
    total_source_tasks: u32,
    completed_source_tasks: HashSet<TaskId>,
    scheduled: u32,
}

impl SlowStartManager {
    pub fn new(min_src_fraction: f32, max_src_fraction: f32, num_tasks: u32) -> Self {
        Self {
            min_src_fraction,
            max_src_fraction,
            num_tasks,
            total_source_tasks: 0,
            completed_source_tasks: HashSet::new(),
            scheduled: 0,
        }
    }

    pub fn set_total_source_tasks(&mut self, total: u32) {
        self.total_source_tasks = total;
    }

    /// Records a completed source task. Repeated completions of one task count once.
    pub fn on_source_task_completed(&mut self, task_id: TaskId) -> bool {
        self.completed_source_tasks.insert(task_id)
    }

    pub fn completed_source_tasks(&self) -> u32 {
        self.completed_source_tasks.len() as u32
    }

    pub fn scheduled(&self) -> u32 {
        self.scheduled
    }

    /// Number of tasks that may be running at the current source completion fraction.
    pub fn target(&self) -> u32 {
        if self.total_source_tasks == 0 {
            return self.num_tasks;
        }
        let completed = self.completed_source_tasks().min(self.total_source_tasks);
        let fraction = completed as f32 / self.total_source_tasks as f32;
        if fraction >= self.max_src_fraction {
            self.num_tasks
        } else if fraction < self.min_src_fraction {
            0
        } else {
            let scale = (fraction - self.min_src_fraction)
                / (self.max_src_fraction - self.min_src_fraction);
            ((self.num_tasks as f32 * scale) as u32).clamp(1, self.num_tasks)
        }
    }

    /// Task indices that become schedulable now. Each index is returned once.
    pub fn take_schedulable(&mut self) -> Range<u32> {
        let target = self.target().max(self.scheduled);
        let range = self.scheduled..target;
        self.scheduled = target;
        range
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strata_core::ids::{DagId, VertexId};

    fn source_task(id: u32) -> TaskId {
        TaskId::new(VertexId::new(DagId::new(1, 1), 0), id)
    }

    #[test]
    fn consumers_start_between_thresholds() {
        let mut manager = SlowStartManager::new(0.25, 0.75, 8);
        manager.set_total_source_tasks(4);
        assert_eq!(manager.take_schedulable(), 0..0);

        // 1 of 4 reaches the lower threshold
        manager.on_source_task_completed(source_task(0));
        assert_eq!(manager.take_schedulable(), 0..1);

        // duplicates do not advance the fraction
        assert!(!manager.on_source_task_completed(source_task(0)));
        assert_eq!(manager.take_schedulable(), 1..1);

        manager.on_source_task_completed(source_task(1));
        assert_eq!(manager.take_schedulable(), 1..4);

        // 3 of 4 reaches the upper threshold
        manager.on_source_task_completed(source_task(2));
        assert_eq!(manager.take_schedulable(), 4..8);
        manager.on_source_task_completed(source_task(3));
        assert_eq!(manager.take_schedulable(), 8..8);
    }

    #[test]
    fn no_sources_means_no_gating() {
        let mut manager = SlowStartManager::new(0.25, 0.75, 3);
        assert_eq!(manager.take_schedulable(), 0..3);
    }

    #[test]
    fn equal_thresholds_release_everything_at_once() {
        let mut manager = SlowStartManager::new(0.5, 0.5, 4);
        manager.set_total_source_tasks(2);
        assert_eq!(manager.take_schedulable(), 0..0);
        manager.on_source_task_completed(source_task(0));
        assert_eq!(manager.take_schedulable(), 0..4);
    }
}
