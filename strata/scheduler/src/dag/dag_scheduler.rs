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


//! Priority policy for task attempts of a running DAG.

use std::collections::HashMap;

use log::debug;

use strata_core::ids::{TaskAttemptId, VertexId};
use strata_core::resource::Priority;

use crate::dag::vertex::VertexState;
use crate::rm::AllocationRequest;

pub trait DagScheduler: Send + Sync {
    /// Assigns the priority an attempt is requested with.
    fn schedule_attempt(&mut self, request: AllocationRequest) -> AllocationRequest;

    fn attempt_succeeded(&mut self, _attempt_id: TaskAttemptId) {}

    fn vertex_completed(&mut self, _vertex_id: VertexId, _state: VertexState) {}
}

/// Orders attempts by the distance of their vertex from the roots of the DAG, so upstream
/// work is always preferred. Rescheduled attempts go ahead of fresh attempts of the same
/// vertex.
pub struct NaturalOrderScheduler {
    distances: HashMap<VertexId, u32>,
}

impl NaturalOrderScheduler {
    pub fn new(distances: HashMap<VertexId, u32>) -> Self {
        Self { distances }
    }

    pub fn priority_for(&self, vertex_id: VertexId, rescheduled: bool) -> Priority {
        let distance = self.distances.get(&vertex_id).copied().unwrap_or_default();
        let base = (distance + 1) * 3;
        Priority(if rescheduled { base - 1 } else { base })
    }
}

impl DagScheduler for NaturalOrderScheduler {
    fn schedule_attempt(&mut self, mut request: AllocationRequest) -> AllocationRequest {
        request.priority = self.priority_for(request.attempt_id.vertex_id(), request.rescheduled);
        debug!(
            "Scheduling {} with priority {}",
            request.attempt_id, request.priority
        );
        request
    }
}
