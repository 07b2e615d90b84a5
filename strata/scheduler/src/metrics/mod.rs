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


use std::sync::Arc;

use strata_core::ids::{DagId, TaskAttemptId};

use crate::dag::DagState;

pub trait SchedulerMetricsCollector: Send + Sync {
    fn record_dag_submitted(&self, dag_id: DagId, submitted_at: u64);
    fn record_dag_finished(
        &self,
        dag_id: DagId,
        state: DagState,
        submitted_at: u64,
        finished_at: u64,
    );
    fn record_attempt_launched(&self, attempt_id: TaskAttemptId);
    fn record_speculative_attempt(&self, attempt_id: TaskAttemptId);
    fn set_pending_container_requests(&self, value: u64);
}

#[derive(Default)]
pub struct NoopMetricsCollector {}

impl SchedulerMetricsCollector for NoopMetricsCollector {
    fn record_dag_submitted(&self, _dag_id: DagId, _submitted_at: u64) {}
    fn record_dag_finished(
        &self,
        _dag_id: DagId,
        _state: DagState,
        _submitted_at: u64,
        _finished_at: u64,
    ) {
    }
    fn record_attempt_launched(&self, _attempt_id: TaskAttemptId) {}
    fn record_speculative_attempt(&self, _attempt_id: TaskAttemptId) {}
    fn set_pending_container_requests(&self, _value: u64) {}
}

pub fn default_metrics_collector() -> Arc<dyn SchedulerMetricsCollector> {
    Arc::new(NoopMetricsCollector::default())
}
