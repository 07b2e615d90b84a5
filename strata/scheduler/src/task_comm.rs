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


//! The surface running tasks talk to: containers pull work, attempts heartbeat their status
//! and runtime events, and report their outcome.

use std::sync::Arc;

use log::{debug, trace, warn};

use strata_core::error::Result;
use strata_core::event_loop::EventSender;
use strata_core::ids::{ContainerId, TaskAttemptId};

use crate::app_context::AppContext;
use crate::dag::runtime_event::RuntimeEvent;
use crate::dag::task_attempt::TaskAttemptState;
use crate::event::{Event, TaskAttemptEvent, TaskAttemptStatusUpdate, VertexEvent};
use crate::rm::container::am_container::PullResponse;

/// Upper bound of input events returned by one heartbeat.
pub const DEFAULT_MAX_EVENTS_PER_HEARTBEAT: usize = 500;

#[derive(Clone, Debug)]
pub struct HeartbeatRequest {
    pub attempt_id: TaskAttemptId,
    pub status: Option<TaskAttemptStatusUpdate>,
    /// Runtime events produced since the last heartbeat.
    pub events: Vec<RuntimeEvent>,
    /// Index of the first input event the attempt has not seen yet.
    pub from_event_index: usize,
    pub max_events: usize,
}

impl HeartbeatRequest {
    pub fn new(attempt_id: TaskAttemptId, from_event_index: usize) -> Self {
        Self {
            attempt_id,
            status: None,
            events: vec![],
            from_event_index,
            max_events: DEFAULT_MAX_EVENTS_PER_HEARTBEAT,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HeartbeatResponse {
    pub events: Vec<RuntimeEvent>,
    /// The attempt has been failed or killed and must stop.
    pub should_die: bool,
}

pub struct TaskCommunicator {
    ctx: Arc<AppContext>,
    sender: EventSender<Event>,
}

impl TaskCommunicator {
    pub fn new(ctx: Arc<AppContext>, sender: EventSender<Event>) -> Self {
        Self { ctx, sender }
    }

    /// Hands the next attempt to `container_id`, or tells it to wait or exit.
    pub async fn get_task(&self, container_id: ContainerId) -> Result<PullResponse> {
        if !self.ctx.has_container(container_id) {
            warn!("Container {container_id} is unknown, asking it to exit");
            return Ok(PullResponse::Die);
        }
        self.ctx.heartbeats().ping_container(&container_id, self.ctx.now());
        let (response, events) = self.ctx.pull_task(container_id)?;
        trace!("Container {container_id} pulled {response:?}");
        self.sender.post_events(events).await?;
        Ok(response)
    }

    pub async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse> {
        let attempt_id = request.attempt_id;
        let state = self.ctx.attempt_state(attempt_id)?;
        let stopping = matches!(
            state,
            TaskAttemptState::FailInProgress | TaskAttemptState::KillInProgress
        );
        if state.is_terminal() || stopping {
            debug!("Heartbeat from {attempt_id} in state {state}, asking it to stop");
            return Ok(HeartbeatResponse {
                events: vec![],
                should_die: true,
            });
        }
        self.ctx.heartbeats().ping_attempt(&attempt_id, self.ctx.now());

        if let Some(status) = request.status {
            self.sender
                .post_event(Event::TaskAttempt(
                    attempt_id,
                    TaskAttemptEvent::StatusUpdate(status),
                ))
                .await?;
        }
        if !request.events.is_empty() {
            self.sender
                .post_event(Event::Vertex(
                    attempt_id.vertex_id(),
                    VertexEvent::RouteEvents {
                        events: request.events,
                    },
                ))
                .await?;
        }
        let events = self.ctx.task_input_events(
            attempt_id.task_id,
            request.from_event_index,
            request.max_events,
        )?;
        Ok(HeartbeatResponse {
            events,
            should_die: false,
        })
    }

    pub fn can_commit(&self, attempt_id: TaskAttemptId) -> Result<bool> {
        self.ctx.can_commit(attempt_id)
    }

    pub async fn output_consumable(&self, attempt_id: TaskAttemptId) -> Result<()> {
        self.post(attempt_id, TaskAttemptEvent::OutputConsumable).await
    }

    pub async fn commit_pending(&self, attempt_id: TaskAttemptId) -> Result<()> {
        self.post(attempt_id, TaskAttemptEvent::CommitPending).await
    }

    pub async fn done(&self, attempt_id: TaskAttemptId) -> Result<()> {
        self.post(attempt_id, TaskAttemptEvent::Done).await
    }

    /// The attempt hit an error it cannot recover from. Only that attempt fails.
    pub async fn fatal_error(&self, attempt_id: TaskAttemptId, diagnostics: String) -> Result<()> {
        warn!("Task attempt {attempt_id} reported a fatal error: {diagnostics}");
        self.post(attempt_id, TaskAttemptEvent::Failed { diagnostics })
            .await
    }

    async fn post(&self, attempt_id: TaskAttemptId, event: TaskAttemptEvent) -> Result<()> {
        self.sender
            .post_event(Event::TaskAttempt(attempt_id, event))
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::plan::TaskLocationHint;
    use crate::test_utils::TestHarness;
    use strata_core::ids::NodeId;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn unknown_container_is_told_to_exit() -> Result<()> {
        let harness = TestHarness::new();
        let (tx, _rx) = mpsc::channel(16);
        let comm = TaskCommunicator::new(harness.ctx_arc(), EventSender::new(tx));
        assert!(matches!(
            comm.get_task(ContainerId(42)).await?,
            PullResponse::Die
        ));
        Ok(())
    }

    #[tokio::test]
    async fn heartbeat_forwards_status_and_events() -> Result<()> {
        let harness = TestHarness::new();
        let attempt = harness.standalone_attempt(TaskLocationHint::default());
        let attempt_id = {
            let mut attempt = attempt.write();
            attempt.handle(TaskAttemptEvent::Schedule, harness.ctx());
            attempt.handle(
                TaskAttemptEvent::StartedRemotely {
                    container_id: ContainerId(1),
                    node_id: NodeId::new("host-1", 8042),
                },
                harness.ctx(),
            );
            attempt.id()
        };
        let (tx, mut rx) = mpsc::channel(16);
        let comm = TaskCommunicator::new(harness.ctx_arc(), EventSender::new(tx));

        let mut request = HeartbeatRequest::new(attempt_id, 0);
        request.status = Some(TaskAttemptStatusUpdate {
            progress: 0.5,
            ..Default::default()
        });
        let response = comm.heartbeat(request).await?;
        assert!(!response.should_die);
        assert!(response.events.is_empty());
        assert!(matches!(
            rx.recv().await,
            Some(Event::TaskAttempt(id, TaskAttemptEvent::StatusUpdate(status)))
                if id == attempt_id && status.progress == 0.5
        ));

        comm.fatal_error(attempt_id, "disk corrupted".to_owned()).await?;
        assert!(matches!(
            rx.recv().await,
            Some(Event::TaskAttempt(_, TaskAttemptEvent::Failed { diagnostics }))
                if diagnostics == "disk corrupted"
        ));

        attempt.write().handle(
            TaskAttemptEvent::KillRequest {
                diagnostics: "killed".to_owned(),
            },
            harness.ctx(),
        );
        assert_eq!(
            harness.ctx().attempt_state(attempt_id)?,
            TaskAttemptState::KillInProgress
        );
        assert!(comm.heartbeat(HeartbeatRequest::new(attempt_id, 0)).await?.should_die);
        Ok(())
    }
}
