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


//! Liveness of running containers and attempts. Each registered entity must ping within
//! the timeout or it is reported as timed out.

use std::sync::Arc;

use dashmap::DashMap;
use log::{info, warn};

use strata_core::error::{Result, StrataError};
use strata_core::ids::{ContainerId, TaskAttemptId};

use crate::app_context::AppContext;
use crate::dispatcher::EventHandler;
use crate::event::{AMContainerEvent, Event, HeartbeatEvent, TaskAttemptEvent};

pub struct HeartbeatTracker {
    timeout_ms: u64,
    containers: DashMap<ContainerId, u64>,
    attempts: DashMap<TaskAttemptId, u64>,
}

impl HeartbeatTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            containers: DashMap::new(),
            attempts: DashMap::new(),
        }
    }

    pub fn register_container(&self, container_id: ContainerId, now: u64) {
        self.containers.insert(container_id, now);
    }

    pub fn unregister_container(&self, container_id: &ContainerId) {
        self.containers.remove(container_id);
    }

    pub fn register_attempt(&self, attempt_id: TaskAttemptId, now: u64) {
        self.attempts.insert(attempt_id, now);
    }

    pub fn unregister_attempt(&self, attempt_id: &TaskAttemptId) {
        self.attempts.remove(attempt_id);
    }

    /// Returns false for a container that is not tracked.
    pub fn ping_container(&self, container_id: &ContainerId, now: u64) -> bool {
        match self.containers.get_mut(container_id) {
            Some(mut last_seen) => {
                *last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Returns false for an attempt that is not tracked.
    pub fn ping_attempt(&self, attempt_id: &TaskAttemptId, now: u64) -> bool {
        match self.attempts.get_mut(attempt_id) {
            Some(mut last_seen) => {
                *last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn num_containers(&self) -> usize {
        self.containers.len()
    }

    pub fn num_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// Removes every entity not seen within the timeout and returns its TimedOut event.
    pub fn expired(&self, now: u64) -> Vec<Event> {
        let threshold = now.saturating_sub(self.timeout_ms);
        let mut events = vec![];

        let expired_containers: Vec<ContainerId> = self
            .containers
            .iter()
            .filter(|entry| *entry.value() < threshold)
            .map(|entry| *entry.key())
            .collect();
        for container_id in expired_containers {
            if self.containers.remove(&container_id).is_some() {
                warn!("Container {container_id} timed out after {}ms", self.timeout_ms);
                events.push(Event::Container(container_id, AMContainerEvent::TimedOut));
            }
        }

        let expired_attempts: Vec<TaskAttemptId> = self
            .attempts
            .iter()
            .filter(|entry| *entry.value() < threshold)
            .map(|entry| *entry.key())
            .collect();
        for attempt_id in expired_attempts {
            if self.attempts.remove(&attempt_id).is_some() {
                warn!("Task attempt {attempt_id} timed out after {}ms", self.timeout_ms);
                events.push(Event::TaskAttempt(attempt_id, TaskAttemptEvent::TimedOut));
            }
        }
        events
    }
}

/// Applies the register and unregister events entities emit.
pub struct HeartbeatHandler {
    ctx: Arc<AppContext>,
}

impl HeartbeatHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl EventHandler for HeartbeatHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Heartbeat(event) = event else {
            return Err(StrataError::Internal(format!(
                "Heartbeat handler received {event:?}"
            )));
        };
        let tracker = self.ctx.heartbeats();
        let now = self.ctx.now();
        match event {
            HeartbeatEvent::RegisterContainer(id) => tracker.register_container(id, now),
            HeartbeatEvent::UnregisterContainer(id) => tracker.unregister_container(&id),
            HeartbeatEvent::RegisterAttempt(id) => tracker.register_attempt(id, now),
            HeartbeatEvent::UnregisterAttempt(id) => tracker.unregister_attempt(&id),
        }
        Ok(vec![])
    }
}

/// Checks for expired entities every `interval_ms` until the sender is closed.
pub async fn run_heartbeat_checker(
    ctx: Arc<AppContext>,
    sender: strata_core::event_loop::EventSender<Event>,
    interval_ms: u64,
) {
    info!("Starting heartbeat checker with interval {interval_ms}ms");
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        let events = ctx.heartbeats().expired(ctx.now());
        if let Err(e) = sender.post_events(events).await {
            info!("Heartbeat checker stopped: {e}");
            break;
        }
    }
}
