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


//! Dispatcher handlers for the DAG, vertex, task and task attempt categories. Each one locks
//! the addressed entity for the duration of a single transition.

use std::sync::Arc;

use strata_core::error::{Result, StrataError};

use crate::app_context::AppContext;
use crate::dispatcher::EventHandler;
use crate::event::Event;

fn misrouted(handler: &str, event: &Event) -> StrataError {
    StrataError::Internal(format!("{handler} received {event:?}"))
}

pub struct DagEventHandler {
    ctx: Arc<AppContext>,
}

impl DagEventHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl EventHandler for DagEventHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Dag(dag_id, event) = event else {
            return Err(misrouted("DagEventHandler", &event));
        };
        let dag = self.ctx.dag(dag_id)?;
        let mut dag = dag.write();
        Ok(dag.handle(event, &self.ctx))
    }
}

pub struct VertexEventHandler {
    ctx: Arc<AppContext>,
}

impl VertexEventHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl EventHandler for VertexEventHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Vertex(vertex_id, event) = event else {
            return Err(misrouted("VertexEventHandler", &event));
        };
        let vertex = self.ctx.vertex(vertex_id)?;
        let mut vertex = vertex.write();
        Ok(vertex.handle(event, &self.ctx))
    }
}

pub struct TaskEventHandler {
    ctx: Arc<AppContext>,
}

impl TaskEventHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl EventHandler for TaskEventHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Task(task_id, event) = event else {
            return Err(misrouted("TaskEventHandler", &event));
        };
        let task = self.ctx.task(task_id)?;
        let mut task = task.write();
        Ok(task.handle(event, &self.ctx))
    }
}

pub struct TaskAttemptEventHandler {
    ctx: Arc<AppContext>,
}

impl TaskAttemptEventHandler {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

impl EventHandler for TaskAttemptEventHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::TaskAttempt(attempt_id, event) = event else {
            return Err(misrouted("TaskAttemptEventHandler", &event));
        };
        let attempt = self.ctx.attempt(attempt_id)?;
        let mut attempt = attempt.write();
        Ok(attempt.handle(event, &self.ctx))
    }
}
