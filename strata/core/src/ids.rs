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

//! Identifiers are hierarchical: an attempt ID embeds its task ID, which embeds its vertex ID,
//! which embeds its DAG ID. Display forms are stable and used in logs and diagnostics.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identity of one submitted DAG, scoped to the submitting application.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DagId {
    /// Application the DAG was submitted to.
    pub app_id: u64,
    /// Monotonic DAG number within the application.
    pub id: u32,
}

impl DagId {
    /// Creates a DAG ID.
    pub fn new(app_id: u64, id: u32) -> Self {
        Self { app_id, id }
    }
}

impl Display for DagId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "dag_{}_{}", self.app_id, self.id)
    }
}

/// Identity of a vertex, scoped to its DAG.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VertexId {
    /// Owning DAG.
    pub dag_id: DagId,
    /// Position of the vertex in the plan.
    pub id: u32,
}

impl VertexId {
    /// Creates a vertex ID.
    pub fn new(dag_id: DagId, id: u32) -> Self {
        Self { dag_id, id }
    }
}

impl Display for VertexId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vertex_{}_{}_{:02}",
            self.dag_id.app_id, self.dag_id.id, self.id
        )
    }
}

/// Identity of a task, scoped to its vertex. `id` is the task index within the vertex.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskId {
    /// Owning vertex.
    pub vertex_id: VertexId,
    /// Task index within the vertex.
    pub id: u32,
}

impl TaskId {
    /// Creates a task ID.
    pub fn new(vertex_id: VertexId, id: u32) -> Self {
        Self { vertex_id, id }
    }

    /// The DAG this task belongs to.
    pub fn dag_id(&self) -> DagId {
        self.vertex_id.dag_id
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = &self.vertex_id;
        write!(
            f,
            "task_{}_{}_{:02}_{:06}",
            v.dag_id.app_id, v.dag_id.id, v.id, self.id
        )
    }
}

/// Identity of one execution of a task. `id` is the attempt number.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskAttemptId {
    /// Owning task.
    pub task_id: TaskId,
    /// Attempt number, starting at 0.
    pub id: u32,
}

impl TaskAttemptId {
    /// Creates an attempt ID.
    pub fn new(task_id: TaskId, id: u32) -> Self {
        Self { task_id, id }
    }

    /// The vertex this attempt belongs to.
    pub fn vertex_id(&self) -> VertexId {
        self.task_id.vertex_id
    }

    /// The DAG this attempt belongs to.
    pub fn dag_id(&self) -> DagId {
        self.task_id.vertex_id.dag_id
    }
}

impl Display for TaskAttemptId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let t = &self.task_id;
        let v = &t.vertex_id;
        write!(
            f,
            "attempt_{}_{}_{:02}_{:06}_{}",
            v.dag_id.app_id, v.dag_id.id, v.id, t.id, self.id
        )
    }
}

/// Identity of a cluster container.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ContainerId(pub u64);

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "container_{:06}", self.0)
    }
}

/// Identity of a cluster node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// Host name of the node.
    pub host: String,
    /// Port of the node manager.
    pub port: u16,
}

impl NodeId {
    /// Creates a node ID.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        let dag_id = DagId::new(1700000000000, 1);
        let vertex_id = VertexId::new(dag_id, 2);
        let task_id = TaskId::new(vertex_id, 7);
        let attempt_id = TaskAttemptId::new(task_id, 1);

        assert_eq!(dag_id.to_string(), "dag_1700000000000_1");
        assert_eq!(vertex_id.to_string(), "vertex_1700000000000_1_02");
        assert_eq!(task_id.to_string(), "task_1700000000000_1_02_000007");
        assert_eq!(attempt_id.to_string(), "attempt_1700000000000_1_02_000007_1");
        assert_eq!(ContainerId(12).to_string(), "container_000012");
        assert_eq!(NodeId::new("host-1", 8042).to_string(), "host-1:8042");
        assert_eq!(attempt_id.dag_id(), dag_id);
    }
}
