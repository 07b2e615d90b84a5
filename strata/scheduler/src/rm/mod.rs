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


//! Resource management: container requests, cluster offers, container and node lifecycles.

use std::sync::Arc;

use strata_core::ids::{ContainerId, NodeId, TaskAttemptId};
use strata_core::resource::{Priority, Resource};

use crate::dag::task_spec::TaskSpec;

pub mod container;
pub mod node_map;
pub mod rack_resolver;
pub mod scheduler_event_handler;
pub mod task_scheduler;

/// A container granted by the cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub id: ContainerId,
    pub node_id: NodeId,
    pub resource: Resource,
    pub priority: Priority,
}

/// Exit status of a container that was granted and has completed.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerStatus {
    pub container_id: ContainerId,
    pub exit_status: i32,
    pub diagnostics: String,
}

/// Exit status reported for containers stopped on request.
pub const EXIT_STATUS_ABORTED: i32 = -100;
/// Exit status reported for containers lost with their node.
pub const EXIT_STATUS_NODE_LOST: i32 = -101;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Running,
    Unhealthy,
    Lost,
}

impl NodeState {
    pub fn is_usable(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

/// A node health change reported by the cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub rack: String,
    pub state: NodeState,
}

/// A resource ask forwarded to the cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRequest {
    pub attempt_id: TaskAttemptId,
    pub capability: Resource,
    pub hosts: Vec<String>,
    pub racks: Vec<String>,
    pub priority: Priority,
}

/// A request from an attempt to be placed in a container. Flows through the DAG, which
/// assigns the priority, to the task scheduler.
#[derive(Clone, Debug)]
pub struct AllocationRequest {
    pub attempt_id: TaskAttemptId,
    pub capability: Resource,
    pub hosts: Vec<String>,
    pub racks: Vec<String>,
    pub priority: Priority,
    pub spec: Arc<TaskSpec>,
    /// The attempt replaces a failed or killed attempt of the same task.
    pub rescheduled: bool,
}

/// The cluster resource manager as seen by the task scheduler.
///
/// Calls are made from inside event handling and must not block. Results such as granted
/// or completed containers come back later as scheduler events.
pub trait ClusterClient: Send + Sync {
    fn add_container_request(&self, request: ResourceRequest);
    fn remove_container_request(&self, attempt_id: &TaskAttemptId);
    fn release_assigned_container(&self, container_id: ContainerId);
    fn available_resources(&self) -> Resource;
    fn cluster_node_count(&self) -> usize;
}
