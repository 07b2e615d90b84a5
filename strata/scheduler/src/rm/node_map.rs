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


//! Per-node bookkeeping: which containers run where, how many attempts failed on each node,
//! and whether a node may still receive containers.

use std::collections::{HashMap, HashSet};

use log::{info, warn};
use parking_lot::Mutex;

use strata_core::error::{Result, StrataError};
use strata_core::ids::{ContainerId, NodeId, TaskAttemptId};

use crate::config::SchedulerConfig;
use crate::dispatcher::EventHandler;
use crate::event::{AMContainerEvent, AMNodeEvent, Event};

/// Decides whether offers on a node may be used.
pub trait NodeFilter: Send + Sync {
    fn is_usable(&self, node_id: &NodeId) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AMNodeState {
    Active,
    Unhealthy,
    Blacklisted,
}

#[derive(Debug)]
struct AMNode {
    state: AMNodeState,
    containers: HashSet<ContainerId>,
    failed_attempts: HashSet<TaskAttemptId>,
}

impl AMNode {
    fn new() -> Self {
        Self {
            state: AMNodeState::Active,
            containers: HashSet::new(),
            failed_attempts: HashSet::new(),
        }
    }
}

#[derive(Debug, Default)]
struct NodeMapState {
    nodes: HashMap<NodeId, AMNode>,
    cluster_node_count: usize,
}

impl NodeMapState {
    fn blacklisted_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.state == AMNodeState::Blacklisted)
            .count()
    }

    fn cluster_size(&self) -> usize {
        self.cluster_node_count.max(self.nodes.len())
    }
}

pub struct AMNodeMap {
    max_task_failures_per_node: u32,
    blacklisting_enabled: bool,
    blacklist_disable_percent: i32,
    state: Mutex<NodeMapState>,
}

impl AMNodeMap {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            max_task_failures_per_node: config.max_task_failures_per_node,
            blacklisting_enabled: config.node_blacklisting_enabled,
            blacklist_disable_percent: config.blacklist_disable_percent,
            state: Mutex::new(NodeMapState::default()),
        }
    }

    pub fn set_cluster_node_count(&self, count: usize) {
        self.state.lock().cluster_node_count = count;
    }

    pub fn node_state(&self, node_id: &NodeId) -> Option<AMNodeState> {
        self.state.lock().nodes.get(node_id).map(|n| n.state)
    }

    pub fn containers_on(&self, node_id: &NodeId) -> Vec<ContainerId> {
        self.state
            .lock()
            .nodes
            .get(node_id)
            .map(|n| n.containers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether blacklisting is currently suspended because too much of the cluster is
    /// blacklisted.
    pub fn is_blacklisting_ignored(&self) -> bool {
        let state = self.state.lock();
        self.ignore_blacklisting(&state)
    }

    fn ignore_blacklisting(&self, state: &NodeMapState) -> bool {
        if self.blacklist_disable_percent < 0 {
            return false;
        }
        let cluster_size = state.cluster_size();
        if cluster_size == 0 {
            return false;
        }
        state.blacklisted_count() * 100 >= self.blacklist_disable_percent as usize * cluster_size
    }

    pub fn handle(&self, node_id: NodeId, event: AMNodeEvent) -> Vec<Event> {
        let mut state = self.state.lock();
        match event {
            AMNodeEvent::ContainerAllocated { container_id } => {
                state
                    .nodes
                    .entry(node_id)
                    .or_insert_with(AMNode::new)
                    .containers
                    .insert(container_id);
                vec![]
            }
            AMNodeEvent::TaskAttemptEnded { attempt_id, failed } => {
                let node = state.nodes.entry(node_id.clone()).or_insert_with(AMNode::new);
                if !failed {
                    return vec![];
                }
                node.failed_attempts.insert(attempt_id);
                if self.blacklisting_enabled
                    && node.state == AMNodeState::Active
                    && node.failed_attempts.len() as u32 >= self.max_task_failures_per_node
                {
                    node.state = AMNodeState::Blacklisted;
                    warn!(
                        "Node {node_id} blacklisted after {} failed attempts",
                        node.failed_attempts.len()
                    );
                    if self.ignore_blacklisting(&state) {
                        info!(
                            "{} of {} nodes are blacklisted, ignoring blacklisting",
                            state.blacklisted_count(),
                            state.cluster_size()
                        );
                    }
                }
                vec![]
            }
            AMNodeEvent::HealthUpdate { healthy: false } => {
                let node = state.nodes.entry(node_id.clone()).or_insert_with(AMNode::new);
                if node.state == AMNodeState::Unhealthy {
                    return vec![];
                }
                node.state = AMNodeState::Unhealthy;
                info!(
                    "Node {node_id} became unhealthy, failing its {} containers",
                    node.containers.len()
                );
                node.containers
                    .iter()
                    .map(|container_id| {
                        Event::Container(
                            *container_id,
                            AMContainerEvent::NodeFailed {
                                diagnostics: format!("Node {node_id} failed"),
                            },
                        )
                    })
                    .collect()
            }
            AMNodeEvent::HealthUpdate { healthy: true } => {
                let node = state.nodes.entry(node_id.clone()).or_insert_with(AMNode::new);
                if node.state == AMNodeState::Unhealthy {
                    info!("Node {node_id} is healthy again");
                    node.state = AMNodeState::Active;
                }
                vec![]
            }
        }
    }
}

impl NodeFilter for AMNodeMap {
    fn is_usable(&self, node_id: &NodeId) -> bool {
        let state = self.state.lock();
        match state.nodes.get(node_id).map(|n| n.state) {
            None | Some(AMNodeState::Active) => true,
            Some(AMNodeState::Unhealthy) => false,
            Some(AMNodeState::Blacklisted) => self.ignore_blacklisting(&state),
        }
    }
}

impl EventHandler for AMNodeMap {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Node(node_id, event) = event else {
            return Err(StrataError::Internal(format!(
                "AMNodeMap received {event:?}"
            )));
        };
        Ok(AMNodeMap::handle(self, node_id, event))
    }
}
