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

//! The execution plan of a DAG as submitted by a client. A plan is immutable once parsed;
//! the DAG's `Init` transition validates it and turns it into vertices and edges.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strata_core::resource::Resource;

/// How data moves between the tasks of two adjacent vertices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataMovementType {
    /// Producer task `i` feeds consumer task `i`.
    OneToOne,
    /// Every producer task feeds every consumer task.
    Broadcast,
    /// Producer output partition `p` feeds consumer task `p`.
    ScatterGather,
}

impl Display for DataMovementType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataMovementType::OneToOne => "one-to-one",
            DataMovementType::Broadcast => "broadcast",
            DataMovementType::ScatterGather => "scatter-gather",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DataMovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "one-to-one" => Ok(DataMovementType::OneToOne),
            "broadcast" => Ok(DataMovementType::Broadcast),
            "scatter-gather" => Ok(DataMovementType::ScatterGather),
            other => Err(format!("Unknown data movement type: {other}")),
        }
    }
}

/// Routing policy and the producer/consumer descriptors of an edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeProperty {
    /// Routing policy.
    pub data_movement: DataMovementType,
    /// Output descriptor on the producer side.
    pub source_descriptor: String,
    /// Input descriptor on the consumer side.
    pub destination_descriptor: String,
}

impl EdgeProperty {
    /// An edge property with default descriptors for the given routing policy.
    pub fn new(data_movement: DataMovementType) -> Self {
        Self {
            data_movement,
            source_descriptor: "output".to_owned(),
            destination_descriptor: "input".to_owned(),
        }
    }
}

/// A file a task needs localized on its host before it can run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalResource {
    /// Location of the resource.
    pub uri: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification timestamp, used to detect changed resources.
    pub timestamp: u64,
}

/// Local resources keyed by the name they are localized under.
pub type LocalResources = HashMap<String, LocalResource>;

/// Preferred placement of one task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLocationHint {
    /// Preferred hosts.
    pub hosts: Vec<String>,
    /// Preferred racks.
    pub racks: Vec<String>,
}

impl TaskLocationHint {
    /// A hint preferring the given hosts.
    pub fn hosts(hosts: &[&str]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            racks: vec![],
        }
    }

    /// Whether the hint names no location at all.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.racks.is_empty()
    }
}

/// One vertex of the plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VertexPlan {
    /// Unique name within the DAG.
    pub name: String,
    /// Processor descriptor run by every task.
    pub processor: String,
    /// Number of tasks.
    pub parallelism: u32,
    /// Resource shape requested per task.
    pub resource: Resource,
    /// Per-task location hints, indexed by task index. May be shorter than `parallelism`.
    pub location_hints: Vec<TaskLocationHint>,
    /// Resources every task of this vertex needs.
    pub local_resources: LocalResources,
}

impl VertexPlan {
    /// A vertex with default processor and resource shape.
    pub fn new(name: impl Into<String>, parallelism: u32) -> Self {
        let name = name.into();
        Self {
            processor: format!("{name}-processor"),
            name,
            parallelism,
            resource: Resource::new(1024, 1),
            location_hints: vec![],
            local_resources: HashMap::new(),
        }
    }

    /// Sets the requested resource shape.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    /// Sets per-task location hints.
    pub fn with_location_hints(mut self, hints: Vec<TaskLocationHint>) -> Self {
        self.location_hints = hints;
        self
    }

    /// Adds a local resource.
    pub fn with_local_resource(mut self, name: impl Into<String>, resource: LocalResource) -> Self {
        self.local_resources.insert(name.into(), resource);
        self
    }
}

/// A directed edge between two named vertices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgePlan {
    /// Producer vertex name.
    pub source: String,
    /// Consumer vertex name.
    pub destination: String,
    /// Routing policy and descriptors.
    pub property: EdgeProperty,
}

impl EdgePlan {
    /// The name the DAG records this edge under.
    pub fn name(&self) -> String {
        format!("{}->{}", self.source, self.destination)
    }
}

/// A complete DAG plan.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DagPlan {
    /// DAG name.
    pub name: String,
    /// Vertices in declaration order.
    pub vertices: Vec<VertexPlan>,
    /// Edges between vertices.
    pub edges: Vec<EdgePlan>,
    /// Environment shared by every container of this DAG.
    pub environment: HashMap<String, String>,
    /// Container launch command.
    pub command: Vec<String>,
    /// Resources shared by every container of this DAG.
    pub local_resources: LocalResources,
}

impl DagPlan {
    /// An empty plan.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: vec!["strata-task-runner".to_owned()],
            ..Default::default()
        }
    }

    /// Appends a vertex.
    pub fn add_vertex(mut self, vertex: VertexPlan) -> Self {
        self.vertices.push(vertex);
        self
    }

    /// Appends an edge with default descriptors.
    pub fn add_edge(
        mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
        data_movement: DataMovementType,
    ) -> Self {
        self.edges.push(EdgePlan {
            source: source.into(),
            destination: destination.into(),
            property: EdgeProperty::new(data_movement),
        });
        self
    }

    /// Sets an environment variable for every container.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}
