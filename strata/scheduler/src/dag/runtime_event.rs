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

//! Events produced and consumed by running tasks. The engine routes them between the tasks of
//! adjacent vertices; their payloads are opaque to it.

use strata_core::ids::TaskAttemptId;

/// Where a runtime event came from or where it is going.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMetaData {
    /// Name of the vertex the producing or consuming task belongs to.
    pub task_vertex_name: String,
    /// Name of the vertex on the other side of the edge, if the event belongs to an edge.
    pub edge_vertex_name: Option<String>,
    /// The attempt that produced the event. Unset for destination metadata.
    pub attempt_id: Option<TaskAttemptId>,
    /// Physical input or output index the event refers to.
    pub index: u32,
}

/// A producer announces that an output partition is available.
#[derive(Clone, Debug, PartialEq)]
pub struct DataMovementEvent {
    /// Output partition of the producer task.
    pub source_index: u32,
    /// Input index on the consumer side. Filled in by routing.
    pub target_index: u32,
    /// Attempt number of the producer that wrote the data.
    pub version: u32,
    /// Opaque payload, e.g. the location of the data.
    pub user_payload: Vec<u8>,
}

/// A producer retracts previously announced output.
#[derive(Clone, Debug, PartialEq)]
pub struct InputFailedEvent {
    /// Input index on the consumer side. Filled in by routing.
    pub target_index: u32,
    /// Attempt number of the producer whose output is no longer valid.
    pub version: u32,
}

/// A consumer could not read one of its inputs.
#[derive(Clone, Debug, PartialEq)]
pub struct InputReadErrorEvent {
    /// Human-readable cause.
    pub diagnostics: String,
    /// Input index on the consumer that failed.
    pub index: u32,
    /// Attempt number of the producer whose output could not be read.
    pub version: u32,
}

/// Payload of a runtime event.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeEventPayload {
    /// Output available, routed producer to consumers.
    DataMovement(DataMovementEvent),
    /// Output retracted, routed producer to consumers.
    InputFailed(InputFailedEvent),
    /// Read failure, routed consumer back to producer.
    InputReadError(InputReadErrorEvent),
}

impl RuntimeEventPayload {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeEventPayload::DataMovement(_) => "DataMovement",
            RuntimeEventPayload::InputFailed(_) => "InputFailed",
            RuntimeEventPayload::InputReadError(_) => "InputReadError",
        }
    }
}

/// A routed runtime event with its source and, once routed, destination metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeEvent {
    /// Event payload.
    pub payload: RuntimeEventPayload,
    /// Producer metadata.
    pub source_info: EventMetaData,
    /// Consumer metadata, set when the event is delivered to a task.
    pub destination_info: Option<EventMetaData>,
}

impl RuntimeEvent {
    /// Creates an undelivered event produced by `attempt_id` of vertex `vertex_name`.
    pub fn new(
        payload: RuntimeEventPayload,
        vertex_name: impl Into<String>,
        edge_vertex_name: Option<String>,
        attempt_id: TaskAttemptId,
    ) -> Self {
        Self {
            payload,
            source_info: EventMetaData {
                task_vertex_name: vertex_name.into(),
                edge_vertex_name,
                attempt_id: Some(attempt_id),
                index: 0,
            },
            destination_info: None,
        }
    }

    /// The attempt that produced this event.
    pub fn source_attempt(&self) -> Option<TaskAttemptId> {
        self.source_info.attempt_id
    }
}
