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


//! An edge connects the tasks of a producer vertex to the tasks of a consumer vertex and
//! routes runtime events between them according to its data movement type.

use log::debug;

use strata_core::error::{Result, StrataError};
use strata_core::ids::{TaskAttemptId, TaskId, VertexId};

use crate::dag::runtime_event::{
    DataMovementEvent, EventMetaData, RuntimeEvent, RuntimeEventPayload,
};
use crate::dag::task_spec::{InputSpec, OutputSpec};
use crate::event::{Event, TaskAttemptEvent, TaskEvent};
use crate::plan::{DataMovementType, EdgeProperty};

/// Routing policy of an edge. Task indices are positions within their vertex.
pub trait EdgeManager: Send + Sync {
    /// Physical inputs a destination task reads from this edge.
    fn num_destination_task_physical_inputs(
        &self,
        source_parallelism: u32,
        destination_task_index: u32,
    ) -> u32;

    /// Physical outputs a source task writes to this edge.
    fn num_source_task_physical_outputs(
        &self,
        destination_parallelism: u32,
        source_task_index: u32,
    ) -> u32;

    /// Destination `(task index, input index)` pairs for a data movement event.
    fn route_data_movement_to_destination(
        &self,
        event: &DataMovementEvent,
        source_task_index: u32,
        destination_parallelism: u32,
    ) -> Vec<(u32, u32)>;

    /// Destination `(task index, input index)` pairs that must drop a failed source output.
    fn route_input_failed_to_destination(
        &self,
        source_task_index: u32,
        destination_parallelism: u32,
    ) -> Vec<(u32, u32)>;

    /// The source task that wrote `failed_input_index` of `destination_task_index`.
    fn route_input_error_to_source(
        &self,
        destination_task_index: u32,
        failed_input_index: u32,
    ) -> u32;

    /// How many destination tasks read the output of one source task.
    fn num_destination_consumer_tasks(
        &self,
        source_task_index: u32,
        destination_parallelism: u32,
    ) -> u32;
}

/// Task `i` of the source feeds task `i` of the destination.
pub struct OneToOneEdgeManager {}

impl EdgeManager for OneToOneEdgeManager {
    fn num_destination_task_physical_inputs(&self, _: u32, _: u32) -> u32 {
        1
    }

    fn num_source_task_physical_outputs(&self, _: u32, _: u32) -> u32 {
        1
    }

    fn route_data_movement_to_destination(
        &self,
        _event: &DataMovementEvent,
        source_task_index: u32,
        _destination_parallelism: u32,
    ) -> Vec<(u32, u32)> {
        vec![(source_task_index, 0)]
    }

    fn route_input_failed_to_destination(
        &self,
        source_task_index: u32,
        _destination_parallelism: u32,
    ) -> Vec<(u32, u32)> {
        vec![(source_task_index, 0)]
    }

    fn route_input_error_to_source(&self, destination_task_index: u32, _: u32) -> u32 {
        destination_task_index
    }

    fn num_destination_consumer_tasks(&self, _: u32, _: u32) -> u32 {
        1
    }
}

/// Every destination task reads the single output of every source task.
pub struct BroadcastEdgeManager {}

impl EdgeManager for BroadcastEdgeManager {
    fn num_destination_task_physical_inputs(&self, source_parallelism: u32, _: u32) -> u32 {
        source_parallelism
    }

    fn num_source_task_physical_outputs(&self, _: u32, _: u32) -> u32 {
        1
    }

    fn route_data_movement_to_destination(
        &self,
        _event: &DataMovementEvent,
        source_task_index: u32,
        destination_parallelism: u32,
    ) -> Vec<(u32, u32)> {
        (0..destination_parallelism)
            .map(|task| (task, source_task_index))
            .collect()
    }

    fn route_input_failed_to_destination(
        &self,
        source_task_index: u32,
        destination_parallelism: u32,
    ) -> Vec<(u32, u32)> {
        (0..destination_parallelism)
            .map(|task| (task, source_task_index))
            .collect()
    }

    fn route_input_error_to_source(&self, _: u32, failed_input_index: u32) -> u32 {
        failed_input_index
    }

    fn num_destination_consumer_tasks(&self, _: u32, destination_parallelism: u32) -> u32 {
        destination_parallelism
    }
}

/// Every source task writes one partition per destination task; partition `p` of every
/// source goes to destination task `p`.
pub struct ScatterGatherEdgeManager {}

impl EdgeManager for ScatterGatherEdgeManager {
    fn num_destination_task_physical_inputs(&self, source_parallelism: u32, _: u32) -> u32 {
        source_parallelism
    }

    fn num_source_task_physical_outputs(&self, destination_parallelism: u32, _: u32) -> u32 {
        destination_parallelism
    }

    fn route_data_movement_to_destination(
        &self,
        event: &DataMovementEvent,
        source_task_index: u32,
        _destination_parallelism: u32,
    ) -> Vec<(u32, u32)> {
        vec![(event.source_index, source_task_index)]
    }

    fn route_input_failed_to_destination(
        &self,
        source_task_index: u32,
        destination_parallelism: u32,
    ) -> Vec<(u32, u32)> {
        (0..destination_parallelism)
            .map(|task| (task, source_task_index))
            .collect()
    }

    fn route_input_error_to_source(&self, _: u32, failed_input_index: u32) -> u32 {
        failed_input_index
    }

    fn num_destination_consumer_tasks(&self, _: u32, destination_parallelism: u32) -> u32 {
        destination_parallelism
    }
}

pub fn edge_manager_for(data_movement: DataMovementType) -> Box<dyn EdgeManager> {
    match data_movement {
        DataMovementType::OneToOne => Box::new(OneToOneEdgeManager {}),
        DataMovementType::Broadcast => Box::new(BroadcastEdgeManager {}),
        DataMovementType::ScatterGather => Box::new(ScatterGatherEdgeManager {}),
    }
}

pub struct Edge {
    source: VertexId,
    source_name: String,
    source_parallelism: u32,
    destination: VertexId,
    destination_name: String,
    destination_parallelism: u32,
    property: EdgeProperty,
    manager: Box<dyn EdgeManager>,
    buffering: bool,
    buffered: Vec<RuntimeEvent>,
}

impl Edge {
    /// Creates an edge in buffering mode.
    pub fn new(
        (source, source_name, source_parallelism): (VertexId, &str, u32),
        (destination, destination_name, destination_parallelism): (VertexId, &str, u32),
        property: EdgeProperty,
    ) -> Result<Self> {
        if property.data_movement == DataMovementType::OneToOne
            && source_parallelism != destination_parallelism
        {
            return Err(StrataError::General(format!(
                "One-to-one edge {source_name}->{destination_name} connects {source_parallelism} tasks to {destination_parallelism} tasks"
            )));
        }
        Ok(Self {
            source,
            source_name: source_name.to_owned(),
            source_parallelism,
            destination,
            destination_name: destination_name.to_owned(),
            destination_parallelism,
            manager: edge_manager_for(property.data_movement),
            property,
            buffering: true,
            buffered: vec![],
        })
    }

    pub fn source(&self) -> VertexId {
        self.source
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn source_parallelism(&self) -> u32 {
        self.source_parallelism
    }

    pub fn destination(&self) -> VertexId {
        self.destination
    }

    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    pub fn property(&self) -> &EdgeProperty {
        &self.property
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Events routed toward destination tasks are queued until buffering stops.
    pub fn start_event_buffering(&mut self) {
        self.buffering = true;
    }

    /// Leaves buffering mode and routes the queued events in the order they arrived.
    pub fn stop_event_buffering(&mut self) -> Result<Vec<Event>> {
        self.buffering = false;
        let buffered = std::mem::take(&mut self.buffered);
        if !buffered.is_empty() {
            debug!(
                "Flushing {} buffered events on edge {}->{}",
                buffered.len(),
                self.source_name,
                self.destination_name
            );
        }
        let mut events = vec![];
        for event in buffered {
            events.extend(self.send_to_destination_tasks(event)?);
        }
        Ok(events)
    }

    /// Routes a runtime event reported on this edge. Data movement and input failed events
    /// travel to destination tasks, read errors travel back to the producing attempt.
    pub fn send_event(&mut self, event: RuntimeEvent) -> Result<Vec<Event>> {
        match &event.payload {
            RuntimeEventPayload::DataMovement(_) | RuntimeEventPayload::InputFailed(_) => {
                if self.buffering {
                    self.buffered.push(event);
                    Ok(vec![])
                } else {
                    self.send_to_destination_tasks(event)
                }
            }
            RuntimeEventPayload::InputReadError(_) => self.send_to_source_tasks(event),
        }
    }

    fn producer_index(&self, event: &RuntimeEvent) -> Result<u32> {
        let attempt_id = event.source_attempt().ok_or_else(|| {
            StrataError::Internal(format!(
                "{} event on edge {}->{} has no source attempt",
                event.payload.kind(),
                self.source_name,
                self.destination_name
            ))
        })?;
        if attempt_id.vertex_id() != self.source || attempt_id.task_id.id >= self.source_parallelism {
            return Err(StrataError::Internal(format!(
                "Attempt {attempt_id} is not a producer of edge {}->{}",
                self.source_name, self.destination_name
            )));
        }
        Ok(attempt_id.task_id.id)
    }

    fn send_to_destination_tasks(&self, event: RuntimeEvent) -> Result<Vec<Event>> {
        let source_index = self.producer_index(&event)?;
        let targets = match &event.payload {
            RuntimeEventPayload::DataMovement(dm) => self
                .manager
                .route_data_movement_to_destination(dm, source_index, self.destination_parallelism),
            RuntimeEventPayload::InputFailed(_) => self
                .manager
                .route_input_failed_to_destination(source_index, self.destination_parallelism),
            RuntimeEventPayload::InputReadError(_) => {
                return Err(StrataError::Internal(
                    "Read errors are routed to source tasks".to_owned(),
                ))
            }
        };

        let mut events = Vec::with_capacity(targets.len());
        for (task_index, input_index) in targets {
            if task_index >= self.destination_parallelism {
                return Err(StrataError::Internal(format!(
                    "Edge {}->{} routed an event to task {task_index} of {} tasks",
                    self.source_name, self.destination_name, self.destination_parallelism
                )));
            }
            let mut routed = event.clone();
            match &mut routed.payload {
                RuntimeEventPayload::DataMovement(dm) => dm.target_index = input_index,
                RuntimeEventPayload::InputFailed(failed) => failed.target_index = input_index,
                RuntimeEventPayload::InputReadError(_) => {}
            }
            routed.destination_info = Some(EventMetaData {
                task_vertex_name: self.destination_name.clone(),
                edge_vertex_name: Some(self.source_name.clone()),
                attempt_id: None,
                index: input_index,
            });
            events.push(Event::Task(
                TaskId::new(self.destination, task_index),
                TaskEvent::AddInputEvent(Box::new(routed)),
            ));
        }
        Ok(events)
    }

    fn send_to_source_tasks(&self, event: RuntimeEvent) -> Result<Vec<Event>> {
        let RuntimeEventPayload::InputReadError(read_error) = &event.payload else {
            return Err(StrataError::Internal(
                "Only read errors are routed to source tasks".to_owned(),
            ));
        };
        let consumer = event.source_attempt().ok_or_else(|| {
            StrataError::Internal("Read error event without a consumer attempt".to_owned())
        })?;
        if consumer.vertex_id() != self.destination {
            return Err(StrataError::Internal(format!(
                "Attempt {consumer} is not a consumer of edge {}->{}",
                self.source_name, self.destination_name
            )));
        }
        let source_index = self
            .manager
            .route_input_error_to_source(consumer.task_id.id, read_error.index);
        if source_index >= self.source_parallelism {
            return Err(StrataError::Internal(format!(
                "Read error on input {} of {consumer} maps to missing source task {source_index}",
                read_error.index
            )));
        }
        let producer = TaskAttemptId::new(
            TaskId::new(self.source, source_index),
            read_error.version,
        );
        let num_consumers = self
            .manager
            .num_destination_consumer_tasks(source_index, self.destination_parallelism);
        debug!("Routing read error of {consumer} back to producer {producer}");
        Ok(vec![Event::TaskAttempt(
            producer,
            TaskAttemptEvent::OutputFailed {
                consumer,
                num_consumers,
            },
        )])
    }

    /// What destination task `task_index` reads from this edge.
    pub fn destination_spec(&self, task_index: u32) -> InputSpec {
        InputSpec {
            source_vertex_name: self.source_name.clone(),
            descriptor: self.property.destination_descriptor.clone(),
            physical_input_count: self
                .manager
                .num_destination_task_physical_inputs(self.source_parallelism, task_index),
        }
    }

    /// What source task `task_index` writes to this edge.
    pub fn source_spec(&self, task_index: u32) -> OutputSpec {
        OutputSpec {
            destination_vertex_name: self.destination_name.clone(),
            descriptor: self.property.source_descriptor.clone(),
            physical_output_count: self
                .manager
                .num_source_task_physical_outputs(self.destination_parallelism, task_index),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::runtime_event::{InputFailedEvent, InputReadErrorEvent};
    use strata_core::ids::DagId;

    fn vertex(id: u32) -> VertexId {
        VertexId::new(DagId::new(1, 1), id)
    }

    fn attempt(vertex_id: u32, task: u32, version: u32) -> TaskAttemptId {
        TaskAttemptId::new(TaskId::new(vertex(vertex_id), task), version)
    }

    fn edge(data_movement: DataMovementType, source: u32, destination: u32) -> Edge {
        Edge::new(
            (vertex(0), "map", source),
            (vertex(1), "reduce", destination),
            EdgeProperty::new(data_movement),
        )
        .unwrap()
    }

    fn data_movement(task: u32, source_index: u32) -> RuntimeEvent {
        RuntimeEvent::new(
            RuntimeEventPayload::DataMovement(DataMovementEvent {
                source_index,
                target_index: 0,
                version: 0,
                user_payload: vec![],
            }),
            "map",
            Some("reduce".to_owned()),
            attempt(0, task, 0),
        )
    }

    fn delivered(events: &[Event]) -> Vec<(u32, u32)> {
        events
            .iter()
            .map(|e| match e {
                Event::Task(task_id, TaskEvent::AddInputEvent(event)) => (
                    task_id.id,
                    event.destination_info.as_ref().map(|d| d.index).unwrap(),
                ),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn scatter_gather_routes_partition_to_task() -> Result<()> {
        let mut edge = edge(DataMovementType::ScatterGather, 4, 3);
        edge.stop_event_buffering()?;
        let events = edge.send_event(data_movement(2, 1))?;
        assert_eq!(delivered(&events), vec![(1, 2)]);
        match &events[0] {
            Event::Task(_, TaskEvent::AddInputEvent(event)) => match &event.payload {
                RuntimeEventPayload::DataMovement(dm) => assert_eq!(dm.target_index, 2),
                _ => panic!("expected a data movement event"),
            },
            _ => panic!("expected an input event"),
        }
        assert_eq!(edge.destination_spec(0).physical_input_count, 4);
        assert_eq!(edge.source_spec(0).physical_output_count, 3);
        Ok(())
    }

    #[test]
    fn broadcast_routes_to_every_task() -> Result<()> {
        let mut edge = edge(DataMovementType::Broadcast, 2, 3);
        edge.stop_event_buffering()?;
        let events = edge.send_event(data_movement(1, 0))?;
        assert_eq!(delivered(&events), vec![(0, 1), (1, 1), (2, 1)]);
        Ok(())
    }

    #[test]
    fn one_to_one_requires_equal_parallelism() -> Result<()> {
        assert!(Edge::new(
            (vertex(0), "map", 2),
            (vertex(1), "reduce", 3),
            EdgeProperty::new(DataMovementType::OneToOne),
        )
        .is_err());
        let mut edge = edge(DataMovementType::OneToOne, 2, 2);
        edge.stop_event_buffering()?;
        assert_eq!(delivered(&edge.send_event(data_movement(1, 0))?), vec![(1, 0)]);
        Ok(())
    }

    #[test]
    fn buffered_events_flush_in_order() -> Result<()> {
        let mut edge = edge(DataMovementType::ScatterGather, 2, 2);
        assert!(edge.is_buffering());
        assert!(edge.send_event(data_movement(0, 1))?.is_empty());
        assert!(edge.send_event(data_movement(1, 0))?.is_empty());
        let failed = RuntimeEvent::new(
            RuntimeEventPayload::InputFailed(InputFailedEvent {
                target_index: 0,
                version: 0,
            }),
            "map",
            Some("reduce".to_owned()),
            attempt(0, 0, 0),
        );
        assert!(edge.send_event(failed)?.is_empty());

        let flushed = edge.stop_event_buffering()?;
        assert_eq!(delivered(&flushed), vec![(1, 0), (0, 1), (0, 0), (1, 0)]);
        assert!(edge.stop_event_buffering()?.is_empty());
        Ok(())
    }

    #[test]
    fn read_error_is_routed_to_versioned_producer() -> Result<()> {
        let mut edge = edge(DataMovementType::ScatterGather, 4, 2);
        let read_error = RuntimeEvent::new(
            RuntimeEventPayload::InputReadError(InputReadErrorEvent {
                diagnostics: "connection refused".to_owned(),
                index: 3,
                version: 1,
            }),
            "reduce",
            Some("map".to_owned()),
            attempt(1, 1, 0),
        );
        // read errors are not held back by buffering
        let events = edge.send_event(read_error)?;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::TaskAttempt(
                producer,
                TaskAttemptEvent::OutputFailed {
                    consumer,
                    num_consumers,
                },
            ) => {
                assert_eq!(*producer, attempt(0, 3, 1));
                assert_eq!(*consumer, attempt(1, 1, 0));
                assert_eq!(*num_consumers, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn rejects_events_from_foreign_attempts() {
        let mut edge = edge(DataMovementType::Broadcast, 2, 2);
        edge.buffering = false;
        let mut event = data_movement(0, 0);
        event.source_info.attempt_id = Some(attempt(5, 0, 0));
        assert!(edge.send_event(event).is_err());
    }
}
