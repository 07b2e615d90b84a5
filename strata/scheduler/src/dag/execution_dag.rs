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


use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use strata_core::error::{Result, StrataError};
use strata_core::ids::{DagId, VertexId};

use crate::app_context::{AppContext, DagStatus};
use crate::dag::counters::Counters;
use crate::dag::dag_scheduler::{DagScheduler, NaturalOrderScheduler};
use crate::dag::edge::Edge;
use crate::dag::invalid_transition;
use crate::dag::vertex::{Vertex, VertexState};
use crate::event::{DagEvent, DagSchedulerUpdate, Event, SchedulerEvent, VertexEvent};
use crate::plan::{DagPlan, DataMovementType};

/// ```text
/// NEW --init--> INITED --start--> RUNNING --> SUCCEEDED | FAILED
///  |                                 |
///  +--(invalid plan)--> FAILED       +--(kill)--> KILL_WAIT --> KILLED
/// any state --(internal error)--> ERROR
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DagState {
    New,
    Inited,
    Running,
    KillWait,
    Succeeded,
    Failed,
    Killed,
    Error,
}

impl DagState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DagState::Succeeded | DagState::Failed | DagState::Killed | DagState::Error
        )
    }
}

impl Display for DagState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DagState::New => "NEW",
            DagState::Inited => "INITED",
            DagState::Running => "RUNNING",
            DagState::KillWait => "KILL_WAIT",
            DagState::Succeeded => "SUCCEEDED",
            DagState::Failed => "FAILED",
            DagState::Killed => "KILLED",
            DagState::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

/// The plan checked for consistency, with its vertices in topological order.
struct ValidatedPlan {
    topological_order: Vec<usize>,
    /// Longest path from a root, per vertex index.
    distances: Vec<u32>,
}

fn validate_plan(plan: &DagPlan) -> Result<ValidatedPlan> {
    let mut index_of = HashMap::new();
    for (index, vertex) in plan.vertices.iter().enumerate() {
        if index_of.insert(vertex.name.as_str(), index).is_some() {
            return Err(StrataError::General(format!(
                "Duplicate vertex name {}",
                vertex.name
            )));
        }
    }

    let mut children = vec![vec![]; plan.vertices.len()];
    let mut in_degree = vec![0usize; plan.vertices.len()];
    let mut seen_edges = HashSet::new();
    for edge in &plan.edges {
        let (Some(&source), Some(&destination)) = (
            index_of.get(edge.source.as_str()),
            index_of.get(edge.destination.as_str()),
        ) else {
            return Err(StrataError::General(format!(
                "Edge {} refers to an unknown vertex",
                edge.name()
            )));
        };
        if source == destination {
            return Err(StrataError::General(format!(
                "Edge {} is a self loop",
                edge.name()
            )));
        }
        if !seen_edges.insert((source, destination)) {
            return Err(StrataError::General(format!(
                "Duplicate edge {}",
                edge.name()
            )));
        }
        let (source_parallelism, destination_parallelism) = (
            plan.vertices[source].parallelism,
            plan.vertices[destination].parallelism,
        );
        if edge.property.data_movement == DataMovementType::OneToOne
            && source_parallelism != destination_parallelism
        {
            return Err(StrataError::General(format!(
                "One-to-one edge {} connects {source_parallelism} tasks to {destination_parallelism} tasks",
                edge.name()
            )));
        }
        children[source].push(destination);
        in_degree[destination] += 1;
    }

    let mut distances = vec![0u32; plan.vertices.len()];
    let mut ready: VecDeque<usize> = (0..plan.vertices.len())
        .filter(|index| in_degree[*index] == 0)
        .collect();
    let mut topological_order = Vec::with_capacity(plan.vertices.len());
    while let Some(index) = ready.pop_front() {
        topological_order.push(index);
        for &child in &children[index] {
            distances[child] = distances[child].max(distances[index] + 1);
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.push_back(child);
            }
        }
    }
    if topological_order.len() != plan.vertices.len() {
        let cyclic: Vec<&str> = (0..plan.vertices.len())
            .filter(|index| in_degree[*index] > 0)
            .map(|index| plan.vertices[index].name.as_str())
            .collect();
        return Err(StrataError::General(format!(
            "DAG contains a cycle through vertices {cyclic:?}"
        )));
    }
    Ok(ValidatedPlan {
        topological_order,
        distances,
    })
}

pub struct Dag {
    id: DagId,
    plan: DagPlan,
    state: DagState,
    submit_time: u64,
    start_time: Option<u64>,
    finish_time: Option<u64>,
    /// Vertex IDs in topological order.
    vertices: Vec<VertexId>,
    vertex_names: HashMap<String, VertexId>,
    roots: Vec<VertexId>,
    edges: BTreeMap<String, Arc<Mutex<Edge>>>,
    scheduler: Option<Box<dyn DagScheduler>>,
    completed_vertices: HashSet<VertexId>,
    succeeded_vertices: HashSet<VertexId>,
    failed_vertices: HashSet<VertexId>,
    killed_vertices: HashSet<VertexId>,
    counters: Counters,
    diagnostics: Vec<String>,
}

impl Dag {
    pub fn new(id: DagId, plan: DagPlan, submit_time: u64) -> Self {
        Self {
            id,
            plan,
            state: DagState::New,
            submit_time,
            start_time: None,
            finish_time: None,
            vertices: vec![],
            vertex_names: HashMap::new(),
            roots: vec![],
            edges: BTreeMap::new(),
            scheduler: None,
            completed_vertices: HashSet::new(),
            succeeded_vertices: HashSet::new(),
            failed_vertices: HashSet::new(),
            killed_vertices: HashSet::new(),
            counters: Counters::default(),
            diagnostics: vec![],
        }
    }

    pub fn id(&self) -> DagId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.plan.name
    }

    pub fn plan(&self) -> &DagPlan {
        &self.plan
    }

    pub fn state(&self) -> DagState {
        self.state
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn num_vertices(&self) -> usize {
        self.plan.vertices.len()
    }

    pub fn completed_vertices(&self) -> usize {
        self.completed_vertices.len()
    }

    pub fn vertex_id(&self, name: &str) -> Option<VertexId> {
        self.vertex_names.get(name).copied()
    }

    pub fn edge(&self, name: &str) -> Option<Arc<Mutex<Edge>>> {
        self.edges.get(name).cloned()
    }

    pub fn submit_time(&self) -> u64 {
        self.submit_time
    }

    pub fn start_time(&self) -> Option<u64> {
        self.start_time
    }

    pub fn finish_time(&self) -> Option<u64> {
        self.finish_time
    }

    pub fn handle(&mut self, event: DagEvent, ctx: &AppContext) -> Vec<Event> {
        use DagEvent as E;
        use DagState as S;

        let previous = self.state;
        let event_name = event.name();
        let events = match (self.state, event) {
            (_, E::DiagnosticsUpdate { diagnostics }) => {
                self.diagnostics.push(diagnostics);
                vec![]
            }
            (_, E::CounterUpdate { updates }) => {
                self.counters.apply(&updates);
                vec![]
            }
            (S::Error, _) => vec![],
            (_, E::InternalError { diagnostics }) => {
                error!("{} failed with an internal error: {diagnostics}", self.id);
                self.diagnostics.push(diagnostics);
                let mut events = self.kill_incomplete_vertices("DAG hit an internal error");
                events.extend(self.finish(ctx, S::Error));
                events
            }

            (S::New, E::Init) => self.init(ctx),
            (S::New | S::Inited, E::Kill { diagnostics }) => {
                self.diagnostics.push(diagnostics);
                self.finish(ctx, S::Killed)
            }
            (S::Inited, E::Start) => self.start(ctx),

            (S::Running, E::VertexCompleted { vertex_id, state }) => {
                self.vertex_completed(ctx, vertex_id, state)
            }
            (S::Running, E::Kill { diagnostics }) => {
                info!("{} kill requested: {diagnostics}", self.id);
                self.diagnostics.push(diagnostics.clone());
                let events = self.kill_incomplete_vertices(&diagnostics);
                if events.is_empty() {
                    self.finish(ctx, S::Killed)
                } else {
                    self.state = S::KillWait;
                    events
                }
            }
            (S::KillWait, E::VertexCompleted { vertex_id, state }) => {
                self.record_vertex_completion(vertex_id, state);
                if self.completed_vertices.len() == self.vertices.len() {
                    self.finish(ctx, S::Killed)
                } else {
                    vec![]
                }
            }
            (S::KillWait, E::Kill { .. }) => vec![],
            (S::Running | S::KillWait, E::SchedulerUpdate(update)) => {
                self.scheduler_update(update)
            }

            (
                S::Succeeded | S::Failed | S::Killed,
                E::Start | E::VertexCompleted { .. } | E::Kill { .. } | E::SchedulerUpdate(_),
            ) => {
                debug!("{} is {}, ignoring {event_name}", self.id, self.state);
                vec![]
            }

            (state, _) => invalid_transition(self.id, &self.id, &state, event_name),
        };

        if previous != self.state {
            debug!(
                "{} transitioned from {previous} to {} on {event_name}",
                self.id, self.state
            );
        }
        events
    }

    fn init(&mut self, ctx: &AppContext) -> Vec<Event> {
        let validated = match validate_plan(&self.plan) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("{} has an invalid plan: {e}", self.id);
                self.diagnostics.push(format!("Invalid DAG plan: {e}"));
                return self.finish(ctx, DagState::Failed);
            }
        };

        let ids: Vec<VertexId> = (0..self.plan.vertices.len() as u32)
            .map(|index| VertexId::new(self.id, index))
            .collect();
        let mut vertices: Vec<Vertex> = self
            .plan
            .vertices
            .iter()
            .zip(&ids)
            .map(|(plan, id)| {
                Vertex::new(
                    *id,
                    plan.clone(),
                    self.plan.name.clone(),
                    self.plan.local_resources.clone(),
                    ctx.config().slow_start_min_src_fraction,
                    ctx.config().slow_start_max_src_fraction,
                )
            })
            .collect();
        for (index, plan) in self.plan.vertices.iter().enumerate() {
            self.vertex_names.insert(plan.name.clone(), ids[index]);
        }

        for edge_plan in &self.plan.edges {
            let (Some(&source), Some(&destination)) = (
                self.vertex_names.get(&edge_plan.source),
                self.vertex_names.get(&edge_plan.destination),
            ) else {
                continue;
            };
            let (source_index, destination_index) = (source.id as usize, destination.id as usize);
            let edge = Edge::new(
                (
                    source,
                    edge_plan.source.as_str(),
                    self.plan.vertices[source_index].parallelism,
                ),
                (
                    destination,
                    edge_plan.destination.as_str(),
                    self.plan.vertices[destination_index].parallelism,
                ),
                edge_plan.property.clone(),
            );
            let edge = match edge {
                Ok(edge) => Arc::new(Mutex::new(edge)),
                Err(e) => {
                    self.diagnostics.push(format!("Invalid DAG plan: {e}"));
                    return self.finish(ctx, DagState::Failed);
                }
            };
            vertices[source_index].add_output_edge(destination, edge.clone());
            vertices[destination_index].add_input_edge(source, edge.clone());
            self.edges.insert(edge_plan.name(), edge);
        }

        let distances = validated
            .distances
            .iter()
            .zip(&ids)
            .map(|(distance, id)| (*id, *distance))
            .collect();
        self.scheduler = Some(Box::new(NaturalOrderScheduler::new(distances)));
        self.vertices = validated
            .topological_order
            .iter()
            .map(|index| ids[*index])
            .collect();
        self.roots = self
            .vertices
            .iter()
            .filter(|id| validated.distances[id.id as usize] == 0)
            .copied()
            .collect();
        for vertex in vertices {
            ctx.register_vertex(vertex);
        }
        self.state = DagState::Inited;
        info!(
            "{} [{}] initialized with {} vertices and {} edges",
            self.id,
            self.plan.name,
            self.vertices.len(),
            self.edges.len()
        );
        vec![]
    }

    fn start(&mut self, ctx: &AppContext) -> Vec<Event> {
        self.state = DagState::Running;
        self.start_time = Some(ctx.now());
        if self.vertices.is_empty() {
            return self.finish(ctx, DagState::Succeeded);
        }
        let mut events: Vec<Event> = self
            .vertices
            .iter()
            .map(|id| Event::Vertex(*id, VertexEvent::Init))
            .collect();
        events.extend(
            self.roots
                .iter()
                .map(|id| Event::Vertex(*id, VertexEvent::Start)),
        );
        events
    }

    fn record_vertex_completion(&mut self, vertex_id: VertexId, state: VertexState) {
        self.completed_vertices.insert(vertex_id);
        match state {
            VertexState::Succeeded => {
                self.succeeded_vertices.insert(vertex_id);
            }
            VertexState::Failed => {
                self.succeeded_vertices.remove(&vertex_id);
                self.failed_vertices.insert(vertex_id);
            }
            VertexState::Killed => {
                self.killed_vertices.insert(vertex_id);
            }
            _ => {}
        }
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.vertex_completed(vertex_id, state);
        }
    }

    fn vertex_completed(
        &mut self,
        ctx: &AppContext,
        vertex_id: VertexId,
        state: VertexState,
    ) -> Vec<Event> {
        self.record_vertex_completion(vertex_id, state);
        debug!(
            "{} completed {} of {} vertices",
            self.id,
            self.completed_vertices.len(),
            self.vertices.len()
        );

        if !self.failed_vertices.is_empty() {
            let mut events = self.kill_incomplete_vertices(&format!(
                "Vertex {vertex_id} failed, killing the rest of the DAG"
            ));
            let killed = self.killed_vertices.len() + events.len();
            self.diagnostics.push(format!(
                "DAG did not succeed due to VERTEX_FAILURE. failedVertices:{} killedVertices:{killed}",
                self.failed_vertices.len()
            ));
            events.extend(self.finish(ctx, DagState::Failed));
            return events;
        }
        if self.completed_vertices.len() < self.vertices.len() {
            return vec![];
        }
        if self.killed_vertices.is_empty() {
            self.finish(ctx, DagState::Succeeded)
        } else {
            self.diagnostics.push(format!(
                "DAG did not succeed due to VERTEX_KILLED. killedVertices:{}",
                self.killed_vertices.len()
            ));
            self.finish(ctx, DagState::Killed)
        }
    }

    fn kill_incomplete_vertices(&self, diagnostics: &str) -> Vec<Event> {
        self.vertices
            .iter()
            .filter(|id| !self.completed_vertices.contains(id))
            .map(|id| {
                Event::Vertex(
                    *id,
                    VertexEvent::Kill {
                        diagnostics: diagnostics.to_owned(),
                    },
                )
            })
            .collect()
    }

    fn scheduler_update(&mut self, update: DagSchedulerUpdate) -> Vec<Event> {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return vec![];
        };
        match update {
            DagSchedulerUpdate::AttemptScheduled(request) => {
                let request = scheduler.schedule_attempt(*request);
                vec![Event::Scheduler(SchedulerEvent::AllocateTask(Box::new(
                    request,
                )))]
            }
            DagSchedulerUpdate::AttemptSucceeded(attempt_id) => {
                scheduler.attempt_succeeded(attempt_id);
                vec![]
            }
        }
    }

    fn finish(&mut self, ctx: &AppContext, state: DagState) -> Vec<Event> {
        self.state = state;
        let finish_time = ctx.now();
        self.finish_time = Some(finish_time);
        info!(
            "{} [{}] finished as {state}, counters={}, diagnostics={:?}",
            self.id, self.plan.name, self.counters, self.diagnostics
        );
        ctx.metrics()
            .record_dag_finished(self.id, state, self.submit_time, finish_time);
        ctx.publish_dag_status(DagStatus {
            dag_id: self.id,
            state,
        });
        vec![]
    }
}
