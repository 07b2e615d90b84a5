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


//! The DAG, vertex, task and task attempt state machines.
//!
//! Every entity exposes a single `handle(event, ctx)` entry point that applies one transition
//! while the caller holds the entity's write lock, and returns the events the transition
//! causes. Other entities are never touched directly.

use std::fmt::Display;

use log::error;

use strata_core::error::StrataError;
use strata_core::ids::DagId;

use crate::event::{DagEvent, Event};

pub mod counters;
pub mod dag_scheduler;
pub mod edge;
pub mod execution_dag;
pub mod handlers;
pub mod runtime_event;
pub mod task;
pub mod task_attempt;
pub mod task_spec;
pub mod vertex;
pub mod vertex_manager;

pub use execution_dag::DagState;

/// Logs an event that has no transition in the entity's current state and raises an
/// internal error on the owning DAG.
pub(crate) fn invalid_transition(
    dag_id: DagId,
    entity: &dyn Display,
    state: &dyn Display,
    event: &str,
) -> Vec<Event> {
    let err = StrataError::InvalidTransition {
        entity: entity.to_string(),
        state: state.to_string(),
        event: event.to_owned(),
    };
    error!("{err}");
    vec![Event::Dag(
        dag_id,
        DagEvent::InternalError {
            diagnostics: err.to_string(),
        },
    )]
}
