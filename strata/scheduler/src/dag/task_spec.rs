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


//! What an attempt is told about the work it runs.

use std::sync::Arc;

use strata_core::ids::TaskAttemptId;
use strata_core::resource::Resource;

use crate::plan::{LocalResources, TaskLocationHint};

/// One logical input of a task, fed by an edge from `source_vertex_name`.
#[derive(Clone, Debug, PartialEq)]
pub struct InputSpec {
    pub source_vertex_name: String,
    pub descriptor: String,
    /// Number of physical inputs, i.e. producer outputs this task reads.
    pub physical_input_count: u32,
}

/// One logical output of a task, consumed over an edge by `destination_vertex_name`.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSpec {
    pub destination_vertex_name: String,
    pub descriptor: String,
    /// Number of physical outputs, i.e. partitions this task writes.
    pub physical_output_count: u32,
}

/// Everything shared by the attempts of one task. Built by the vertex at init.
#[derive(Clone, Debug)]
pub struct TaskTemplate {
    pub dag_name: String,
    pub vertex_name: String,
    pub processor: String,
    pub resource: Resource,
    pub location_hint: TaskLocationHint,
    pub local_resources: LocalResources,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl TaskTemplate {
    /// The spec handed to attempt `attempt_id`.
    pub fn spec_for(&self, attempt_id: TaskAttemptId) -> Arc<TaskSpec> {
        Arc::new(TaskSpec {
            attempt_id,
            dag_name: self.dag_name.clone(),
            vertex_name: self.vertex_name.clone(),
            processor: self.processor.clone(),
            resource: self.resource,
            local_resources: self.local_resources.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        })
    }
}

/// The description of one attempt as delivered to the process running it.
#[derive(Clone, Debug)]
pub struct TaskSpec {
    pub attempt_id: TaskAttemptId,
    pub dag_name: String,
    pub vertex_name: String,
    pub processor: String,
    pub resource: Resource,
    pub local_resources: LocalResources,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl TaskSpec {
    /// Total physical inputs across all logical inputs.
    pub fn total_physical_inputs(&self) -> u32 {
        self.inputs.iter().map(|i| i.physical_input_count).sum()
    }
}
