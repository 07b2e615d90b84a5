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


use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use uuid::Uuid;

use strata_core::ids::DagId;

use crate::plan::{DagPlan, LocalResources};

/// Credentials handed to every container of a DAG.
#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    pub session_token: String,
}

/// What every container of one DAG is started with.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerLaunchContext {
    pub local_resources: LocalResources,
    pub environment: HashMap<String, String>,
    pub command: Vec<String>,
    pub credentials: Credentials,
}

impl ContainerLaunchContext {
    pub fn for_dag(plan: &DagPlan) -> Self {
        Self {
            local_resources: plan.local_resources.clone(),
            environment: plan.environment.clone(),
            command: plan.command.clone(),
            credentials: Credentials {
                session_token: Uuid::new_v4().to_string(),
            },
        }
    }
}

/// Launch contexts shared by the containers of a DAG, keyed by DAG. Entries live until
/// they are evicted.
#[derive(Default)]
pub struct LaunchContextCache {
    contexts: Mutex<HashMap<DagId, Arc<ContainerLaunchContext>>>,
}

impl LaunchContextCache {
    pub fn get_or_create(
        &self,
        dag_id: DagId,
        create: impl FnOnce() -> ContainerLaunchContext,
    ) -> Arc<ContainerLaunchContext> {
        self.contexts
            .lock()
            .entry(dag_id)
            .or_insert_with(|| {
                debug!("Creating the container launch context of {dag_id}");
                Arc::new(create())
            })
            .clone()
    }

    pub fn evict(&self, dag_id: DagId) -> Option<Arc<ContainerLaunchContext>> {
        self.contexts.lock().remove(&dag_id)
    }

    pub fn contains(&self, dag_id: DagId) -> bool {
        self.contexts.lock().contains_key(&dag_id)
    }
}
