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


use std::sync::Arc;

use log::warn;

use strata_core::error::{Result, StrataError};
use strata_core::ids::{ContainerId, NodeId};

use crate::dispatcher::EventHandler;
use crate::event::{AMContainerEvent, Event, LauncherEvent};
use crate::rm::container::launch_context::ContainerLaunchContext;

/// Starts and stops container processes on cluster nodes. Calls must not block; a launched
/// container asks for work through the task communicator.
pub trait ContainerLauncher: Send + Sync {
    fn launch(
        &self,
        container_id: ContainerId,
        node_id: &NodeId,
        context: Arc<ContainerLaunchContext>,
    ) -> Result<()>;

    fn stop(&self, container_id: ContainerId, node_id: &NodeId) -> Result<()>;
}

pub struct LauncherEventHandler {
    launcher: Arc<dyn ContainerLauncher>,
}

impl LauncherEventHandler {
    pub fn new(launcher: Arc<dyn ContainerLauncher>) -> Self {
        Self { launcher }
    }
}

impl EventHandler for LauncherEventHandler {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Launcher(event) = event else {
            return Err(StrataError::Internal(format!(
                "LauncherEventHandler received {event:?}"
            )));
        };
        let follow_up = match event {
            LauncherEvent::Launch {
                container_id,
                node_id,
                context,
            } => match self.launcher.launch(container_id, &node_id, context) {
                Ok(()) => Event::Container(container_id, AMContainerEvent::Launched),
                Err(e) => {
                    warn!("Fail to launch {container_id} on {node_id} due to {e}");
                    Event::Container(
                        container_id,
                        AMContainerEvent::LaunchFailed {
                            diagnostics: format!("Container launch failed: {e}"),
                        },
                    )
                }
            },
            LauncherEvent::Stop {
                container_id,
                node_id,
            } => match self.launcher.stop(container_id, &node_id) {
                Ok(()) => Event::Container(container_id, AMContainerEvent::NmStopSent),
                Err(e) => {
                    warn!("Fail to stop {container_id} on {node_id} due to {e}");
                    Event::Container(container_id, AMContainerEvent::NmStopFailed)
                }
            },
        };
        Ok(vec![follow_up])
    }
}
