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


//! Glue between the dispatcher and the [`TaskScheduler`]: scheduler events become scheduler
//! calls, and the scheduler's upcalls become container, node and attempt events.

use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use strata_core::error::{Result, StrataError};
use strata_core::ids::{ContainerId, TaskAttemptId};

use crate::app_context::AppContext;
use crate::dispatcher::EventHandler;
use crate::event::{
    AMContainerEvent, AMNodeEvent, DagEvent, Event, SchedulerEvent, TaskAttemptEvent,
};
use crate::rm::container::am_container::AMContainer;
use crate::rm::container::launch_context::ContainerLaunchContext;
use crate::rm::task_scheduler::{TaskScheduler, TaskSchedulerAppCallback};
use crate::rm::{AllocationRequest, ClusterClient, Container, ContainerStatus, NodeReport};

enum Upcall {
    Allocated {
        request: AllocationRequest,
        container: Container,
    },
    Completed {
        attempt_id: Option<TaskAttemptId>,
        status: ContainerStatus,
    },
    BeingReleased(ContainerId),
    NodesUpdated(Vec<NodeReport>),
    ShutdownRequested,
    Preempt {
        attempt_id: TaskAttemptId,
        container_id: ContainerId,
    },
}

/// Collects upcalls so they are turned into events after the scheduler call returns.
#[derive(Default)]
struct UpcallBuffer {
    upcalls: Mutex<Vec<Upcall>>,
}

impl UpcallBuffer {
    fn drain(&self) -> Vec<Upcall> {
        std::mem::take(&mut *self.upcalls.lock())
    }
}

impl TaskSchedulerAppCallback for UpcallBuffer {
    fn task_allocated(&self, request: AllocationRequest, container: Container) {
        self.upcalls
            .lock()
            .push(Upcall::Allocated { request, container });
    }

    fn container_completed(&self, attempt_id: Option<TaskAttemptId>, status: ContainerStatus) {
        self.upcalls
            .lock()
            .push(Upcall::Completed { attempt_id, status });
    }

    fn container_being_released(&self, container_id: ContainerId) {
        self.upcalls.lock().push(Upcall::BeingReleased(container_id));
    }

    fn nodes_updated(&self, reports: Vec<NodeReport>) {
        self.upcalls.lock().push(Upcall::NodesUpdated(reports));
    }

    fn app_shutdown_requested(&self) {
        self.upcalls.lock().push(Upcall::ShutdownRequested);
    }

    fn preempt_container(&self, attempt_id: TaskAttemptId, container_id: ContainerId) {
        self.upcalls.lock().push(Upcall::Preempt {
            attempt_id,
            container_id,
        });
    }
}

pub struct SchedulerEventHandler<C: ClusterClient> {
    ctx: Arc<AppContext>,
    scheduler: Arc<TaskScheduler<C>>,
    upcalls: Arc<UpcallBuffer>,
}

impl<C: ClusterClient> SchedulerEventHandler<C> {
    pub fn new(ctx: Arc<AppContext>, client: Arc<C>) -> Self {
        let upcalls = Arc::new(UpcallBuffer::default());
        let scheduler = Arc::new(TaskScheduler::new(
            ctx.config(),
            client,
            upcalls.clone(),
            ctx.node_map().clone(),
            ctx.rack_resolver().clone(),
            ctx.clock().clone(),
        ));
        Self {
            ctx,
            scheduler,
            upcalls,
        }
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler<C>> {
        &self.scheduler
    }

    fn launch_context(&self, attempt_id: TaskAttemptId) -> Result<Arc<ContainerLaunchContext>> {
        let dag_id = attempt_id.dag_id();
        let dag = self.ctx.dag(dag_id)?;
        let dag = dag.read();
        Ok(self
            .ctx
            .launch_contexts()
            .get_or_create(dag_id, || ContainerLaunchContext::for_dag(dag.plan())))
    }

    fn translate(&self, upcall: Upcall) -> Result<Vec<Event>> {
        let events = match upcall {
            Upcall::Allocated { request, container } => {
                let container_id = container.id;
                let mut events = vec![];
                if !self.ctx.has_container(container_id) {
                    let context = match self.launch_context(request.attempt_id) {
                        Ok(context) => context,
                        Err(e) => {
                            // the scheduler has already recorded this assignment
                            warn!(
                                "Release {container_id} allocated to {}, no launch context: {e}",
                                request.attempt_id
                            );
                            self.scheduler.deallocate_container(container_id);
                            return Ok(vec![Event::TaskAttempt(
                                request.attempt_id,
                                TaskAttemptEvent::ContainerTerminated {
                                    diagnostics: format!(
                                        "{container_id} released before launch: {e}"
                                    ),
                                },
                            )]);
                        }
                    };
                    events.push(Event::Node(
                        container.node_id.clone(),
                        AMNodeEvent::ContainerAllocated { container_id },
                    ));
                    events.push(Event::Container(
                        container_id,
                        AMContainerEvent::LaunchRequest { context },
                    ));
                    self.ctx.register_container(AMContainer::new(container));
                }
                events.push(Event::Container(
                    container_id,
                    AMContainerEvent::AssignTaskAttempt {
                        attempt_id: request.attempt_id,
                        spec: request.spec,
                    },
                ));
                events
            }
            Upcall::Completed { attempt_id, status } => {
                if !self.ctx.has_container(status.container_id) {
                    debug!(
                        "Completion of {} which never ran an attempt",
                        status.container_id
                    );
                    return Ok(vec![]);
                }
                if let Some(attempt_id) = attempt_id {
                    debug!("{} completed after running {attempt_id}", status.container_id);
                }
                vec![Event::Container(
                    status.container_id,
                    AMContainerEvent::Completed {
                        exit_status: status.exit_status,
                        diagnostics: status.diagnostics,
                    },
                )]
            }
            Upcall::BeingReleased(container_id) => {
                if self.ctx.has_container(container_id) {
                    vec![Event::Container(container_id, AMContainerEvent::StopRequest)]
                } else {
                    vec![]
                }
            }
            Upcall::NodesUpdated(reports) => reports
                .into_iter()
                .map(|report| {
                    Event::Node(
                        report.node_id,
                        AMNodeEvent::HealthUpdate {
                            healthy: report.state.is_usable(),
                        },
                    )
                })
                .collect(),
            Upcall::ShutdownRequested => match self.ctx.current_dag_id() {
                Some(dag_id) => {
                    info!("Cluster asked the application to shut down, killing {dag_id}");
                    vec![Event::Dag(
                        dag_id,
                        DagEvent::Kill {
                            diagnostics: "Cluster requested the application to shut down"
                                .to_owned(),
                        },
                    )]
                }
                None => vec![],
            },
            Upcall::Preempt {
                attempt_id,
                container_id,
            } => vec![Event::TaskAttempt(
                attempt_id,
                TaskAttemptEvent::KillRequest {
                    diagnostics: format!(
                        "Container {container_id} preempted for a higher priority request"
                    ),
                },
            )],
        };
        Ok(events)
    }

    fn apply(&self, event: SchedulerEvent) -> Vec<Event> {
        let scheduler = &self.scheduler;
        match event {
            SchedulerEvent::AllocateTask(request) => scheduler.allocate_task(*request),
            SchedulerEvent::TaskAttemptEnded {
                attempt_id,
                container_id,
                succeeded,
            } => {
                let mut events = vec![];
                if let (true, Some(container_id)) = (succeeded, container_id) {
                    events.push(Event::Container(
                        container_id,
                        AMContainerEvent::TaskAttemptSucceeded { attempt_id },
                    ));
                }
                if !scheduler.deallocate_task(attempt_id, succeeded) && !succeeded {
                    events.push(Event::TaskAttempt(
                        attempt_id,
                        TaskAttemptEvent::ContainerTerminated {
                            diagnostics: "Container was not allocated".to_owned(),
                        },
                    ));
                }
                return events;
            }
            SchedulerEvent::ContainerDeallocate { container_id } => {
                scheduler.deallocate_container(container_id)
            }
            SchedulerEvent::ContainerCompleted { container_id } => {
                scheduler.container_finished(container_id)
            }
            SchedulerEvent::ContainersAllocated(containers) => {
                scheduler.on_containers_allocated(containers)
            }
            SchedulerEvent::ContainersCompleted(statuses) => {
                scheduler.on_containers_completed(statuses)
            }
            SchedulerEvent::NodesUpdated(reports) => scheduler.nodes_updated(reports),
            SchedulerEvent::ShutdownRequested => scheduler.app_shutdown_requested(),
            SchedulerEvent::Tick => {
                self.ctx
                    .node_map()
                    .set_cluster_node_count(scheduler.client().cluster_node_count());
                scheduler.release_expired_held(self.ctx.now());
                scheduler.preempt_if_needed();
            }
        }
        vec![]
    }
}

impl<C: ClusterClient + 'static> EventHandler for SchedulerEventHandler<C> {
    fn handle(&self, event: Event) -> Result<Vec<Event>> {
        let Event::Scheduler(event) = event else {
            return Err(StrataError::Internal(format!(
                "SchedulerEventHandler received {event:?}"
            )));
        };
        // the scheduler's own events come before the events its upcalls cause
        let mut events = self.apply(event);
        for upcall in self.upcalls.drain() {
            match self.translate(upcall) {
                Ok(translated) => events.extend(translated),
                Err(e) => error!("Fail to handle scheduler upcall due to {e}"),
            }
        }
        self.ctx
            .metrics()
            .set_pending_container_requests(self.scheduler.pending_count() as u64);
        Ok(events)
    }
}
