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


//! The application master: owns the event loop and every handler, runs the periodic
//! background loops and accepts DAG submissions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use strata_core::error::{Result, StrataError};
use strata_core::event_loop::{EventLoop, EventSender};
use strata_core::ids::DagId;

use crate::app_context::{AppContext, SystemClock};
use crate::config::SchedulerConfig;
use crate::dag::execution_dag::Dag;
use crate::dag::handlers::{
    DagEventHandler, TaskAttemptEventHandler, TaskEventHandler, VertexEventHandler,
};
use crate::dag::DagState;
use crate::dispatcher::Dispatcher;
use crate::event::{DagEvent, Event, EventCategory, SchedulerEvent};
use crate::heartbeat::{run_heartbeat_checker, HeartbeatHandler};
use crate::metrics::SchedulerMetricsCollector;
use crate::plan::DagPlan;
use crate::rm::container::am_container::AMContainerEventHandler;
use crate::rm::container::launcher::{ContainerLauncher, LauncherEventHandler};
use crate::rm::scheduler_event_handler::SchedulerEventHandler;
use crate::rm::ClusterClient;
use crate::speculate::{Speculator, SpeculatorEventHandler};
use crate::standalone::{LocalCluster, LocalClusterConfig};
use crate::task_comm::TaskCommunicator;

pub struct DagAppMaster<C: ClusterClient + 'static> {
    ctx: Arc<AppContext>,
    event_loop: EventLoop<Event>,
    scheduler: Arc<SchedulerEventHandler<C>>,
    speculator: Arc<Speculator>,
    next_dag_id: AtomicU32,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: ClusterClient + 'static> DagAppMaster<C> {
    pub fn new(
        ctx: Arc<AppContext>,
        client: Arc<C>,
        launcher: Arc<dyn ContainerLauncher>,
    ) -> Result<Self> {
        let scheduler = Arc::new(SchedulerEventHandler::new(ctx.clone(), client));
        let speculator = Arc::new(Speculator::new(ctx.clone()));

        let mut dispatcher = Dispatcher::default();
        dispatcher.register(EventCategory::Dag, Arc::new(DagEventHandler::new(ctx.clone())))?;
        dispatcher.register(
            EventCategory::Vertex,
            Arc::new(VertexEventHandler::new(ctx.clone())),
        )?;
        dispatcher.register(EventCategory::Task, Arc::new(TaskEventHandler::new(ctx.clone())))?;
        dispatcher.register(
            EventCategory::TaskAttempt,
            Arc::new(TaskAttemptEventHandler::new(ctx.clone())),
        )?;
        dispatcher.register(
            EventCategory::Container,
            Arc::new(AMContainerEventHandler::new(ctx.clone())),
        )?;
        dispatcher.register(EventCategory::Node, ctx.node_map().clone())?;
        dispatcher.register(EventCategory::Scheduler, scheduler.clone())?;
        dispatcher.register(
            EventCategory::Launcher,
            Arc::new(LauncherEventHandler::new(launcher)),
        )?;
        dispatcher.register(
            EventCategory::Heartbeat,
            Arc::new(HeartbeatHandler::new(ctx.clone())),
        )?;
        dispatcher.register(
            EventCategory::Speculator,
            Arc::new(SpeculatorEventHandler::new(speculator.clone())),
        )?;

        let event_loop = EventLoop::new(
            "dag_app_master".to_owned(),
            ctx.config().event_loop_buffer_size as usize,
            Arc::new(dispatcher),
        );
        Ok(Self {
            ctx,
            event_loop,
            scheduler,
            speculator,
            next_dag_id: AtomicU32::new(1),
            background: Mutex::new(vec![]),
        })
    }

    pub fn ctx(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<SchedulerEventHandler<C>> {
        &self.scheduler
    }

    pub fn sender(&self) -> Result<EventSender<Event>> {
        self.event_loop.get_sender()
    }

    pub fn task_communicator(&self) -> Result<Arc<TaskCommunicator>> {
        Ok(Arc::new(TaskCommunicator::new(self.ctx.clone(), self.sender()?)))
    }

    /// Starts the event loop, the scheduler tick, the heartbeat checker and, when enabled,
    /// the speculator.
    pub fn start(&mut self) -> Result<()> {
        self.event_loop.start()?;
        let sender = self.sender()?;
        let config = self.ctx.config();
        let mut background = self.background.lock();

        let tick_sender = sender.clone();
        let tick_interval = config.scheduler_tick_interval_ms;
        background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(tick_interval));
            loop {
                ticker.tick().await;
                if tick_sender
                    .post_event(Event::Scheduler(SchedulerEvent::Tick))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
        background.push(tokio::spawn(run_heartbeat_checker(
            self.ctx.clone(),
            sender.clone(),
            config.heartbeat_check_interval_ms,
        )));
        if config.speculation_enabled {
            background.push(tokio::spawn(self.speculator.clone().run(sender)));
        }
        info!("DAG app master {} started", self.ctx.app_id());
        Ok(())
    }

    /// Makes `plan` the current DAG and starts it. The launch context of the previous DAG
    /// is evicted.
    pub async fn submit_dag(&self, plan: DagPlan) -> Result<DagId> {
        let sender = self.sender()?;
        let dag_id = DagId::new(
            self.ctx.app_id(),
            self.next_dag_id.fetch_add(1, Ordering::SeqCst),
        );
        if let Some(previous) = self.ctx.current_dag_id() {
            let previous_state = self.ctx.dag(previous)?.read().state();
            if !previous_state.is_terminal() {
                return Err(StrataError::General(format!(
                    "{previous} is still {previous_state}, cannot submit another DAG"
                )));
            }
            self.ctx.launch_contexts().evict(previous);
        }

        let now = self.ctx.now();
        info!("Submitting {dag_id} named {}", plan.name);
        self.ctx.set_current_dag(Dag::new(dag_id, plan, now));
        self.ctx.metrics().record_dag_submitted(dag_id, now);
        sender
            .post_events([
                Event::Dag(dag_id, DagEvent::Init),
                Event::Dag(dag_id, DagEvent::Start),
            ])
            .await?;
        Ok(dag_id)
    }

    pub async fn kill_dag(&self, dag_id: DagId, diagnostics: impl Into<String>) -> Result<()> {
        self.sender()?
            .post_event(Event::Dag(
                dag_id,
                DagEvent::Kill {
                    diagnostics: diagnostics.into(),
                },
            ))
            .await
    }

    /// Resolves once `dag_id` reaches a terminal state.
    pub async fn wait_for_completion(&self, dag_id: DagId) -> Result<DagState> {
        let mut status = self.ctx.subscribe_dag_status();
        let finished = *status
            .wait_for(|s| matches!(s, Some(s) if s.dag_id == dag_id && s.state.is_terminal()))
            .await
            .map_err(|e| StrataError::General(format!("DAG status channel closed: {e}")))?;
        finished
            .map(|s| s.state)
            .ok_or_else(|| StrataError::Internal(format!("No status published for {dag_id}")))
    }

    pub async fn stop(&self) {
        self.speculator.stop();
        self.scheduler.scheduler().stop();
        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Background loop of the DAG app master failed: {e}");
                }
            }
        }
        self.event_loop.stop();
        info!("DAG app master {} stopped", self.ctx.app_id());
    }
}

impl DagAppMaster<LocalCluster> {
    /// An app master running on a fresh in-process cluster, both started.
    pub fn start_standalone(
        config: SchedulerConfig,
        cluster_config: LocalClusterConfig,
        metrics: Arc<dyn SchedulerMetricsCollector>,
    ) -> Result<(Self, Arc<LocalCluster>)> {
        config.validate()?;
        let app_id = strata_core::timestamp_millis() / 1000;
        let ctx = Arc::new(AppContext::new(
            Arc::new(config),
            app_id,
            Arc::new(SystemClock::default()),
            metrics,
        ));
        let cluster = Arc::new(LocalCluster::new(cluster_config));
        let mut master = DagAppMaster::new(ctx, cluster.clone(), cluster.clone())?;
        master.start()?;
        cluster.start(master.task_communicator()?, master.sender()?)?;
        Ok((master, cluster))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::counters::DagCounter;
    use crate::metrics::default_metrics_collector;
    use crate::plan::{DataMovementType, VertexPlan};
    use crate::test_utils::{map_reduce_plan, TestMetricsCollector};

    fn cluster_config() -> LocalClusterConfig {
        LocalClusterConfig {
            nodes: 2,
            containers_per_node: 3,
            task_duration_ms: 20,
            ..Default::default()
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::default().with_scheduler_tick_interval_ms(50)
    }

    #[tokio::test]
    async fn map_reduce_runs_to_success() -> Result<()> {
        let metrics = Arc::new(TestMetricsCollector::default());
        let (master, cluster) =
            DagAppMaster::start_standalone(config(), cluster_config(), metrics.clone())?;

        let dag_id = master.submit_dag(map_reduce_plan(4, 2)).await?;
        let state = tokio::time::timeout(
            Duration::from_secs(30),
            master.wait_for_completion(dag_id),
        )
        .await
        .map_err(|_| StrataError::General("DAG did not finish in time".to_owned()))??;
        assert_eq!(state, DagState::Succeeded);

        {
            let dag = master.ctx().dag(dag_id)?;
            let dag = dag.read();
            assert_eq!(dag.completed_vertices(), 2);
            assert_eq!(dag.counters().get(DagCounter::NumSucceededTasks), 6);
        }
        assert_eq!(metrics.finished_dags(), vec![(dag_id, DagState::Succeeded)]);

        master.stop().await;
        cluster.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn invalid_plan_fails_without_running_tasks() -> Result<()> {
        let (master, cluster) = DagAppMaster::start_standalone(
            config(),
            cluster_config(),
            default_metrics_collector(),
        )?;
        let plan = DagPlan::new("cycle")
            .add_vertex(VertexPlan::new("a", 1))
            .add_vertex(VertexPlan::new("b", 1))
            .add_edge("a", "b", DataMovementType::ScatterGather)
            .add_edge("b", "a", DataMovementType::ScatterGather);
        let dag_id = master.submit_dag(plan).await?;
        let state = tokio::time::timeout(
            Duration::from_secs(10),
            master.wait_for_completion(dag_id),
        )
        .await
        .map_err(|_| StrataError::General("DAG did not finish in time".to_owned()))??;
        assert_eq!(state, DagState::Failed);
        assert_eq!(cluster.running_containers(), 0);

        // the next DAG is accepted once the previous one is terminal
        let next = master.submit_dag(map_reduce_plan(1, 1)).await?;
        assert_ne!(next, dag_id);
        master.stop().await;
        cluster.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn killed_dag_releases_its_containers() -> Result<()> {
        let cluster_config = LocalClusterConfig {
            task_duration_ms: 60_000,
            ..cluster_config()
        };
        let (master, cluster) =
            DagAppMaster::start_standalone(config(), cluster_config, default_metrics_collector())?;
        let dag_id = master.submit_dag(map_reduce_plan(2, 1)).await?;
        let ctx = master.ctx().clone();
        crate::test_utils::await_condition(Duration::from_millis(20), 250, || {
            let running = ctx
                .dag(dag_id)
                .map(|dag| dag.read().counters().get(DagCounter::TotalLaunchedTasks))
                .unwrap_or_default();
            futures::future::ready(Ok(running == 2))
        })
        .await?;

        master.kill_dag(dag_id, "killed by test").await?;
        let state = tokio::time::timeout(
            Duration::from_secs(10),
            master.wait_for_completion(dag_id),
        )
        .await
        .map_err(|_| StrataError::General("DAG did not finish in time".to_owned()))??;
        assert_eq!(state, DagState::Killed);
        master.stop().await;
        cluster.stop().await;
        Ok(())
    }
}
