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


//! Strata scheduler binary: runs one DAG on a standalone cluster.

use std::{env, io};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use strata_core::config::LogRotationPolicy;
use strata_core::error::StrataError;
use strata_scheduler::config::{parse_dag_plan, Config, SchedulerConfig};
use strata_scheduler::dag::DagState;
use strata_scheduler::dag_app_master::DagAppMaster;
use strata_scheduler::metrics::default_metrics_collector;
use strata_scheduler::standalone::LocalClusterConfig;

fn main() -> strata_core::error::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .map_err(|e| StrataError::General(format!("Fail to build tokio runtime: {e}")))?;

    runtime.block_on(inner())
}

async fn inner() -> strata_core::error::Result<()> {
    // parse options
    let opt = Config::parse();

    let rust_log = env::var(EnvFilter::DEFAULT_ENV);
    let log_filter = EnvFilter::new(rust_log.unwrap_or(opt.log_level_setting.clone()));

    let tracing = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_thread_names(opt.print_thread_info)
        .with_thread_ids(opt.print_thread_info)
        .with_writer(io::stdout)
        .with_env_filter(log_filter);

    // File layer
    if let Some(log_dir) = &opt.log_dir {
        let log_file_name_prefix = format!("strata_scheduler_{}", opt.dag_name);

        let log_file = match opt.log_rotation_policy {
            LogRotationPolicy::Minutely => {
                tracing_appender::rolling::minutely(log_dir, &log_file_name_prefix)
            }
            LogRotationPolicy::Hourly => {
                tracing_appender::rolling::hourly(log_dir, &log_file_name_prefix)
            }
            LogRotationPolicy::Daily => {
                tracing_appender::rolling::daily(log_dir, &log_file_name_prefix)
            }
            LogRotationPolicy::Never => {
                tracing_appender::rolling::never(log_dir, &log_file_name_prefix)
            }
        };

        tracing.with_writer(log_file).init();
    } else {
        tracing.init();
    }

    let plan = parse_dag_plan(&opt.dag_name, &opt.vertices, &opt.edges)?;
    let cluster_config = LocalClusterConfig {
        nodes: opt.cluster_nodes,
        containers_per_node: opt.containers_per_node,
        task_duration_ms: opt.task_duration_ms,
        ..Default::default()
    };
    let config: SchedulerConfig = opt.try_into()?;

    let (master, cluster) =
        DagAppMaster::start_standalone(config, cluster_config, default_metrics_collector())?;
    let dag_id = master.submit_dag(plan).await?;

    let state = tokio::select! {
        state = master.wait_for_completion(dag_id) => state?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, killing {dag_id}");
            master.kill_dag(dag_id, "Killed on interrupt").await?;
            master.wait_for_completion(dag_id).await?
        }
    };

    {
        let dag = master.ctx().dag(dag_id)?;
        let dag = dag.read();
        println!("{dag_id} {} finished with state {state}", dag.name());
        println!("Counters: {}", dag.counters());
        for diagnostic in dag.diagnostics() {
            println!("Diagnostics: {diagnostic}");
        }
    }

    master.stop().await;
    cluster.stop().await;

    if state == DagState::Succeeded {
        Ok(())
    } else {
        Err(StrataError::General(format!("{dag_id} ended {state}")))
    }
}
