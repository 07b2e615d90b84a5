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


//! Strata scheduler specific configuration

use std::collections::HashMap;

use strata_core::error::{Result, StrataError};

use crate::plan::{DagPlan, DataMovementType, VertexPlan};

/// Configuration of the application
#[cfg(feature = "build-binary")]
#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(
        long = "vertex",
        help = "A vertex of the DAG to run, of the form 'name=parallelism'. May be repeated"
    )]
    pub vertices: Vec<String>,
    #[arg(
        long = "edge",
        help = "An edge of the DAG to run, of the form 'source->destination:type' where type is one of one-to-one, broadcast, scatter-gather. May be repeated"
    )]
    pub edges: Vec<String>,
    #[arg(long, default_value_t = String::from("strata-dag"), help = "Name of the DAG. Default: strata-dag")]
    pub dag_name: String,
    #[arg(
        long,
        default_value_t = 4,
        help = "Number of nodes in the standalone cluster. Default: 4"
    )]
    pub cluster_nodes: u32,
    #[arg(
        long,
        default_value_t = 4,
        help = "Containers each standalone node can host at once. Default: 4"
    )]
    pub containers_per_node: u32,
    #[arg(
        long,
        default_value_t = 200,
        help = "Simulated duration of a task attempt in milliseconds. Default: 200"
    )]
    pub task_duration_ms: u64,
    #[arg(
        long,
        default_value_t = 10000,
        help = "Event loop buffer size. Default: 10000"
    )]
    pub event_loop_buffer_size: u32,
    #[arg(
        long,
        default_value_t = 4,
        help = "Maximum number of attempts of a task before it fails. Default: 4"
    )]
    pub max_task_attempts: u32,
    #[arg(
        long,
        default_value_t = 3,
        help = "Failed attempts on a node before it is blacklisted. Default: 3"
    )]
    pub max_task_failures_per_node: u32,
    #[arg(
        long,
        default_value_t = 33,
        allow_hyphen_values = true,
        help = "Blacklisting is suspended while this percentage of the cluster is blacklisted, -1 never suspends it. Default: 33"
    )]
    pub blacklist_disable_percent: i32,
    #[arg(
        long,
        default_value_t = 0.25,
        help = "Fraction of source tasks that must complete before consumer tasks start. Default: 0.25"
    )]
    pub slow_start_min_src_fraction: f32,
    #[arg(
        long,
        default_value_t = 0.75,
        help = "Fraction of source tasks past which all consumer tasks start. Default: 0.75"
    )]
    pub slow_start_max_src_fraction: f32,
    #[arg(
        long,
        default_value_t = false,
        help = "Launch duplicate attempts for straggling tasks. Default: false"
    )]
    pub speculation_enabled: bool,
    #[arg(
        long,
        default_value_t = 0.1,
        help = "Cap of simultaneous speculative attempts as a ratio of running tasks. Default: 0.1"
    )]
    pub speculative_running_task_ratio: f64,
    #[arg(
        long,
        help = "Host to rack mapping entries of the form 'host=/rack'. May be repeated"
    )]
    pub host_rack: Vec<String>,
    #[arg(
        long,
        help = "Log dir: a path to save log. This will create a new storage directory at the specified path if it does not already exist."
    )]
    pub log_dir: Option<String>,
    #[arg(
        long,
        default_value_t = true,
        help = "Enable print thread ids and names in log file."
    )]
    pub print_thread_info: bool,
    #[arg(
        long,
        default_value_t = String::from("INFO"),
        help = "special log level for sub mod. For example we want whole level is INFO but strata_scheduler::dag is DEBUG"
    )]
    pub log_level_setting: String,
    #[arg(
        long,
        default_value_t = strata_core::config::LogRotationPolicy::Daily,
        help = "Tracing log rotation policy, possible values: minutely, hourly, daily, never. Default: daily"
    )]
    pub log_rotation_policy: strata_core::config::LogRotationPolicy,
}

/// Configurations for the strata scheduler of scheduling DAGs and tasks
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// The event loop buffer size. for a system of high throughput, a larger value like 1000000 is recommended
    pub event_loop_buffer_size: u32,
    /// Attempts a task may use before it is failed
    pub max_task_attempts: u32,
    /// Failed attempts on one node before the node is blacklisted
    pub max_task_failures_per_node: u32,
    /// Whether nodes are blacklisted at all
    pub node_blacklisting_enabled: bool,
    /// Blacklisting is ignored while at least this percentage of cluster nodes is blacklisted.
    /// -1 means never ignore.
    pub blacklist_disable_percent: i32,
    /// Source completion fraction at which consumer tasks begin to start
    pub slow_start_min_src_fraction: f32,
    /// Source completion fraction past which every consumer task is started
    pub slow_start_max_src_fraction: f32,
    /// Whether the speculator runs
    pub speculation_enabled: bool,
    /// Speculative attempt cap as a ratio of running tasks
    pub speculative_running_task_ratio: f64,
    /// Speculative attempt cap as a ratio of all tasks
    pub speculative_total_task_ratio: f64,
    /// Lower bound of the speculative attempt cap
    pub min_allowed_speculative_tasks: u32,
    /// An attempt is slow once its estimated runtime exceeds the vertex mean by this ratio
    pub speculation_slow_task_threshold: f64,
    /// Delay before the next scan when the last scan speculated nothing
    pub speculation_interval_no_speculate_ms: u64,
    /// Delay before the next scan when the last scan speculated something
    pub speculation_interval_after_speculate_ms: u64,
    /// Whether containers are reused across attempts
    pub container_reuse_enabled: bool,
    /// Whether a held container may be reused for a rack-local request
    pub container_reuse_rack_fallback: bool,
    /// Whether a held container may be reused for any request
    pub container_reuse_non_local_fallback: bool,
    /// How long an unused container is held before release. 0 releases immediately
    pub container_idle_release_timeout_ms: u64,
    /// Running attempts and containers that do not heartbeat for this long are timed out
    pub task_heartbeat_timeout_ms: u64,
    /// Interval of the heartbeat expiry check
    pub heartbeat_check_interval_ms: u64,
    /// Fetch failure notifications about one producer attempt before it is failed
    pub max_fetch_failure_notifications: u32,
    /// Distinct consumers reporting an output failure before the producer is failed
    pub max_allowed_output_failures: u32,
    /// Fraction of consumers reporting an output failure before the producer is failed
    pub max_allowed_output_failures_fraction: f32,
    /// Interval of the periodic scheduler tick (held container expiry and preemption)
    pub scheduler_tick_interval_ms: u64,
    /// Host to rack topology
    pub host_racks: HashMap<String, String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_loop_buffer_size: 10000,
            max_task_attempts: 4,
            max_task_failures_per_node: 3,
            node_blacklisting_enabled: true,
            blacklist_disable_percent: 33,
            slow_start_min_src_fraction: 0.25,
            slow_start_max_src_fraction: 0.75,
            speculation_enabled: false,
            speculative_running_task_ratio: 0.1,
            speculative_total_task_ratio: 0.01,
            min_allowed_speculative_tasks: 10,
            speculation_slow_task_threshold: 0.25,
            speculation_interval_no_speculate_ms: 1000,
            speculation_interval_after_speculate_ms: 15000,
            container_reuse_enabled: true,
            container_reuse_rack_fallback: true,
            container_reuse_non_local_fallback: false,
            container_idle_release_timeout_ms: 0,
            task_heartbeat_timeout_ms: 300_000,
            heartbeat_check_interval_ms: 1000,
            max_fetch_failure_notifications: 3,
            max_allowed_output_failures: 10,
            max_allowed_output_failures_fraction: 0.1,
            scheduler_tick_interval_ms: 1000,
            host_racks: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_event_loop_buffer_size(mut self, buffer_size: u32) -> Self {
        self.event_loop_buffer_size = buffer_size;
        self
    }

    pub fn with_max_task_attempts(mut self, attempts: u32) -> Self {
        self.max_task_attempts = attempts;
        self
    }

    pub fn with_max_task_failures_per_node(mut self, failures: u32) -> Self {
        self.max_task_failures_per_node = failures;
        self
    }

    pub fn with_node_blacklisting(mut self, enabled: bool) -> Self {
        self.node_blacklisting_enabled = enabled;
        self
    }

    pub fn with_blacklist_disable_percent(mut self, percent: i32) -> Self {
        self.blacklist_disable_percent = percent;
        self
    }

    pub fn with_slow_start_fractions(mut self, min: f32, max: f32) -> Self {
        self.slow_start_min_src_fraction = min;
        self.slow_start_max_src_fraction = max;
        self
    }

    pub fn with_speculation(mut self, enabled: bool) -> Self {
        self.speculation_enabled = enabled;
        self
    }

    pub fn with_speculative_running_task_ratio(mut self, ratio: f64) -> Self {
        self.speculative_running_task_ratio = ratio;
        self
    }

    pub fn with_container_reuse(
        mut self,
        enabled: bool,
        rack_fallback: bool,
        non_local_fallback: bool,
    ) -> Self {
        self.container_reuse_enabled = enabled;
        self.container_reuse_rack_fallback = rack_fallback;
        self.container_reuse_non_local_fallback = non_local_fallback;
        self
    }

    pub fn with_container_idle_release_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.container_idle_release_timeout_ms = timeout_ms;
        self
    }

    pub fn with_task_heartbeat_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.task_heartbeat_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_fetch_failure_notifications(mut self, notifications: u32) -> Self {
        self.max_fetch_failure_notifications = notifications;
        self
    }

    pub fn with_scheduler_tick_interval_ms(mut self, interval_ms: u64) -> Self {
        self.scheduler_tick_interval_ms = interval_ms;
        self
    }

    pub fn with_host_rack(mut self, host: impl Into<String>, rack: impl Into<String>) -> Self {
        self.host_racks.insert(host.into(), rack.into());
        self
    }

    /// Checks option ranges that cannot be expressed in their types.
    pub fn validate(&self) -> Result<()> {
        let min = self.slow_start_min_src_fraction;
        let max = self.slow_start_max_src_fraction;
        if !(0.0..=1.0).contains(&min) || !(0.0..=1.0).contains(&max) || min > max {
            return Err(StrataError::Configuration(format!(
                "slow start fractions must satisfy 0 <= min <= max <= 1, got min={min} max={max}"
            )));
        }
        if self.blacklist_disable_percent != -1
            && !(0..=100).contains(&self.blacklist_disable_percent)
        {
            return Err(StrataError::Configuration(format!(
                "blacklist_disable_percent must be -1 or within 0..=100, got {}",
                self.blacklist_disable_percent
            )));
        }
        if self.max_task_attempts == 0 {
            return Err(StrataError::Configuration(
                "max_task_attempts must be at least 1".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_allowed_output_failures_fraction) {
            return Err(StrataError::Configuration(format!(
                "max_allowed_output_failures_fraction must be within 0..=1, got {}",
                self.max_allowed_output_failures_fraction
            )));
        }
        if self.event_loop_buffer_size == 0 {
            return Err(StrataError::Configuration(
                "event_loop_buffer_size must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Parses a `host=/rack` mapping entry.
pub fn parse_host_rack(entry: &str) -> Result<(String, String)> {
    match entry.split_once('=') {
        Some((host, rack)) if !host.is_empty() && rack.starts_with('/') => {
            Ok((host.to_owned(), rack.to_owned()))
        }
        _ => Err(StrataError::Configuration(format!(
            "invalid host to rack mapping '{entry}', expected 'host=/rack'"
        ))),
    }
}

/// Parses a `name=parallelism` vertex entry.
pub fn parse_vertex(entry: &str) -> Result<VertexPlan> {
    let parsed = entry
        .split_once('=')
        .and_then(|(name, parallelism)| Some((name, parallelism.parse::<u32>().ok()?)));
    match parsed {
        Some((name, parallelism)) if !name.is_empty() => Ok(VertexPlan::new(name, parallelism)),
        _ => Err(StrataError::Configuration(format!(
            "invalid vertex '{entry}', expected 'name=parallelism'"
        ))),
    }
}

/// Parses a `source->destination:type` edge entry.
pub fn parse_edge(entry: &str) -> Result<(String, String, DataMovementType)> {
    let invalid = || {
        StrataError::Configuration(format!(
            "invalid edge '{entry}', expected 'source->destination:type'"
        ))
    };
    let (vertices, data_movement) = entry.rsplit_once(':').ok_or_else(invalid)?;
    let (source, destination) = vertices.split_once("->").ok_or_else(invalid)?;
    if source.is_empty() || destination.is_empty() {
        return Err(invalid());
    }
    let data_movement = data_movement
        .parse::<DataMovementType>()
        .map_err(StrataError::Configuration)?;
    Ok((source.to_owned(), destination.to_owned(), data_movement))
}

/// Builds the plan described by repeated vertex and edge entries.
pub fn parse_dag_plan(name: &str, vertices: &[String], edges: &[String]) -> Result<DagPlan> {
    let mut plan = DagPlan::new(name);
    for entry in vertices {
        plan = plan.add_vertex(parse_vertex(entry)?);
    }
    for entry in edges {
        let (source, destination, data_movement) = parse_edge(entry)?;
        plan = plan.add_edge(source, destination, data_movement);
    }
    Ok(plan)
}

#[cfg(feature = "build-binary")]
impl TryFrom<Config> for SchedulerConfig {
    type Error = StrataError;

    fn try_from(opt: Config) -> Result<Self> {
        let mut config = SchedulerConfig::default()
            .with_event_loop_buffer_size(opt.event_loop_buffer_size)
            .with_max_task_attempts(opt.max_task_attempts)
            .with_max_task_failures_per_node(opt.max_task_failures_per_node)
            .with_blacklist_disable_percent(opt.blacklist_disable_percent)
            .with_slow_start_fractions(
                opt.slow_start_min_src_fraction,
                opt.slow_start_max_src_fraction,
            )
            .with_speculation(opt.speculation_enabled)
            .with_speculative_running_task_ratio(opt.speculative_running_task_ratio);
        for entry in &opt.host_rack {
            let (host, rack) = parse_host_rack(entry)?;
            config = config.with_host_rack(host, rack);
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_is_valid() -> Result<()> {
        SchedulerConfig::default().validate()
    }

    #[test]
    fn rejects_inverted_slow_start_fractions() {
        let config = SchedulerConfig::default().with_slow_start_fractions(0.8, 0.2);
        assert!(matches!(
            config.validate(),
            Err(StrataError::Configuration(_))
        ));
    }

    #[test]
    fn blacklist_percent_accepts_disabled_marker() {
        assert!(SchedulerConfig::default()
            .with_blacklist_disable_percent(-1)
            .validate()
            .is_ok());
        assert!(SchedulerConfig::default()
            .with_blacklist_disable_percent(-2)
            .validate()
            .is_err());
        assert!(SchedulerConfig::default()
            .with_blacklist_disable_percent(101)
            .validate()
            .is_err());
    }

    #[test]
    fn parses_dag_plan_entries() -> Result<()> {
        let plan = parse_dag_plan(
            "wordcount",
            &["map=4".to_owned(), "reduce=2".to_owned()],
            &["map->reduce:scatter-gather".to_owned()],
        )?;
        assert_eq!(plan.vertices[1].parallelism, 2);
        assert_eq!(
            plan.edges[0].property.data_movement,
            DataMovementType::ScatterGather
        );
        assert!(parse_vertex("map").is_err());
        assert!(parse_vertex("map=-1").is_err());
        assert!(parse_edge("map->reduce").is_err());
        assert!(parse_edge("->reduce:broadcast").is_err());
        assert!(parse_edge("map->reduce:shuffle").is_err());
        Ok(())
    }

    #[test]
    fn parses_host_rack_entries() -> Result<()> {
        assert_eq!(
            parse_host_rack("host-1=/rack-a")?,
            ("host-1".to_owned(), "/rack-a".to_owned())
        );
        assert!(parse_host_rack("host-1").is_err());
        assert!(parse_host_rack("host-1=rack-a").is_err());
        Ok(())
    }
}
