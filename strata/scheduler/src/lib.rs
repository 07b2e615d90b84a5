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


#![doc = include_str ! ("../README.md")]
/// Shared state of the application master.
pub mod app_context;
/// Scheduler configuration options.
pub mod config;
/// DAG, vertex, task and attempt state machines and data routing.
pub mod dag;
/// Application master wiring and DAG submission.
pub mod dag_app_master;
/// Category based event dispatching.
pub mod dispatcher;
/// Events exchanged between the state machines.
pub mod event;
/// Liveness tracking of containers and attempts.
pub mod heartbeat;
/// Metrics collection and reporting.
pub mod metrics;
/// DAG plans as submitted by clients.
pub mod plan;
/// Container requests, containers and nodes.
pub mod rm;
/// Speculative execution of straggling tasks.
pub mod speculate;
/// In-process cluster for standalone runs.
pub mod standalone;
/// The surface running tasks talk to.
pub mod task_comm;

/// Test utilities for scheduler testing.
#[cfg(test)]
pub mod test_utils;
