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

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Aggregate counters kept by a DAG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DagCounter {
    /// Tasks that succeeded.
    NumSucceededTasks,
    /// Attempts that ended FAILED.
    NumFailedTasks,
    /// Attempts that ended KILLED.
    NumKilledTasks,
    /// Attempts that started running.
    TotalLaunchedTasks,
    /// Attempts that ran on a host named by their location hint.
    DataLocalTasks,
    /// Attempts that ran on a rack named by, or resolved from, their location hint.
    RackLocalTasks,
    /// Attempts with a location hint that ran elsewhere.
    OtherLocalTasks,
}

impl DagCounter {
    /// Upper-case counter name.
    pub fn name(&self) -> &'static str {
        match self {
            DagCounter::NumSucceededTasks => "NUM_SUCCEEDED_TASKS",
            DagCounter::NumFailedTasks => "NUM_FAILED_TASKS",
            DagCounter::NumKilledTasks => "NUM_KILLED_TASKS",
            DagCounter::TotalLaunchedTasks => "TOTAL_LAUNCHED_TASKS",
            DagCounter::DataLocalTasks => "DATA_LOCAL_TASKS",
            DagCounter::RackLocalTasks => "RACK_LOCAL_TASKS",
            DagCounter::OtherLocalTasks => "OTHER_LOCAL_TASKS",
        }
    }
}

/// A set of counters. Missing counters read as zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Counters {
    values: BTreeMap<DagCounter, u64>,
}

impl Counters {
    /// Adds `by` to `counter`.
    pub fn increment(&mut self, counter: DagCounter, by: u64) {
        *self.values.entry(counter).or_default() += by;
    }

    /// Current value of `counter`.
    pub fn get(&self, counter: DagCounter) -> u64 {
        self.values.get(&counter).copied().unwrap_or_default()
    }

    /// Applies a batch of increments.
    pub fn apply(&mut self, updates: &[(DagCounter, u64)]) {
        for (counter, by) in updates {
            self.increment(*counter, *by);
        }
    }
}

impl Display for Counters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(counter, value)| format!("{}={value}", counter.name()))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut counters = Counters::default();
        counters.apply(&[
            (DagCounter::TotalLaunchedTasks, 1),
            (DagCounter::DataLocalTasks, 1),
        ]);
        counters.increment(DagCounter::TotalLaunchedTasks, 2);
        assert_eq!(counters.get(DagCounter::TotalLaunchedTasks), 3);
        assert_eq!(counters.get(DagCounter::NumFailedTasks), 0);
        assert_eq!(
            counters.to_string(),
            "[TOTAL_LAUNCHED_TASKS=3, DATA_LOCAL_TASKS=1]"
        );
    }
}
