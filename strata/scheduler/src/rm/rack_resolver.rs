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

pub const DEFAULT_RACK: &str = "/default-rack";

/// Static host to rack topology.
#[derive(Debug, Default)]
pub struct RackResolver {
    racks: HashMap<String, String>,
}

impl RackResolver {
    pub fn new(racks: HashMap<String, String>) -> Self {
        Self { racks }
    }

    /// The rack of `host`, or the default rack for unknown hosts.
    pub fn resolve(&self, host: &str) -> String {
        self.racks
            .get(host)
            .cloned()
            .unwrap_or_else(|| DEFAULT_RACK.to_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_hosts_use_default_rack() {
        let resolver = RackResolver::new(HashMap::from([(
            "host-1".to_owned(),
            "/rack-a".to_owned(),
        )]));
        assert_eq!(resolver.resolve("host-1"), "/rack-a");
        assert_eq!(resolver.resolve("host-9"), DEFAULT_RACK);
    }
}
