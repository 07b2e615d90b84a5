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

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A resource shape: what a task asks for and what a container offers.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Resource {
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// Virtual cores.
    pub vcores: u32,
}

impl Resource {
    /// Creates a resource shape.
    pub fn new(memory_mb: u64, vcores: u32) -> Self {
        Self { memory_mb, vcores }
    }

    /// Whether a request of shape `self` fits into `other`.
    pub fn fits_in(&self, other: &Resource) -> bool {
        self.memory_mb <= other.memory_mb && self.vcores <= other.vcores
    }

    /// Component-wise sum.
    pub fn add(&self, other: &Resource) -> Resource {
        Resource {
            memory_mb: self.memory_mb + other.memory_mb,
            vcores: self.vcores + other.vcores,
        }
    }

    /// Component-wise difference, saturating at zero.
    pub fn saturating_sub(&self, other: &Resource) -> Resource {
        Resource {
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
            vcores: self.vcores.saturating_sub(other.vcores),
        }
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<memory:{}, vCores:{}>", self.memory_mb, self.vcores)
    }
}

/// Container request priority. A lower number is a higher priority.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Priority(pub u32);

impl Priority {
    /// Whether `self` should be served before `other`.
    pub fn is_higher_than(&self, other: &Priority) -> bool {
        self.0 < other.0
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_arithmetic() {
        let small = Resource::new(512, 1);
        let large = Resource::new(2048, 2);
        assert!(small.fits_in(&large));
        assert!(!large.fits_in(&small));
        assert_eq!(small.add(&large), Resource::new(2560, 3));
        assert_eq!(small.saturating_sub(&large), Resource::new(0, 0));
        assert!(Priority(3).is_higher_than(&Priority(6)));
    }
}
