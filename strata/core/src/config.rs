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

//! Configuration enums shared between crates and the command line.

// an enum used to configure the log rolling policy
#[derive(Clone, Copy, Debug, serde::Deserialize, Default)]
#[cfg_attr(feature = "build-binary", derive(clap::ValueEnum))]
pub enum LogRotationPolicy {
    /// Roll every minute.
    Minutely,
    /// Roll every hour.
    Hourly,
    /// Roll every day.
    Daily,
    /// Single file, never rolled.
    #[default]
    Never,
}

impl std::fmt::Display for LogRotationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogRotationPolicy::Minutely => "minutely",
            LogRotationPolicy::Hourly => "hourly",
            LogRotationPolicy::Daily => "daily",
            LogRotationPolicy::Never => "never",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for LogRotationPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minutely" => Ok(LogRotationPolicy::Minutely),
            "hourly" => Ok(LogRotationPolicy::Hourly),
            "daily" => Ok(LogRotationPolicy::Daily),
            "never" => Ok(LogRotationPolicy::Never),
            other => Err(format!("Unknown log rotation policy: {other}")),
        }
    }
}
