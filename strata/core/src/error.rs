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

//! Strata error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

/// Result type alias for Strata operations.
pub type Result<T> = result::Result<T, StrataError>;

/// Strata error types.
#[derive(Debug)]
pub enum StrataError {
    /// Feature is not yet implemented.
    NotImplemented(String),
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration error with invalid settings.
    Configuration(String),
    /// An event arrived for a state that has no wired transition.
    InvalidTransition {
        /// Entity that received the event, e.g. `attempt_1_1_01_000000_0`.
        entity: String,
        /// State the entity was in.
        state: String,
        /// Event that could not be applied.
        event: String,
    },
    /// An event or request addressed an entity that is not registered.
    UnknownEntity(String),
    /// I/O operation error.
    IoError(io::Error),
    /// Tokio task join error.
    TokioError(tokio::task::JoinError),
    /// Operation was cancelled.
    Cancelled,
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for StrataError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

/// Creates a general Strata error from a string message.
pub fn strata_error(message: &str) -> StrataError {
    StrataError::General(message.to_owned())
}

impl From<String> for StrataError {
    fn from(e: String) -> Self {
        StrataError::General(e)
    }
}

impl From<io::Error> for StrataError {
    fn from(e: io::Error) -> Self {
        StrataError::IoError(e)
    }
}

impl From<tokio::task::JoinError> for StrataError {
    fn from(e: tokio::task::JoinError) -> Self {
        StrataError::TokioError(e)
    }
}

impl Display for StrataError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            StrataError::NotImplemented(desc) => {
                write!(f, "Not implemented: {desc}")
            }
            StrataError::General(desc) => write!(f, "General error: {desc}"),
            StrataError::Internal(desc) => {
                write!(f, "Internal Strata error: {desc}")
            }
            StrataError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            StrataError::InvalidTransition {
                entity,
                state,
                event,
            } => {
                write!(
                    f,
                    "Invalid event {event} on {entity} at current state {state}"
                )
            }
            StrataError::UnknownEntity(desc) => write!(f, "Unknown entity: {desc}"),
            StrataError::IoError(desc) => write!(f, "IO error: {desc}"),
            StrataError::TokioError(desc) => write!(f, "Tokio join error: {desc}"),
            StrataError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl Error for StrataError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message() {
        let err = StrataError::InvalidTransition {
            entity: "task_1_1_00_000000".to_owned(),
            state: "NEW".to_owned(),
            event: "AttemptLaunched".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid event AttemptLaunched on task_1_1_00_000000 at current state NEW"
        );
    }
}
