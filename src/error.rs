/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */
use std::path::PathBuf;

use reqwest::StatusCode;
use serde::Serialize;

/// Transport-level failures from the Redfish HTTP client.
#[derive(thiserror::Error, Debug)]
pub enum RedfishError {
    #[error("Network error talking to BMC at {url}. {source}")]
    NetworkError { url: String, source: reqwest::Error },

    #[error("HTTP {status_code} at {url}. See debug logs for details.")]
    HTTPErrorCode {
        url: String,
        status_code: StatusCode,
    },

    #[error("Could not serialize request body for {url}. Obj: {object_debug}. {source}")]
    JsonSerializeError {
        url: String,
        object_debug: String,
        source: serde_json::Error,
    },

    #[error("Missing header {header} in response from {url}")]
    MissingHeader { header: String, url: String },

    #[error("Could not build HTTP client. {0}")]
    ClientBuild(reqwest::Error),
}

/// The target registry could not be built. Raised before any BMC is contacted.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("[{section}]: missing required field {field}")]
    MissingField { section: String, field: String },

    #[error("[{section}]: environment variable {var} is not set")]
    MissingEnv { section: String, var: String },

    #[error("[{section}]: invalid value for {field}: {reason}")]
    InvalidValue {
        section: String,
        field: String,
        reason: String,
    },

    #[error("Duplicate target id {0}")]
    DuplicateTarget(String),

    #[error("No targets configured")]
    NoTargets,
}

/// Why a single target's boot override was not applied.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum OverrideError {
    #[error("authentication to {url} failed: {reason}")]
    AuthFailure { url: String, reason: String },

    #[error("{url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("{url} rejected the request with HTTP {status}")]
    RejectedByController { url: String, status: u16 },

    #[error("override task did not finish: {reason}")]
    TaskFailed { reason: String },
}

impl OverrideError {
    /// Short name of the variant, as shown in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            OverrideError::AuthFailure { .. } => "AuthFailure",
            OverrideError::Unreachable { .. } => "Unreachable",
            OverrideError::RejectedByController { .. } => "RejectedByController",
            OverrideError::TaskFailed { .. } => "TaskFailed",
        }
    }
}

/// Failures of the fleet power-cycle sequence.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum PowerCycleError {
    /// Best-effort hygiene step. Never aborts the sequence.
    #[error("could not clear known hosts file {path}: {reason}")]
    KnownHostsClearFailed { path: PathBuf, reason: String },

    #[error("shutdown command {command} failed: {reason}")]
    ShutdownFailed { command: String, reason: String },

    #[error("settle delay interrupted by run timeout after {elapsed_ms}ms")]
    SettleInterrupted { elapsed_ms: u64 },

    /// The fleet was shut down but did not come back up.
    #[error("power-up command {command} failed after shutdown: {reason}")]
    PowerUpFailed { command: String, reason: String },
}

impl PowerCycleError {
    /// Whether this error stops the remaining power-cycle steps.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PowerCycleError::KnownHostsClearFailed { .. })
    }
}
