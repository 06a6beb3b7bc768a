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
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::{registry::Target, OverrideError, RedfishClientPool, RedfishError};

/// Applies a target's one-time boot override on its management controller.
#[async_trait::async_trait]
pub trait OverrideApplier: Send + Sync + 'static {
    /// Takes effect on the next boot only. Calling it twice with the same target leaves the
    /// controller in the same state as calling it once.
    async fn apply_override(&self, target: &Target) -> Result<(), OverrideError>;
}

/// Redfish session login, PATCH of the system's `Boot` object, logout.
pub struct RedfishOverrideAdapter {
    pool: RedfishClientPool,
}

impl RedfishOverrideAdapter {
    pub fn new(pool: RedfishClientPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OverrideApplier for RedfishOverrideAdapter {
    async fn apply_override(&self, target: &Target) -> Result<(), OverrideError> {
        let client = self.pool.create_client(target.endpoint());
        let session = client.login().await.map_err(|e| classify(e, Step::Login))?;
        debug!("{}: logged in to {}", target.id, target.base_url);

        let patched = session
            .patch(&target.system_path, target.boot.to_patch())
            .await
            .map_err(|e| classify(e, Step::Patch));

        // Release the session even when the PATCH failed
        if let Err(e) = session.logout().await {
            warn!("{}: logout failed: {e}", target.id);
        }

        let status_code = patched?;
        info!(
            "{}: boot override set to {} (HTTP {status_code})",
            target.id, target.boot
        );
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Step {
    Login,
    Patch,
}

fn classify(err: RedfishError, step: Step) -> OverrideError {
    match err {
        RedfishError::NetworkError { url, source } => OverrideError::Unreachable {
            url,
            reason: source.to_string(),
        },
        RedfishError::ClientBuild(source) => OverrideError::Unreachable {
            url: String::new(),
            reason: source.to_string(),
        },
        RedfishError::HTTPErrorCode { url, status_code }
            if status_code == StatusCode::UNAUTHORIZED || status_code == StatusCode::FORBIDDEN =>
        {
            OverrideError::AuthFailure {
                url,
                reason: format!("HTTP {status_code}"),
            }
        }
        RedfishError::HTTPErrorCode { url, status_code } => OverrideError::RejectedByController {
            url,
            status: status_code.as_u16(),
        },
        RedfishError::MissingHeader { url, header } => OverrideError::AuthFailure {
            url,
            reason: format!("no {header} in login response"),
        },
        RedfishError::JsonSerializeError { url, source, .. } => match step {
            Step::Login => OverrideError::AuthFailure {
                url,
                reason: source.to_string(),
            },
            // 400 is what the BMC would have said about a body it cannot read
            Step::Patch => OverrideError::RejectedByController {
                url,
                status: StatusCode::BAD_REQUEST.as_u16(),
            },
        },
    }
}
