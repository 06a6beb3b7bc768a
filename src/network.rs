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
use std::time::Duration;

use reqwest::{
    header::HeaderMap, header::HeaderValue, header::ACCEPT, header::CONTENT_TYPE,
    header::LOCATION, Client as HttpClient, ClientBuilder as HttpClientBuilder, Method,
    StatusCode,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::session::SessionCredentials;
pub use crate::RedfishError;

pub const REDFISH_ENDPOINT: &str = "redfish/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const SESSIONS: &str = "SessionService/Sessions";
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Debug)]
pub struct RedfishClientPoolBuilder {
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl RedfishClientPoolBuilder {
    /// Prevents the Redfish Client from accepting self signed certificates
    /// and other invalid certificates.
    ///
    /// By default self signed certificates will be accepted, since BMCs usually
    /// use those.
    pub fn reject_invalid_certs(mut self) -> RedfishClientPoolBuilder {
        self.accept_invalid_certs = false;
        self
    }

    /// Overwrites the timeout that will be applied to every request
    pub fn timeout(mut self, timeout: Duration) -> RedfishClientPoolBuilder {
        self.timeout = timeout;
        self
    }

    pub fn build(&self) -> Result<RedfishClientPool, RedfishError> {
        let http_client = HttpClientBuilder::new()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .timeout(self.timeout)
            .build()
            .map_err(RedfishError::ClientBuild)?;
        Ok(RedfishClientPool { http_client })
    }
}

/// The management controller a client connects to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Endpoint {
    /// Scheme and authority of the BMC, e.g. `https://hpv2-ilo` or `https://10.0.0.5:8443`
    pub base_url: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RedfishClientPool {
    http_client: HttpClient,
}

impl RedfishClientPool {
    /// Returns Builder for configuring a Redfish HTTP connection pool
    pub fn builder() -> RedfishClientPoolBuilder {
        RedfishClientPoolBuilder {
            timeout: DEFAULT_TIMEOUT,
            // BMCs often have a self-signed cert, so usually this has to be true
            accept_invalid_certs: true,
        }
    }

    /// Creates a Redfish client for a single endpoint. No request is made until login.
    pub fn create_client(&self, endpoint: Endpoint) -> RedfishHttpClient {
        RedfishHttpClient::new(self.http_client.clone(), endpoint)
    }
}

/// A HTTP client which targets a single BMC
pub struct RedfishHttpClient {
    endpoint: Endpoint,
    http_client: HttpClient,
}

impl RedfishHttpClient {
    pub fn new(http_client: HttpClient, endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            http_client,
        }
    }

    fn base(&self) -> &str {
        self.endpoint.base_url.trim_end_matches('/')
    }

    /// Full URL of a path relative to the Redfish service root.
    pub fn url(&self, api: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base(),
            REDFISH_ENDPOINT,
            api.trim_start_matches('/')
        )
    }

    /// Create a Redfish session. The returned session must be closed with `logout`.
    pub async fn login(&self) -> Result<Session<'_>, RedfishError> {
        let url = self.url(SESSIONS);
        let creds = SessionCredentials {
            user_name: self.endpoint.user.clone(),
            password: self.endpoint.password.clone(),
        };
        let (_status_code, headers) = self
            .req(Method::POST, &url, Some(creds), None, true)
            .await?;

        let token = headers
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RedfishError::MissingHeader {
                header: AUTH_TOKEN_HEADER.to_string(),
                url: url.clone(),
            })?
            .to_string();
        // iLO returns an absolute path, some BMCs a full URL
        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|l| {
                if l.starts_with("http://") || l.starts_with("https://") {
                    l.to_string()
                } else {
                    format!("{}/{}", self.base(), l.trim_start_matches('/'))
                }
            });
        if location.is_none() {
            warn!("BMC at {url} did not return a session Location, session cannot be deleted");
        }
        Ok(Session {
            client: self,
            token,
            location,
        })
    }

    // All the HTTP requests happen from here.
    async fn req<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<B>,
        token: Option<&str>,
        redact_body: bool,
    ) -> Result<(StatusCode, HeaderMap), RedfishError>
    where
        B: Serialize + ::std::fmt::Debug,
    {
        let body_enc = match body {
            Some(b) => {
                let body_enc =
                    serde_json::to_string(&b).map_err(|e| RedfishError::JsonSerializeError {
                        url: url.to_string(),
                        object_debug: format!("{b:?}"),
                        source: e,
                    })?;
                Some(body_enc)
            }
            None => None,
        };
        debug!(
            "TX {} {} {}",
            method,
            url,
            if redact_body {
                "<redacted>"
            } else {
                body_enc.as_deref().unwrap_or_default()
            }
        );

        let mut req_b = match method {
            Method::POST => self.http_client.post(url),
            Method::PATCH => self.http_client.patch(url),
            Method::DELETE => self.http_client.delete(url),
            _ => unreachable!("Only POST, PATCH and DELETE http methods are used."),
        };
        req_b = req_b
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(t) = token {
            req_b = req_b.header(AUTH_TOKEN_HEADER, t);
        }
        if let Some(b) = body_enc {
            req_b = req_b.body(b);
        }
        let response = req_b.send().await.map_err(|e| RedfishError::NetworkError {
            url: url.to_string(),
            source: e,
        })?;
        let status_code = response.status();
        let headers = response.headers().clone();
        // read the body even if not status 2XX, because BMCs give useful error messages as JSON
        let response_body = response
            .text()
            .await
            .map_err(|e| RedfishError::NetworkError {
                url: url.to_string(),
                source: e,
            })?;
        if !response_body.is_empty() && !redact_body {
            debug!("RX {status_code} {response_body}");
        } else {
            debug!("RX {status_code}");
        }

        if !status_code.is_success() {
            return Err(RedfishError::HTTPErrorCode {
                url: url.to_string(),
                status_code,
            });
        }
        Ok((status_code, headers))
    }
}

/// An authenticated Redfish session on one BMC
pub struct Session<'a> {
    client: &'a RedfishHttpClient,
    token: String,
    location: Option<String>,
}

impl Session<'_> {
    /// Partial update of a resource relative to the service root
    pub async fn patch<T>(&self, api: &str, data: T) -> Result<StatusCode, RedfishError>
    where
        T: Serialize + ::std::fmt::Debug,
    {
        let url = self.client.url(api);
        let (status_code, _headers) = self
            .client
            .req(Method::PATCH, &url, Some(data), Some(&self.token), false)
            .await?;
        Ok(status_code)
    }

    /// Delete the session on the BMC
    pub async fn logout(self) -> Result<(), RedfishError> {
        let Some(url) = self.location.as_deref() else {
            return Ok(());
        };
        self.client
            .req::<()>(Method::DELETE, url, None, Some(&self.token), false)
            .await
            .map(|_| ())
    }
}
