//! HTTP transport for the appliance API.
//!
//! Logs in once with form credentials and keeps the session cookie in a jar
//! shared by every request. Commands go out as JSON `POST /data`; exports
//! come back from `GET /data?data=<envelope>` as attachments.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::CONTENT_DISPOSITION;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, trace, warn};

use crate::core::models::BackupId;
use crate::error::{ApiError, ExportError};

use super::client::{Appliance, DownloadTarget};
use super::methods::export_request;
use super::protocol::{Reply, Request};

/// Connection settings for [`HttpSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Scheme, host and port of the appliance, e.g. `https://rp.example:443`
    pub base_url: Url,
    pub username: String,
    pub password: String,
    /// Skip TLS certificate verification
    pub accept_invalid_certs: bool,
    /// Timeout of a command or login request. Export downloads are only
    /// bounded by this between two body chunks.
    pub request_timeout: Duration,
    /// Log full request params and response bodies at TRACE level
    pub log_bodies: bool,
}

/// Authenticated session against one appliance.
pub struct HttpSession {
    base_url: Url,
    data_url: String,
    http: reqwest::Client,
    jar: Arc<Jar>,
    request_timeout: Duration,
    log_bodies: bool,
}

impl HttpSession {
    /// Build the HTTP client and log in. Fails with
    /// [`ApiError::Authentication`] when the appliance hands out no session.
    pub async fn login(config: SessionConfig) -> Result<Self, ApiError> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .connect_timeout(config.request_timeout)
            .build()?;

        if config.accept_invalid_certs {
            warn!(host = %config.base_url, "TLS certificate verification is disabled");
        }

        let root = config.base_url.as_str().trim_end_matches('/').to_string();
        let session = Self {
            data_url: format!("{}/data", root),
            base_url: config.base_url,
            http,
            jar,
            request_timeout: config.request_timeout,
            log_bodies: config.log_bodies,
        };

        let login_url = format!("{}/login", root);
        debug!(url = %login_url, user = %config.username, "Logging in");

        let response = session
            .http
            .post(&login_url)
            .timeout(session.request_timeout)
            .form(&[
                ("username", config.username.as_str()),
                ("password", config.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Authentication(format!(
                "login answered with HTTP {}",
                status
            )));
        }

        if session.jar.cookies(&session.base_url).is_none() {
            return Err(ApiError::Authentication(
                "no session cookie was issued".to_string(),
            ));
        }

        info!(host = %session.base_url, "Logged in");
        Ok(session)
    }

    async fn write_export(
        &self,
        mut response: reqwest::Response,
        path: &Path,
    ) -> Result<(), ExportError> {
        let mut file = tokio::fs::File::create(path).await?;
        loop {
            let chunk = tokio::time::timeout(self.request_timeout, response.chunk())
                .await
                .map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "export download stalled")
                })?
                .map_err(ApiError::from)?;
            let Some(chunk) = chunk else {
                break;
            };
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Appliance for HttpSession {
    async fn invoke(&self, command: &str, params: Value) -> Result<Value, ApiError> {
        let request = Request::new(command, params);
        if self.log_bodies {
            trace!(command, params = %request.params, "POST /data");
        } else {
            debug!(command, "POST /data");
        }

        let response = self
            .http
            .post(&self.data_url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            error!(command, %status, "Request failed");
            return Err(ApiError::Status(status));
        }

        let body: Value = response.json().await?;
        if self.log_bodies {
            trace!(command, %body, "Response");
        }

        Reply::decode(body).into_result().inspect_err(|e| {
            error!(command, error = %e, "Appliance rejected request");
        })
    }

    async fn download_backup(
        &self,
        backup_id: BackupId,
        target: &DownloadTarget,
    ) -> Result<PathBuf, ExportError> {
        let data = serde_json::to_string(&export_request(backup_id)).map_err(ApiError::from)?;
        debug!(backup_id, "GET /data (export)");

        let response = self
            .http
            .get(&self.data_url)
            .query(&[("data", data)])
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status).into());
        }

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_filename)
            .ok_or(ExportError::MissingFilename)?;

        let path = target.claim(&file_name)?;
        info!(backup_id, path = %path.display(), "Exporting backup");

        if let Err(e) = self.write_export(response, &path).await {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %rm, "Could not remove partial export");
            }
            return Err(e);
        }

        Ok(path)
    }
}

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bfilename\*?\s*=\s*(?:UTF-8'')?(?:"([^"]*)"|([^;\s]+))"#)
        .expect("static regex")
});

/// File name from a `Content-Disposition` header value.
pub fn attachment_filename(header: &str) -> Option<String> {
    let caps = FILENAME_RE.captures(header)?;
    let name = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
