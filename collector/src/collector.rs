// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use crash_info::CrashInfo;
use futures::stream::StreamExt;
use log::{debug, info};
use reqwest::{Client, StatusCode};
use reqwest_retry::{RetryPolicy, SendRetry};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::auth::AuthToken;
use crate::config::CollectorConfig;
use crate::http::ResponseExt;
use crate::sigcache::refresh_signature_cache;
use crate::testcase::TestCase;

pub const CRASHES_PATH: &str = "crashmanager/rest/crashes/";
pub const SIGNATURES_PATH: &str = "crashmanager/files/signatures.zip";

/// User name for basic auth on the signature download endpoint.
const SIGNATURES_USER: &str = "fuzzmanager";

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Must specify {name} (configuration property: {property}) to use remote features.")]
    MissingRemoteSetting {
        name: &'static str,
        property: &'static str,
    },

    #[error("Must specify sigCacheDir (configuration property: sigdir) to use signatures.")]
    MissingSigCacheDir,

    #[error("Server unexpectedly responded with status code {}: {body}", .status.as_u16())]
    ServerError { status: StatusCode, body: String },
}

struct Remote<'a> {
    token: &'a AuthToken,
    tool: &'a str,
}

/// Client for the crash management server and the local signature cache.
pub struct Collector {
    config: CollectorConfig,
    client: Client,
    retry: RetryPolicy,
}

impl Collector {
    /// Uses the configuration as given. See [`Collector::from_global_config`]
    /// to fill in values from `~/.fuzzmanagerconf`.
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("unable to build HTTP client")?;

        Ok(Self {
            config,
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_global_config(overrides: CollectorConfig) -> Result<Self> {
        Self::new(overrides.resolve()?)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    fn remote(&self) -> Result<Remote<'_>, CollectorError> {
        if self.config.server_host.is_none() {
            return Err(CollectorError::MissingRemoteSetting {
                name: "serverHost",
                property: "serverhost",
            });
        }

        let token = self.config.server_auth_token.as_ref().ok_or(
            CollectorError::MissingRemoteSetting {
                name: "serverAuthToken",
                property: "serverauthtoken",
            },
        )?;

        let tool = self
            .config
            .tool
            .as_deref()
            .ok_or(CollectorError::MissingRemoteSetting {
                name: "tool",
                property: "tool",
            })?;

        Ok(Remote { token, tool })
    }

    fn sig_cache_dir(&self) -> Result<&Path, CollectorError> {
        self.config
            .sig_cache_dir
            .as_deref()
            .ok_or(CollectorError::MissingSigCacheDir)
    }

    /// Form fields describing one crash, in the layout expected by the crash
    /// submission endpoint.
    pub fn submission_form(
        &self,
        crash_info: &CrashInfo,
        testcase: Option<&TestCase>,
        testcase_quality: i64,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<(&'static str, String)>> {
        let remote = self.remote()?;
        let configuration = &crash_info.configuration;

        let mut form = vec![
            ("rawStdout", crash_info.raw_stdout.join("\n")),
            ("rawStderr", crash_info.raw_stderr.join("\n")),
            ("rawCrashData", crash_info.raw_crash_data.join("\n")),
        ];

        if let Some(testcase) = testcase {
            form.push(("testcase", testcase.encoded()));
            form.push(("testcase_isbinary", testcase.is_binary.to_string()));
            form.push(("testcase_quality", testcase_quality.to_string()));
            form.push((
                "testcase_ext",
                testcase.extension().unwrap_or_default().to_string(),
            ));
        }

        form.push(("platform", configuration.platform.clone()));
        form.push(("product", configuration.product.clone()));
        form.push(("os", configuration.os.clone()));

        if let Some(version) = &configuration.version {
            form.push(("product_version", version.clone()));
        }

        form.push(("client", self.config.client_id.clone().unwrap_or_default()));
        form.push(("tool", remote.tool.to_string()));

        let mut all_metadata = configuration.metadata.clone();
        if let Some(metadata) = metadata {
            all_metadata.extend(metadata.clone());
        }
        if !all_metadata.is_empty() {
            form.push(("metadata", serde_json::to_string(&all_metadata)?));
        }

        if !configuration.env.is_empty() {
            form.push(("env", serde_json::to_string(&configuration.env)?));
        }

        if !configuration.args.is_empty() {
            form.push(("args", serde_json::to_string(&configuration.args)?));
        }

        Ok(form)
    }

    /// Submits a crash, optionally with the test case that triggered it.
    pub async fn submit(
        &self,
        crash_info: &CrashInfo,
        testcase: Option<&TestCase>,
        testcase_quality: i64,
        metadata: Option<&BTreeMap<String, String>>,
    ) -> Result<()> {
        let remote = self.remote()?;
        let form = self.submission_form(crash_info, testcase, testcase_quality, metadata)?;
        let url = self.config.server_url(CRASHES_PATH)?;
        info!("submitting crash to {}", url);

        self.client
            .post(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", remote.token.expose_ref()),
            )
            .form(&form)
            .send_retry(&self.retry)
            .await
            .context("crash submission failed")?
            .expect_status(StatusCode::CREATED)
            .await?;

        Ok(())
    }

    /// Downloads the server's signature archive and replaces the local
    /// signature cache with it.
    pub async fn refresh(&self) -> Result<()> {
        let remote = self.remote()?;
        let sig_dir = self.sig_cache_dir()?.to_path_buf();
        let url = self.config.server_url(SIGNATURES_PATH)?;
        info!("downloading signatures from {}", url);

        let response = self
            .client
            .get(url)
            .basic_auth(SIGNATURES_USER, Some(remote.token.expose_ref()))
            .send_retry(&self.retry)
            .await
            .context("signature download failed")?
            .expect_status(StatusCode::OK)
            .await?;

        let download = tempfile::Builder::new()
            .prefix("fuzzmanager-signatures")
            .suffix(".zip")
            .tempfile()
            .context("unable to create temporary file for signatures")?;

        let mut file = tokio::fs::File::create(download.path()).await?;
        let mut stream = response.bytes_stream();
        let mut size = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("signature download interrupted")?;
            size += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        debug!("downloaded {} bytes to {}", size, download.path().display());

        let zip_path = download.path().to_path_buf();
        tokio::task::spawn_blocking(move || refresh_signature_cache(sig_dir, zip_path))
            .await??;

        Ok(())
    }

    /// Replaces the local signature cache with the contents of a local zip
    /// archive.
    pub fn refresh_from_zip(&self, zip_path: impl AsRef<Path>) -> Result<()> {
        let sig_dir = self.sig_cache_dir()?;
        refresh_signature_cache(sig_dir, zip_path)
    }
}
