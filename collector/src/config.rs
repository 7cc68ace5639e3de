// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crash_info::config_files::Section;
use crash_info::ConfigurationFiles;
use log::debug;
use url::Url;

use crate::auth::{read_token_file, AuthToken};
use crate::machine_id::get_machine_name;

pub const CONFIG_FILE_NAME: &str = ".fuzzmanagerconf";

pub const DEFAULT_PROTOCOL: &str = "https";
pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Collector settings. Values left unset are filled in from the user's
/// `~/.fuzzmanagerconf` by [`CollectorConfig::resolve`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Local signature cache (`sigdir`).
    pub sig_cache_dir: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub server_protocol: Option<String>,
    pub server_auth_token: Option<AuthToken>,
    /// Client id stored on the server with each submitted crash.
    pub client_id: Option<String>,
    /// Name of the tool that found the crash.
    pub tool: Option<String>,
}

pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
}

impl CollectorConfig {
    /// Fills unset values from the global configuration file (if it exists)
    /// and applies defaults.
    pub fn resolve(self) -> Result<Self> {
        let config = match global_config_path() {
            Some(path) if path.exists() => self.merge_file(&path)?,
            _ => self,
        };
        config.with_defaults()
    }

    /// Fills unset values from the `Main` section of the given file.
    pub fn merge_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("reading collector configuration from {}", path.display());
        let files = ConfigurationFiles::new([path])?;
        self.merge_section(&files.main_config())
            .with_context(|| format!("invalid collector configuration: {}", path.display()))
    }

    pub fn merge_section(mut self, main: &Section) -> Result<Self> {
        let value = |key: &str| main.get(key).cloned();

        if self.sig_cache_dir.is_none() {
            self.sig_cache_dir = value("sigdir").map(PathBuf::from);
        }

        if self.server_host.is_none() {
            self.server_host = value("serverhost");
        }

        if self.server_port.is_none() {
            if let Some(port) = value("serverport") {
                let port = port
                    .parse()
                    .with_context(|| format!("invalid serverport: {port}"))?;
                self.server_port = Some(port);
            }
        }

        if self.server_protocol.is_none() {
            self.server_protocol = value("serverproto");
        }

        if self.server_auth_token.is_none() {
            if let Some(token) = value("serverauthtoken") {
                self.server_auth_token = Some(token.into());
            } else if let Some(token_file) = value("serverauthtokenfile") {
                self.server_auth_token = Some(read_token_file(token_file)?);
            }
        }

        if self.client_id.is_none() {
            self.client_id = value("clientid");
        }

        if self.tool.is_none() {
            self.tool = value("tool");
        }

        Ok(self)
    }

    /// Defaults that must not shadow configuration file values, so they are
    /// applied last.
    pub fn with_defaults(mut self) -> Result<Self> {
        let protocol = self
            .server_protocol
            .get_or_insert_with(|| DEFAULT_PROTOCOL.to_string());

        if self.server_port.is_none() {
            self.server_port = Some(if protocol == "https" {
                DEFAULT_HTTPS_PORT
            } else {
                DEFAULT_HTTP_PORT
            });
        }

        if self.server_host.is_some() && self.client_id.is_none() {
            self.client_id = Some(get_machine_name()?);
        }

        Ok(self)
    }

    /// `{proto}://{host}:{port}/{path}`
    pub fn server_url(&self, path: &str) -> Result<Url> {
        let host = self
            .server_host
            .as_deref()
            .ok_or_else(|| anyhow::format_err!("no server host configured"))?;
        let protocol = self.server_protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL);
        let port = self.server_port.unwrap_or(match protocol {
            "https" => DEFAULT_HTTPS_PORT,
            _ => DEFAULT_HTTP_PORT,
        });

        let base = Url::parse(&format!("{protocol}://{host}:{port}/"))
            .with_context(|| format!("invalid server address: {protocol}://{host}:{port}"))?;
        Ok(base.join(path.trim_start_matches('/'))?)
    }
}
