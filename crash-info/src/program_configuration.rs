// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config_files::ConfigurationFiles;

/// Description of the program under test, sent along with every crash.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramConfiguration {
    pub product: String,
    pub platform: String,
    pub os: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ProgramConfiguration {
    pub fn new(
        product: impl Into<String>,
        platform: impl Into<String>,
        os: impl Into<String>,
        version: Option<String>,
        env: Option<BTreeMap<String, String>>,
        args: Option<Vec<String>>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            product: product.into(),
            platform: platform.into(),
            os: os.into(),
            version,
            env: env.unwrap_or_default(),
            args: args.unwrap_or_default(),
            metadata: metadata.unwrap_or_default(),
        }
    }

    /// Reads the configuration stored next to a binary as
    /// `<binary>.fuzzmanagerconf`. Returns `None` if there is no such file.
    pub fn from_binary(binary_path: impl AsRef<Path>) -> Result<Option<Self>> {
        let config_path = binary_config_path(binary_path.as_ref());
        if !config_path.exists() {
            return Ok(None);
        }

        let config = ConfigurationFiles::new([&config_path])?;
        let main = config.main_config();

        let required = |key: &str| -> Result<String> {
            main.get(key).cloned().ok_or_else(|| {
                anyhow::format_err!(
                    "binary configuration {} is missing required key: {}",
                    config_path.display(),
                    key
                )
            })
        };

        Ok(Some(Self::new(
            required("product")?,
            required("platform")?,
            required("os")?,
            main.get("product_version").cloned(),
            None,
            None,
            Some(config.metadata_config()),
        )))
    }

    pub fn add_environment_variables(&mut self, env: impl IntoIterator<Item = (String, String)>) {
        self.env.extend(env);
    }

    pub fn add_program_arguments(&mut self, args: impl IntoIterator<Item = String>) {
        self.args.extend(args);
    }

    pub fn add_metadata(&mut self, metadata: impl IntoIterator<Item = (String, String)>) {
        self.metadata.extend(metadata);
    }
}

fn binary_config_path(binary_path: &Path) -> PathBuf {
    let mut name = OsString::from(binary_path.as_os_str());
    name.push(".fuzzmanagerconf");
    PathBuf::from(name)
}
