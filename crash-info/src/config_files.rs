// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

pub const MAIN_SECTION: &str = "Main";
pub const METADATA_SECTION: &str = "Metadata";

pub type Section = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{file}:{line}: key/value pair outside of any section")]
    MissingSectionHeader { file: PathBuf, line: usize },

    #[error("{file}:{line}: unable to parse line: {text}")]
    Malformed {
        file: PathBuf,
        line: usize,
        text: String,
    },
}

/// INI-style configuration assembled from one or more files.
///
/// Files are applied in order, so a key in a later file replaces the same
/// key from an earlier one. Keys are case-insensitive except in the
/// `Metadata` section, whose keys are user-defined and kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigurationFiles {
    sections: BTreeMap<String, Section>,
}

impl ConfigurationFiles {
    pub fn new<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Self> {
        let mut config = Self::default();
        for path in paths {
            let path = path.as_ref();
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read configuration file: {}", path.display()))?;
            config.merge_str(&data, path)?;
        }
        Ok(config)
    }

    pub fn parse(data: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.merge_str(data, Path::new("<string>"))?;
        Ok(config)
    }

    fn merge_str(&mut self, data: &str, file: &Path) -> Result<(), ConfigError> {
        let mut current: Option<String> = None;

        for (index, raw) in data.lines().enumerate() {
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') || text.starts_with(';') {
                continue;
            }

            if let Some(name) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                let name = name.trim().to_string();
                self.sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let split = text.find(['=', ':']).map(|ix| (&text[..ix], &text[ix + 1..]));
            let (key, value) = match split {
                Some((key, value)) if !key.trim().is_empty() => (key.trim(), value.trim()),
                _ => {
                    return Err(ConfigError::Malformed {
                        file: file.to_path_buf(),
                        line: index + 1,
                        text: text.to_string(),
                    })
                }
            };

            let section = current.as_ref().ok_or_else(|| ConfigError::MissingSectionHeader {
                file: file.to_path_buf(),
                line: index + 1,
            })?;

            let key = if section == METADATA_SECTION {
                key.to_string()
            } else {
                key.to_lowercase()
            };

            self.sections
                .entry(section.clone())
                .or_default()
                .insert(key, value.to_string());
        }

        Ok(())
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn main_config(&self) -> Section {
        self.section(MAIN_SECTION).cloned().unwrap_or_default()
    }

    pub fn metadata_config(&self) -> Section {
        self.section(METADATA_SECTION).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_main_and_metadata() -> Result<()> {
        let config = ConfigurationFiles::parse(
            "# global settings\n\
             [Main]\n\
             SigDir = /home/user/sigcache\n\
             serverhost: fuzzmanager.example.com\n\
             ; trailing comment\n\
             \n\
             [Metadata]\n\
             BuildFlags = --enable-debug\n",
        )?;

        let main = config.main_config();
        assert_eq!(main["sigdir"], "/home/user/sigcache");
        assert_eq!(main["serverhost"], "fuzzmanager.example.com");
        assert_eq!(config.metadata_config()["BuildFlags"], "--enable-debug");
        assert!(config.section("Env").is_none());
        Ok(())
    }

    #[test]
    fn later_files_override_earlier() -> Result<()> {
        let mut first = tempfile::NamedTempFile::new()?;
        writeln!(first, "[Main]\ntool = first\nsigdir = /tmp/a")?;
        let mut second = tempfile::NamedTempFile::new()?;
        writeln!(second, "[Main]\ntool = second")?;

        let config = ConfigurationFiles::new([first.path(), second.path()])?;
        let main = config.main_config();
        assert_eq!(main["tool"], "second");
        assert_eq!(main["sigdir"], "/tmp/a");
        Ok(())
    }

    #[test]
    fn rejects_keys_before_section() {
        let err = ConfigurationFiles::parse("sigdir = /tmp\n[Main]\n").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingSectionHeader {
                file: PathBuf::from("<string>"),
                line: 1
            }
        );
    }

    #[test]
    fn rejects_garbage_lines() {
        let err = ConfigurationFiles::parse("[Main]\njust some words\n").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 2, .. }));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.conf");
        assert!(ConfigurationFiles::new([missing]).is_err());
    }
}
