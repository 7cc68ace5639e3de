// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Crash description types shared by the collector and its tools.
//!
//! A [`CrashInfo`] is built from the raw output of a crashed program and the
//! [`ProgramConfiguration`] describing that program. Signature creation and
//! matching happen on the FuzzManager server; this crate only extracts what
//! the server needs (and what is useful for local triage).

use serde::{Deserialize, Serialize};

mod asan;
pub mod assertion;
pub mod config_files;
pub mod crash_info;
pub mod matchers;
pub mod program_configuration;

pub use config_files::ConfigurationFiles;
pub use crash_info::{CrashInfo, CrashKind};
pub use program_configuration::ProgramConfiguration;

/// A single frame of a parsed sanitizer stack trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub line: String,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u64>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file_path: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file_line: Option<u64>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_offset: Option<u64>,
}

impl StackEntry {
    /// Function name with any argument signature removed.
    pub fn short_name(&self) -> Option<String> {
        self.function_name.as_deref().map(function_without_args)
    }
}

/// Trims the signature off a function name, reading up to the first `(`
/// outside of any C++ template brackets.
pub(crate) fn function_without_args(func: &str) -> String {
    let mut angle_depth = 0;
    for (ix, c) in func.char_indices() {
        match c {
            '<' => angle_depth += 1,
            '>' => angle_depth -= 1,
            '(' if angle_depth == 0 => return func[0..ix].trim().to_string(),
            _ => continue,
        }
    }

    func.to_string()
}
