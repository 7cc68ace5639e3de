// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::asan;
use crate::assertion::{self, Message};
use crate::program_configuration::ProgramConfiguration;
use crate::StackEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashKind {
    /// AddressSanitizer report found in the crash log.
    Asan,
    /// No recognizable crash, e.g. an assertion or a hang.
    NoCrash,
}

/// A single crash, as observed from the outside of the crashed process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashInfo {
    pub kind: CrashKind,
    pub raw_stdout: Vec<String>,
    pub raw_stderr: Vec<String>,
    pub raw_crash_data: Vec<String>,
    pub configuration: ProgramConfiguration,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testcase: Option<String>,
    #[serde(default)]
    pub backtrace: Vec<String>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<StackEntry>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_address: Option<u64>,
}

fn split_lines(text: Option<&str>) -> Vec<String> {
    text.map(|t| t.lines().map(String::from).collect())
        .unwrap_or_default()
}

impl CrashInfo {
    /// Builds a crash description from raw process output.
    ///
    /// `aux_crash_data` is extra crash output captured separately, e.g. an
    /// ASan log file. When present it is searched for the crash report
    /// instead of stderr.
    pub fn from_raw_crash_data(
        stdout: Option<&str>,
        stderr: Option<&str>,
        configuration: ProgramConfiguration,
        aux_crash_data: Option<&str>,
    ) -> Result<Self> {
        let crash_log = aux_crash_data.or(stderr).unwrap_or_default();

        let mut info = Self {
            kind: CrashKind::NoCrash,
            raw_stdout: split_lines(stdout),
            raw_stderr: split_lines(stderr),
            raw_crash_data: split_lines(aux_crash_data),
            configuration,
            testcase: None,
            backtrace: vec![],
            frames: vec![],
            crash_address: None,
        };

        if asan::is_asan_report(crash_log) {
            let frames = asan::parse_asan_call_stack(crash_log);
            info.kind = CrashKind::Asan;
            info.backtrace = frames
                .iter()
                .map(|frame| {
                    frame
                        .short_name()
                        .or_else(|| frame.module_path.clone())
                        .unwrap_or_else(|| "??".to_string())
                })
                .collect();
            info.frames = frames;
            info.crash_address = asan::parse_crash_address(crash_log);
        }

        Ok(info)
    }

    /// The assertion message found in stderr or the crash data, falling back
    /// to a sanitizer abort message.
    pub fn assertion(&self) -> Option<Message> {
        let output: Vec<&str> = self
            .raw_stderr
            .iter()
            .chain(self.raw_crash_data.iter())
            .map(String::as_str)
            .collect();

        assertion::get_assertion(&output).or_else(|| assertion::get_auxiliary_abort_message(&output))
    }
}
