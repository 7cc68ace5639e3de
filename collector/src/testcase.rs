// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use crash_info::CrashInfo;

/// Control characters that may appear in a text test case: BEL, BS, TAB, LF,
/// FF, CR and ESC.
const TEXT_CONTROL_BYTES: [u8; 7] = [7, 8, 9, 10, 12, 13, 27];

/// A test case read from disk, classified as text or binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    pub path: PathBuf,
    pub data: Vec<u8>,
    pub is_binary: bool,
}

/// True if any byte falls outside printable ASCII, the high half of the
/// byte range, and the common text control characters, or if the content is
/// not valid UTF-8.
pub fn is_binary(data: &[u8]) -> bool {
    data.iter()
        .any(|b| *b < 0x20 && !TEXT_CONTROL_BYTES.contains(b))
        || std::str::from_utf8(data).is_err()
}

pub async fn read_testcase(path: impl AsRef<Path>) -> Result<TestCase> {
    let path = path.as_ref();
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("unable to read test case: {}", path.display()))?;
    Ok(TestCase::new(path, data))
}

impl TestCase {
    pub fn new(path: impl Into<PathBuf>, data: Vec<u8>) -> Self {
        let is_binary = is_binary(&data);
        Self {
            path: path.into(),
            data,
            is_binary,
        }
    }

    /// Text content, or `None` for binary test cases.
    pub fn text(&self) -> Option<&str> {
        if self.is_binary {
            None
        } else {
            std::str::from_utf8(&self.data).ok()
        }
    }

    /// File extension without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }

    /// Content as sent to the server: plain text, or base64 for binary data.
    pub fn encoded(&self) -> String {
        match self.text() {
            Some(text) => text.to_string(),
            None => STANDARD.encode(&self.data),
        }
    }

    /// Attaches a text test case to the crash, so it is available to
    /// signature matching. Binary test cases are never attached.
    pub fn attach(&self, crash_info: &mut CrashInfo) {
        if let Some(text) = self.text() {
            crash_info.testcase = Some(text.to_string());
        }
    }
}
