// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Wrapper that keeps credentials out of logs and debug output.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn expose(self) -> T {
        self.0
    }

    pub fn expose_ref(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Secret<T> {
    fn from(data: T) -> Self {
        Secret(data)
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Secret(<REDACTED>)")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<REDACTED>")
    }
}

/// Token sent as `Authorization: Token <token>` to the REST API, and as the
/// basic-auth password when downloading signature files.
pub type AuthToken = Secret<String>;

/// Reads a token from a file, dropping trailing whitespace and newlines.
pub fn read_token_file(path: impl AsRef<Path>) -> Result<AuthToken> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read auth token file: {}", path.display()))?;
    Ok(data.trim_end().to_string().into())
}
