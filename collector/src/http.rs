// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};

use crate::CollectorError;

#[async_trait]
pub trait ResponseExt: Sized {
    /// Fails with [`CollectorError::ServerError`], including the text of the
    /// response body, unless the response has the expected status.
    async fn expect_status(self, expected: StatusCode) -> Result<Self>;
}

#[async_trait]
impl ResponseExt for Response {
    async fn expect_status(self, expected: StatusCode) -> Result<Self> {
        let status = self.status();
        if status == expected {
            return Ok(self);
        }

        let body = self
            .text()
            .await
            .unwrap_or_else(|_| "<could not decode response body>".to_string());

        Err(CollectorError::ServerError { status, body }.into())
    }
}
