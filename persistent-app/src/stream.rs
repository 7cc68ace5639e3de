// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc::UnboundedSender;

use crate::buffer::TailBuffer;

/// Reads `stream` line by line until EOF. Lines starting with
/// `response_prefix` are sent (without the prefix) to `responses`, all other
/// lines are kept in a backlog of at most `max_backlog` lines, which is
/// returned once the stream closes.
pub async fn collect_stream(
    name: &str,
    stream: impl AsyncRead + Unpin,
    response_prefix: &str,
    responses: UnboundedSender<String>,
    max_backlog: usize,
) -> Result<Vec<String>> {
    let mut stream = BufReader::new(stream);
    let mut backlog = TailBuffer::new(max_backlog);

    loop {
        let mut buf = vec![];

        let bytes_read = stream.read_until(b'\n', &mut buf).await?;
        if bytes_read == 0 && buf.is_empty() {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);

        if let Some(response) = line.strip_prefix(response_prefix) {
            trace!("{} response: {}", name, response);
            // The receiver is gone once the application has been stopped.
            let _ = responses.send(response.trim_end().to_string());
        } else {
            backlog.push(line.to_string());
        }
    }

    debug!("{} closed", name);
    Ok(backlog.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn responses_are_separated_from_output() -> Result<()> {
        let input: &[u8] = b"hello\nSPFP: PASSED\r\nworld\nSPFP: OK\nno newline";
        let (tx, mut rx) = mpsc::unbounded_channel();

        let output = collect_stream("stdout", input, "SPFP: ", tx, 256).await?;

        assert_eq!(output, vec!["hello", "world", "no newline"]);
        assert_eq!(rx.recv().await.as_deref(), Some("PASSED"));
        assert_eq!(rx.recv().await.as_deref(), Some("OK"));
        assert_eq!(rx.recv().await, None);
        Ok(())
    }

    #[tokio::test]
    async fn backlog_is_bounded() -> Result<()> {
        let input = (0..10).map(|i| format!("line {i}\n")).collect::<String>();
        let (tx, _rx) = mpsc::unbounded_channel();

        let output = collect_stream("stderr", input.as_bytes(), "SPFP: ", tx, 3).await?;
        assert_eq!(output, vec!["line 7", "line 8", "line 9"]);
        Ok(())
    }
}
