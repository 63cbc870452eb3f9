//! Bounded collection of child-process output streams.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Overflow {
    /// Stop reading and report an error.
    Fail,
    /// Keep the first `limit` bytes, drain and discard the rest.
    Truncate,
}

#[derive(Debug)]
pub(crate) enum CaptureError {
    Io(io::Error),
    Overflow { limit: usize },
}

#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl Captured {
    pub fn lossy_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).trim_end().to_string();
        if self.truncated {
            text.push_str(" [truncated]");
        }
        text
    }
}

pub(crate) async fn capture<R>(
    mut reader: R,
    limit: usize,
    overflow: Overflow,
) -> Result<Captured, CaptureError>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured {
        bytes: Vec::with_capacity(limit.min(CHUNK_BYTES)),
        truncated: false,
    };
    let mut chunk = vec![0u8; CHUNK_BYTES];

    loop {
        let read = reader.read(&mut chunk).await.map_err(CaptureError::Io)?;
        if read == 0 {
            return Ok(captured);
        }

        let room = limit.saturating_sub(captured.bytes.len());
        if read <= room {
            captured.bytes.extend_from_slice(&chunk[..read]);
            continue;
        }

        match overflow {
            Overflow::Fail => return Err(CaptureError::Overflow { limit }),
            Overflow::Truncate => {
                captured.bytes.extend_from_slice(&chunk[..room]);
                captured.truncated = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_everything_within_limit() {
        let captured = capture(&b"digraph"[..], 16, Overflow::Fail)
            .await
            .expect("captured");
        assert_eq!(captured.bytes, b"digraph");
        assert!(!captured.truncated);
    }

    #[tokio::test]
    async fn fail_policy_reports_overflow() {
        let input = vec![b'x'; 40_000];
        let err = capture(&input[..], 1024, Overflow::Fail)
            .await
            .expect_err("overflow");
        assert!(matches!(err, CaptureError::Overflow { limit: 1024 }));
    }

    #[tokio::test]
    async fn truncate_policy_drains_and_marks_output() {
        let input = vec![b'e'; 40_000];
        let captured = capture(&input[..], 10, Overflow::Truncate)
            .await
            .expect("captured");
        assert_eq!(captured.bytes.len(), 10);
        assert!(captured.truncated);
        assert!(captured.lossy_text().ends_with("[truncated]"));
    }
}
