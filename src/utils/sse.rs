//! Minimal server-sent-events decoding: turns a byte stream into the
//! `data:` payloads it carries. Multi-line data frames are joined with
//! newlines; a `[DONE]` frame ends the stream.

use std::io;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::{RelayError, Result};

pub fn data_stream(response: reqwest::Response) -> BoxStream<'static, Result<String>> {
    from_byte_stream(response.bytes_stream().map_err(io::Error::other).boxed())
}

pub fn from_byte_stream(
    bytes: BoxStream<'static, io::Result<Bytes>>,
) -> BoxStream<'static, Result<String>> {
    let mut lines = StreamReader::new(bytes).lines();

    Box::pin(async_stream::stream! {
        let mut data = String::new();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim_end_matches('\r');
                    if line.is_empty() {
                        if data.is_empty() {
                            continue;
                        }
                        if data == "[DONE]" {
                            return;
                        }
                        yield Ok(std::mem::take(&mut data));
                        continue;
                    }
                    if let Some(rest) = line.strip_prefix("data:") {
                        if !data.is_empty() {
                            data.push('\n');
                        }
                        data.push_str(rest.trim_start());
                    }
                    // Comments, event names, and ids are ignored.
                }
                Ok(None) => {
                    if !data.is_empty() && data != "[DONE]" {
                        yield Ok(data);
                    }
                    return;
                }
                Err(err) => {
                    yield Err(RelayError::InvalidResponse(format!(
                        "failed to read SSE stream: {err}"
                    )));
                    return;
                }
            }
        }
    })
}
