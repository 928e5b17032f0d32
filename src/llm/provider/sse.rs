// src/llm/provider/sse.rs
// SSE framing over a reqwest byte stream: buffer chunks, split frames on
// blank lines, join multi-line `data:` payloads, parse JSON.

use anyhow::Result;
use futures::stream::{unfold, Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

/// Parse one SSE frame into its JSON data payload. `[DONE]` markers and
/// comment-only frames yield None.
fn parse_frame(frame: &str) -> Option<Result<Value>> {
    let mut data_lines: Vec<&str> = Vec::new();
    for line in frame.lines() {
        if line.starts_with(':') {
            continue; // comment/heartbeat
        }
        if line.starts_with("event:") {
            continue; // the JSON payload carries its own type field
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let data = data_lines.join("\n");
    if data == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str::<Value>(&data).map_err(|e| anyhow::anyhow!("SSE parse error: {}", e)))
}

/// Turn a raw byte stream into a stream of SSE JSON payloads.
pub fn sse_json_stream(
    bytes_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<Value>> + Send {
    let initial = (Box::pin(bytes_stream), String::new(), false);

    unfold(initial, |(mut stream, mut buffer, mut ended)| async move {
        loop {
            if let Some(pos) = buffer.find("\n\n") {
                let frame = buffer[..pos].to_string();
                buffer.drain(..pos + 2);
                match parse_frame(&frame) {
                    Some(item) => return Some((item, (stream, buffer, ended))),
                    None => continue,
                }
            }

            if ended {
                // Flush whatever trailing frame lacked its blank line.
                if buffer.trim().is_empty() {
                    return None;
                }
                let frame = std::mem::take(&mut buffer);
                match parse_frame(&frame) {
                    Some(item) => return Some((item, (stream, buffer, ended))),
                    None => {
                        warn!("SSE stream ended with unparsed data: {} bytes", frame.len());
                        return None;
                    }
                }
            }

            match stream.next().await {
                Some(Ok(bytes)) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(e)) => {
                    return Some((
                        Err(anyhow::anyhow!("stream error: {}", e)),
                        (stream, buffer, ended),
                    ))
                }
                None => ended = true,
            }
        }
    })
}
