//! Reassembly of byte chunks into text lines.

use std::collections::VecDeque;

use futures_core::Stream;
use futures_util::stream::{self, StreamExt};

use super::{ByteChunk, OutputStream, StreamResult};

/// Splits a sequence of byte chunks into lines.
///
/// Lines end at `\n` or `\r\n`; the delimiter is not included. Text after the
/// last delimiter is held as a single pending fragment until more input or
/// [`finish`](Self::finish) arrives.
#[derive(Debug, Default, Clone)]
pub struct LineSplitter {
    pending: String,
    /// Leading bytes of a UTF-8 scalar cut off by the end of a chunk.
    partial: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode(chunk);
        let mut lines = Vec::new();
        let mut rest = text.as_str();

        while let Some(idx) = rest.find('\n') {
            self.pending.push_str(&rest[..idx]);
            let mut line = std::mem::take(&mut self.pending);
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
            rest = &rest[idx + 1..];
        }
        self.pending.push_str(rest);
        lines
    }

    /// End of input: return the pending fragment, if any.
    pub fn finish(&mut self) -> Option<String> {
        if !self.partial.is_empty() {
            tracing::debug!(bytes = self.partial.len(), "Dropping truncated UTF-8 sequence");
            self.partial.clear();
        }
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Text currently held back waiting for a delimiter.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(chunk);

        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                let utf8 = e.utf8_error();
                if utf8.error_len().is_some() {
                    tracing::debug!(bytes = chunk.len(), "Dropping chunk with invalid UTF-8");
                    return String::new();
                }
                let valid = utf8.valid_up_to();
                let mut bytes = e.into_bytes();
                self.partial = bytes.split_off(valid);
                // The prefix was just validated.
                String::from_utf8(bytes).unwrap_or_default()
            }
        }
    }
}

struct LineState {
    chunks: stream::BoxStream<'static, StreamResult<ByteChunk>>,
    splitter: LineSplitter,
    ready: VecDeque<String>,
    done: bool,
}

/// Adapt a chunk stream into a line stream.
///
/// On completion a non-empty trailing fragment is emitted as the last line.
/// On error the error is forwarded, the fragment is discarded and the stream
/// ends.
pub fn lines<S>(chunks: S) -> OutputStream<String>
where
    S: Stream<Item = StreamResult<ByteChunk>> + Send + 'static,
{
    let state = LineState {
        chunks: chunks.boxed(),
        splitter: LineSplitter::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.done {
                return None;
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => st.ready.extend(st.splitter.push(chunk.data())),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    st.ready.extend(st.splitter.finish());
                }
            }
        }
    })
    .boxed()
}
