//! SGR escape parsing and style range reconstruction.
//!
//! [`Ansi::decode`] turns one self-contained unit of text into clean text plus
//! style ranges. [`AnsiDecoder`] wraps it for streams: it carries the codes
//! still open at the end of one unit into the next, and buffers escape
//! sequences cut off by a chunk boundary.

use std::fmt;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::stream::{BoxStream, StreamExt};
use serde::Serialize;

use super::{Attribute, StyleCode};

const ESC: u8 = 0x1B;

/// Longest incomplete escape prefix held back between chunks.
pub const MAX_PENDING_ESCAPE: usize = 64;

/// Caller-supplied code substitution applied before resolution.
pub type CodeMapping = Arc<dyn Fn(StyleCode) -> StyleCode + Send + Sync>;

/// A styled span of clean text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StyleRange {
    /// Byte offset of the first styled byte.
    pub start: usize,
    /// Byte offset one past the last styled byte.
    pub end: usize,
    pub code: StyleCode,
    pub attribute: Attribute,
}

impl StyleRange {
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Result of decoding one unit of text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decoded {
    pub text: String,
    pub ranges: Vec<StyleRange>,
    /// Codes still in effect at the end of `text`.
    pub open: Vec<StyleCode>,
}

/// Decoded output of a streaming decoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StyledText {
    /// Clean-text bytes produced before this unit.
    pub offset: usize,
    pub text: String,
    /// Ranges relative to `text`.
    pub ranges: Vec<StyleRange>,
    pub open: Vec<StyleCode>,
}

/// Stateless SGR decoder.
#[derive(Clone, Default)]
pub struct Ansi {
    mapping: Option<CodeMapping>,
}

impl fmt::Debug for Ansi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ansi")
            .field("mapped", &self.mapping.is_some())
            .finish()
    }
}

impl Ansi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that substitutes codes through `mapping` before resolving them.
    #[must_use]
    pub fn with_mapping<F>(mapping: F) -> Self
    where
        F: Fn(StyleCode) -> StyleCode + Send + Sync + 'static,
    {
        Self {
            mapping: Some(Arc::new(mapping)),
        }
    }

    /// Resolve a code to its attribute, after remapping.
    #[must_use]
    pub fn resolve(&self, code: StyleCode) -> Option<Attribute> {
        let code = match &self.mapping {
            Some(map) => map(code),
            None => code,
        };
        code.attribute()
    }

    /// Decode `raw`, continuing the ranges of `open`.
    ///
    /// A trailing incomplete escape is kept as literal text.
    #[must_use]
    pub fn decode(&self, raw: &str, open: &[StyleCode]) -> Decoded {
        let scan = scan(raw);
        let mut text = scan.text;
        text.push_str(&raw[scan.tail..]);
        self.reconstruct(text, &scan.events, open)
    }

    /// Remove every well-formed escape sequence from `raw`.
    #[must_use]
    pub fn strip(raw: &str) -> String {
        let scan = scan(raw);
        let mut text = scan.text;
        text.push_str(&raw[scan.tail..]);
        text
    }

    fn reconstruct(&self, text: String, events: &[(usize, StyleCode)], open: &[StyleCode]) -> Decoded {
        let events: Vec<(usize, StyleCode)> = open
            .iter()
            .map(|&code| (0, code))
            .chain(events.iter().copied())
            .collect();

        let mut ranges = Vec::new();
        let mut still_open = Vec::new();

        for (i, &(start, code)) in events.iter().enumerate() {
            if code.is_reset() {
                continue;
            }
            let end = events[i + 1..]
                .iter()
                .find(|(_, later)| later.ends_range(code))
                .map(|&(offset, _)| offset);
            let end = match end {
                Some(end) => end,
                None => {
                    if !still_open.contains(&code) {
                        still_open.push(code);
                    }
                    text.len()
                }
            };
            if end <= start {
                continue;
            }
            match self.resolve(code) {
                Some(attribute) => ranges.push(StyleRange {
                    start,
                    end,
                    code,
                    attribute,
                }),
                None => tracing::trace!(%code, "Code remapped to no attribute"),
            }
        }

        Decoded {
            text,
            ranges,
            open: still_open,
        }
    }
}

/// Stateful decoder for a sequence of chunks.
#[derive(Debug, Clone, Default)]
pub struct AnsiDecoder {
    ansi: Ansi,
    open: Vec<StyleCode>,
    pending: String,
    offset: usize,
}

impl AnsiDecoder {
    #[must_use]
    pub fn new(ansi: Ansi) -> Self {
        Self {
            ansi,
            ..Self::default()
        }
    }

    /// Codes that will be carried into the next chunk.
    #[must_use]
    pub fn open_codes(&self) -> &[StyleCode] {
        &self.open
    }

    /// Clean-text bytes produced so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Decode the next chunk of a stream.
    ///
    /// An escape sequence cut off at the end of `chunk` is held back and
    /// completed by the next call.
    pub fn decode(&mut self, chunk: &str) -> StyledText {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(chunk);

        let scan = scan(&input);
        let mut text = scan.text;
        let tail = &input[scan.tail..];
        if tail.len() > MAX_PENDING_ESCAPE {
            tracing::debug!(bytes = tail.len(), "Flushing oversized escape prefix as text");
            text.push_str(tail);
        } else {
            self.pending = tail.to_string();
        }
        self.emit(text, &scan.events)
    }

    /// Decode a complete line, carrying open codes but not partial escapes.
    pub fn decode_line(&mut self, line: &str) -> StyledText {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(line);

        let scan = scan(&input);
        let mut text = scan.text;
        text.push_str(&input[scan.tail..]);
        self.emit(text, &scan.events)
    }

    /// Flush a held-back escape prefix as literal text.
    pub fn finish(&mut self) -> Option<StyledText> {
        if self.pending.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        Some(self.emit(text, &[]))
    }

    fn emit(&mut self, text: String, events: &[(usize, StyleCode)]) -> StyledText {
        let decoded = self.ansi.reconstruct(text, events, &self.open);
        let offset = self.offset;
        self.offset += decoded.text.len();
        self.open.clone_from(&decoded.open);
        StyledText {
            offset,
            text: decoded.text,
            ranges: decoded.ranges,
            open: decoded.open,
        }
    }
}

/// Adapt a line stream into styled lines, carrying open codes line to line.
pub fn styled<S, E>(lines: S, mut decoder: AnsiDecoder) -> BoxStream<'static, Result<StyledText, E>>
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Send + 'static,
{
    lines
        .map(move |line| line.map(|line| decoder.decode_line(&line)))
        .boxed()
}

struct Scan {
    text: String,
    events: Vec<(usize, StyleCode)>,
    /// Start of a trailing incomplete escape, or the input length.
    tail: usize,
}

enum Sequence {
    /// SGR with its codes, or `None` if any code is unrecognized.
    Sgr(usize, Option<Vec<StyleCode>>),
    /// Any other complete control sequence.
    Other(usize),
    Incomplete,
    Literal,
}

fn scan(raw: &str) -> Scan {
    let bytes = raw.as_bytes();
    let mut text = String::with_capacity(raw.len());
    let mut events = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while let Some(found) = bytes[i..].iter().position(|&b| b == ESC) {
        let esc = i + found;
        text.push_str(&raw[copied..esc]);
        match parse_sequence(&bytes[esc..]) {
            Sequence::Sgr(len, codes) => {
                match codes {
                    Some(codes) => events.extend(codes.into_iter().map(|code| (text.len(), code))),
                    None => tracing::debug!(
                        sequence = %raw[esc..esc + len].escape_debug(),
                        "Discarding SGR sequence with unsupported code"
                    ),
                }
                i = esc + len;
                copied = i;
            }
            Sequence::Other(len) => {
                i = esc + len;
                copied = i;
            }
            Sequence::Incomplete => {
                return Scan {
                    text,
                    events,
                    tail: esc,
                };
            }
            Sequence::Literal => {
                // Copied with the following text.
                i = esc + 1;
                copied = esc;
            }
        }
    }

    text.push_str(&raw[copied..]);
    Scan {
        text,
        events,
        tail: raw.len(),
    }
}

/// Parse a control sequence at the start of `bytes`, which begins with ESC.
fn parse_sequence(bytes: &[u8]) -> Sequence {
    match bytes.get(1) {
        None => return Sequence::Incomplete,
        Some(b'[') => {}
        Some(_) => return Sequence::Literal,
    }

    let mut i = 2;
    while bytes.get(i).is_some_and(|b| (0x30..=0x3F).contains(b)) {
        i += 1;
    }
    let params_end = i;
    while bytes.get(i).is_some_and(|b| (0x20..=0x2F).contains(b)) {
        i += 1;
    }

    match bytes.get(i) {
        None => Sequence::Incomplete,
        Some(b'm') if i == params_end => Sequence::Sgr(i + 1, parse_sgr(&bytes[2..params_end])),
        Some(final_byte) if (0x40..=0x7E).contains(final_byte) => Sequence::Other(i + 1),
        Some(_) => Sequence::Literal,
    }
}

fn parse_sgr(params: &[u8]) -> Option<Vec<StyleCode>> {
    if params.is_empty() {
        return Some(vec![StyleCode::AllReset]);
    }
    params
        .split(|&b| b == b';')
        .map(|field| {
            if field.is_empty() {
                return Some(StyleCode::AllReset);
            }
            let value = std::str::from_utf8(field).ok()?.parse::<u16>().ok()?;
            StyleCode::from_code(value)
        })
        .collect()
}
