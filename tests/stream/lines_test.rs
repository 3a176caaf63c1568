//! Tests for line reassembly over chunk streams.

use futures_util::{stream, StreamExt};

use execstream::stream::{lines, ByteChunk, LineSplitter, StreamError};

fn chunked(data: &[u8], sizes: &[usize]) -> Vec<Result<ByteChunk, StreamError>> {
    let mut out = Vec::new();
    let mut rest = data;
    let mut seq = 0;
    for &size in sizes.iter().cycle() {
        if rest.is_empty() {
            break;
        }
        let take = size.min(rest.len());
        out.push(Ok(ByteChunk::new(seq, rest[..take].to_vec())));
        rest = &rest[take..];
        seq += 1;
    }
    out.push(Ok(ByteChunk::new(seq, Vec::new())));
    out
}

#[tokio::test]
async fn chunk_size_does_not_change_lines() {
    let text = "alpha\r\nbeta\n\ngamma \u{3b4}\u{3b5}\u{3bb}\u{3c4}\u{3b1}\r\n\u{1f980} crab\nlast";
    let expected = vec!["alpha", "beta", "", "gamma \u{3b4}\u{3b5}\u{3bb}\u{3c4}\u{3b1}", "\u{1f980} crab", "last"];

    for sizes in [&[1][..], &[2], &[3], &[7], &[1, 5, 2], &[64], &[4, 1, 1, 9]] {
        let got: Vec<String> = lines(stream::iter(chunked(text.as_bytes(), sizes)))
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(got, expected, "chunk sizes {sizes:?}");
    }
}

#[tokio::test]
async fn empty_stream_has_no_lines() {
    let got: Vec<_> = lines(stream::iter(chunked(b"", &[1]))).collect().await;
    assert!(got.is_empty());
}

#[tokio::test]
async fn read_error_ends_line_stream() {
    let err = StreamError::Read {
        channel: "stdout".to_string(),
        message: "Input/output error".to_string(),
    };
    let chunks = vec![Ok(ByteChunk::new(0, b"whole\nhalf".to_vec())), Err(err.clone())];
    let got: Vec<_> = lines(stream::iter(chunks)).collect().await;
    assert_eq!(got, vec![Ok("whole".to_string()), Err(err)]);
}

#[test]
fn splitter_keeps_one_pending_fragment() {
    let mut splitter = LineSplitter::new();
    assert!(splitter.push(b"par").is_empty());
    assert!(splitter.push(b"tial").is_empty());
    assert_eq!(splitter.pending(), "partial");
    assert_eq!(splitter.push(b" line\nnext"), vec!["partial line"]);
    assert_eq!(splitter.pending(), "next");
}
