//! Decoder for `Transfer-Encoding: chunked` request bodies.
//!
//! Unlike the fixed-length body path (which slices straight out of the
//! connection's zero-copy parse buffer), a chunked body's final size isn't
//! known up front, so the decoded bytes are always owned.

use crate::errors::ErrorKind;
use memchr::memchr;
use std::time::Duration;
use tokio::{io::AsyncReadExt, net::TcpStream, time::sleep};

/// Decodes a chunked body from `window` (bytes already read past the request
/// head, e.g. leftover from the head's single socket read) plus further
/// reads from `stream` as needed.
///
/// Returns `BodyTooLarge` if the decoded size would exceed `max_size`.
pub(crate) async fn decode(
    window: &mut Vec<u8>,
    stream: &mut TcpStream,
    timeout: Duration,
    max_size: usize,
) -> Result<Vec<u8>, ErrorKind> {
    let mut cursor = 0usize;
    let mut out = Vec::new();

    loop {
        let size_end = loop {
            if let Some(pos) = memchr(b'\n', &window[cursor..]) {
                break cursor + pos;
            }
            fill_more(window, stream, timeout).await?;
        };

        let mut line: &[u8] = &window[cursor..size_end];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        // Chunk extensions (`;name=value`) are accepted and ignored.
        let hex = line.split(|&b| b == b';').next().unwrap_or(line);
        let size = parse_hex_size(hex).ok_or(ErrorKind::ChunkInvalidSize)?;
        cursor = size_end + 1;

        if size == 0 {
            loop {
                while window.len() <= cursor {
                    fill_more(window, stream, timeout).await?;
                }
                match memchr(b'\n', &window[cursor..]) {
                    Some(pos) => {
                        let line_end = cursor + pos;
                        let is_blank = window[cursor..line_end].iter().all(|&b| b == b'\r');
                        cursor = line_end + 1;
                        if is_blank {
                            return Ok(out);
                        }
                    }
                    None => fill_more(window, stream, timeout).await?,
                }
            }
        }

        if out.len() + size > max_size {
            return Err(ErrorKind::BodyTooLarge);
        }

        while window.len() < cursor + size + 2 {
            fill_more(window, stream, timeout).await?;
        }

        out.extend_from_slice(&window[cursor..cursor + size]);
        cursor += size;

        match &window[cursor..cursor + 2] {
            b"\r\n" => cursor += 2,
            _ => return Err(ErrorKind::ChunkInvalidEndCharacter),
        }
    }
}

#[inline]
fn parse_hex_size(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => return None,
        };
        result = result.checked_mul(16)?.checked_add(digit as usize)?;
    }
    Some(result)
}

async fn fill_more(
    window: &mut Vec<u8>,
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<(), ErrorKind> {
    let mut buf = [0u8; 4096];

    let n = tokio::select! {
        biased;

        read_result = stream.read(&mut buf) => read_result?,
        _ = sleep(timeout) => {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "chunk read timeout").into());
        }
    };

    if n == 0 {
        return Err(ErrorKind::UnexpectedBody(window.len()));
    }

    window.extend_from_slice(&buf[..n]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{io::AsyncWriteExt, net::TcpListener};

    #[test]
    fn hex_size_parses() {
        assert_eq!(parse_hex_size(b"1a"), Some(26));
        assert_eq!(parse_hex_size(b"0"), Some(0));
        assert_eq!(parse_hex_size(b"FF"), Some(255));
        assert_eq!(parse_hex_size(b""), None);
        assert_eq!(parse_hex_size(b"zz"), None);
    }

    async fn decode_wire(wire: &'static [u8]) -> Result<Vec<u8>, ErrorKind> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(wire).await.unwrap();
        });

        let (mut server, _) = listener.accept().await.unwrap();
        let mut window = Vec::new();
        let result = decode(&mut window, &mut server, Duration::from_secs(1), 1024).await;

        writer.await.unwrap();
        result
    }

    #[tokio::test]
    async fn decodes_multiple_chunks_and_trailers() {
        let body = decode_wire(b"4\r\nwiki\r\n5\r\npedia\r\n0\r\nX-Trailer: yes\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(body, b"wikipedia");
    }

    #[tokio::test]
    async fn zero_chunk_only_decodes_to_empty_body() {
        let body = decode_wire(b"0\r\n\r\n").await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn ignores_chunk_extensions() {
        let body = decode_wire(b"3;ext=1\r\nabc\r\n0\r\n\r\n").await.unwrap();
        assert_eq!(body, b"abc");
    }

    #[tokio::test]
    async fn rejects_invalid_hex_size() {
        let err = decode_wire(b"zz\r\nabc\r\n0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ErrorKind::ChunkInvalidSize));
    }

    #[tokio::test]
    async fn rejects_bad_chunk_terminator() {
        let err = decode_wire(b"3\r\nabcXX0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ErrorKind::ChunkInvalidEndCharacter));
    }

    #[tokio::test]
    async fn enforces_max_size() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client
                .write_all(b"5\r\nhello\r\n0\r\n\r\n")
                .await
                .unwrap();
        });

        let (mut server, _) = listener.accept().await.unwrap();
        let mut window = Vec::new();
        let result = decode(&mut window, &mut server, Duration::from_secs(1), 3).await;

        writer.await.unwrap();
        assert!(matches!(result.unwrap_err(), ErrorKind::BodyTooLarge));
    }
}
