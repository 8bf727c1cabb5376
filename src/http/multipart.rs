//! `multipart/form-data` body parser.
//!
//! Runs entirely over an in-memory body (the connection has already read the
//! whole request by the time this is called): S0 expects a boundary line, S1
//! a `Content-Disposition` line, S2 optional headers, S3/S3' accumulates a
//! field value or spools a file part to disk, S4 checks the part terminator.

use crate::{errors::ErrorKind, http::request::UploadedFile, limits::MultipartLimits};
use memchr::memmem;
use tokio::io::AsyncWriteExt;

/// Fields and uploads extracted from one multipart body.
#[derive(Debug, Default)]
pub(crate) struct ParsedMultipart {
    pub(crate) fields: Vec<(String, String)>,
    pub(crate) uploads: Vec<UploadedFile>,
}

/// Parses `body` as `multipart/form-data` using `boundary` (without the
/// leading `--`).
pub(crate) async fn parse(
    body: &[u8],
    boundary: &str,
    limits: &MultipartLimits,
) -> Result<ParsedMultipart, ErrorKind> {
    let dash_boundary = format!("--{boundary}");
    let pos = memmem::find(body, dash_boundary.as_bytes()).ok_or(ErrorKind::UnableToFindBoundary)?;
    let mut cursor = pos + dash_boundary.len();

    let mut out = ParsedMultipart::default();

    loop {
        match body.get(cursor..cursor + 2) {
            Some(b"--") => return Ok(out),
            Some(b"\r\n") => cursor += 2,
            _ => return Err(ErrorKind::UnexpectedDataAfterBoundary),
        }

        if out.fields.len() + out.uploads.len() >= limits.max_parts {
            return Err(ErrorKind::BodyTooLarge);
        }

        let disposition = read_line(body, &mut cursor).ok_or(ErrorKind::InvalidContentDisposition)?;
        let (field_name, file_name) =
            parse_content_disposition(disposition).ok_or(ErrorKind::InvalidContentDisposition)?;

        let mut content_type = None;
        loop {
            let header_line = read_line(body, &mut cursor).ok_or(ErrorKind::InvalidContentDisposition)?;
            if header_line.is_empty() {
                break;
            }
            if let Some(value) = strip_header(header_line, b"content-type:") {
                content_type = Some(String::from_utf8_lossy(value).trim().to_owned());
            }
        }

        let part_end = find_next_boundary(body, cursor, dash_boundary.as_bytes())
            .ok_or(ErrorKind::UnexpectedDataAfterBoundary)?;
        // The CRLF immediately before the boundary line belongs to the
        // boundary delimiter, not to the part's content.
        let content_end = strip_trailing_crlf(body, cursor, part_end);
        let part_bytes = &body[cursor..content_end];

        match file_name {
            Some(file_name) => {
                if part_bytes.len() > limits.max_part_size {
                    return Err(ErrorKind::BodyTooLarge);
                }

                let upload = spool_file(part_bytes, field_name, file_name, content_type, limits).await?;
                out.uploads.push(upload);
            }
            None => {
                let value = String::from_utf8_lossy(part_bytes).into_owned();
                out.fields.push((field_name, value));
            }
        }

        cursor = part_end + dash_boundary.len();
    }
}

/// Reads one CRLF-terminated line starting at `*cursor`, advancing it past
/// the terminator. Returns the line without the `CRLF`.
fn read_line<'a>(body: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let rest = body.get(*cursor..)?;
    let pos = memmem::find(rest, b"\r\n")?;
    let line = &rest[..pos];
    *cursor += pos + 2;
    Some(line)
}

fn strip_header<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if line.len() < prefix.len() {
        return None;
    }
    if line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

/// Parses a `Content-Disposition: form-data; name="..."; filename="..."`
/// line, returning `(field_name, file_name)`. `filename*` is preferred over
/// `filename` when both are present.
fn parse_content_disposition(line: &[u8]) -> Option<(String, Option<String>)> {
    let line = strip_header(line, b"content-disposition:")?;
    let line = String::from_utf8_lossy(line);

    let mut name = None;
    let mut file_name = None;
    let mut file_name_star = None;

    for segment in line.split(|c| c == ';' || c == ',') {
        let segment = segment.trim();
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');

        match key.trim() {
            "name" => name = Some(value.to_owned()),
            "filename" => file_name = Some(value.to_owned()),
            "filename*" => file_name_star = Some(value.to_owned()),
            _ => {}
        }
    }

    Some((name?, file_name_star.or(file_name)))
}

/// Locates the next `dash_boundary` line after `from`, returning the offset
/// of its first byte.
fn find_next_boundary(body: &[u8], from: usize, dash_boundary: &[u8]) -> Option<usize> {
    let rest = body.get(from..)?;
    memmem::find(rest, dash_boundary).map(|p| from + p)
}

fn strip_trailing_crlf(body: &[u8], start: usize, end: usize) -> usize {
    if end >= start + 2 && &body[end - 2..end] == b"\r\n" {
        end - 2
    } else {
        end
    }
}

async fn spool_file(
    bytes: &[u8],
    field_name: String,
    file_name: String,
    content_type: Option<String>,
    limits: &MultipartLimits,
) -> Result<UploadedFile, ErrorKind> {
    let spool_path = limits.spool_dir.join(uuid::Uuid::new_v4().to_string());

    let mut file = tokio::fs::File::create(&spool_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;

    Ok(UploadedFile {
        field_name,
        file_name,
        content_type,
        spool_path,
        size: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> MultipartLimits {
        MultipartLimits::default()
    }

    #[tokio::test]
    async fn field_and_file_part() {
        let body = [
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n",
            "\r\n",
            "hi\r\n",
            "--boundary\r\n",
            "Content-Disposition: form-data; name=\"photo\"; filename=\"p.bin\"\r\n",
            "Content-Type: application/octet-stream\r\n",
            "\r\n",
            "\u{1}\u{2}\u{3}\r\n",
            "--boundary--\r\n",
        ]
        .concat();

        let parsed = parse(body.as_bytes(), "boundary", &limits()).await.unwrap();
        assert_eq!(parsed.fields, vec![("title".to_owned(), "hi".to_owned())]);
        assert_eq!(parsed.uploads.len(), 1);
        assert_eq!(parsed.uploads[0].field_name, "photo");
        assert_eq!(parsed.uploads[0].file_name, "p.bin");
        assert_eq!(parsed.uploads[0].size, 3);

        let written = std::fs::read(&parsed.uploads[0].spool_path).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
        std::fs::remove_file(&parsed.uploads[0].spool_path).unwrap();
    }

    #[tokio::test]
    async fn no_parts() {
        let body = "--boundary--\r\n";
        let parsed = parse(body.as_bytes(), "boundary", &limits()).await.unwrap();
        assert!(parsed.fields.is_empty());
        assert!(parsed.uploads.is_empty());
    }

    #[tokio::test]
    async fn missing_boundary_fails() {
        let err = parse(b"not multipart at all", "boundary", &limits())
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::UnableToFindBoundary);
    }
}
