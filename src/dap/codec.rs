//! DAP wire protocol codec
//!
//! Every DAP message is a header block terminated by an empty line, followed
//! by a JSON body whose byte length the `Content-Length` header gives:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Upper bound on a single message body
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length:";

fn eof_is_crash(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::AdapterCrashed
    } else {
        Error::Io(e)
    }
}

/// Consume the header block and return the announced body length
async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<usize> {
    let mut content_length = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await.map_err(eof_is_crash)? == 0 {
            return Err(Error::AdapterCrashed);
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            // Stray blank lines before any header are tolerated
            if content_length.is_some() {
                break;
            }
            continue;
        }

        if let Some(value) = header.strip_prefix(CONTENT_LENGTH) {
            let value = value.trim();
            content_length = Some(value.parse::<usize>().map_err(|_| {
                Error::DapProtocol(format!("Invalid Content-Length: {}", value))
            })?);
        } else if !header.contains(':') {
            return Err(Error::DapProtocol(format!("Malformed header line: {}", header)));
        }
    }

    content_length.ok_or_else(|| Error::DapProtocol("Missing Content-Length header".to_string()))
}

/// Read one DAP message body
pub async fn read_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let len = read_headers(reader).await?;
    if len > MAX_BODY_BYTES {
        return Err(Error::DapProtocol(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_is_crash)?;

    String::from_utf8(body).map_err(|e| Error::DapProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one DAP message body with its header
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    let frame = format!("{} {}\r\n\r\n{}", CONTENT_LENGTH, json.len(), json);
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn reader(data: &[u8]) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_reads_consecutive_messages() {
        let mut r = reader(b"Content-Length: 2\r\n\r\n{}Content-Length: 12\r\n\r\n{\"seq\":1234}");
        assert_eq!(read_message(&mut r).await.unwrap(), "{}");
        assert_eq!(read_message(&mut r).await.unwrap(), "{\"seq\":1234}");
    }

    #[tokio::test]
    async fn test_ignores_content_type_header() {
        let mut r = reader(
            b"Content-Type: application/vscode-jsonrpc\r\nContent-Length: 2\r\n\r\n[]",
        );
        assert_eq!(read_message(&mut r).await.unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_eof_reports_adapter_crash() {
        let mut r = reader(b"");
        assert!(matches!(read_message(&mut r).await, Err(Error::AdapterCrashed)));

        let mut r = reader(b"Content-Length: 50\r\n\r\n{\"short\"");
        assert!(matches!(read_message(&mut r).await, Err(Error::AdapterCrashed)));
    }

    #[tokio::test]
    async fn test_rejects_bad_length() {
        let mut r = reader(b"Content-Length: many\r\n\r\n{}");
        assert!(matches!(read_message(&mut r).await, Err(Error::DapProtocol(_))));
    }

    #[tokio::test]
    async fn test_write_frames_body() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"a\":1}").await.unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Content-Length: 7\r\n\r\n{\"a\":1}"
        );
    }
}
