// Raw HTTP/1.1 exchange over a `Connector` stream.
//
// Used where the body must be consumed as wire bytes (the chunked topology
// document). Produces a structured head with case-insensitive headers and
// hands the remaining socket to the caller as the body source.

use reqwest::StatusCode;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::Error;
use crate::transport::{BoxedIo, Endpoint};

/// Longest accepted status or header line.
const MAX_HEAD_LINE: u64 = 8 * 1024;
/// Most header lines accepted before the head is considered malformed.
const MAX_HEADERS: usize = 100;

/// A bodiless request to write onto a raw connection. Always sent with
/// `Connection: close`.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: &'static str,
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
}

impl RawRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET",
            path: path.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn encode(&self, endpoint: &Endpoint) -> Vec<u8> {
        let mut out = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            self.method,
            self.path,
            endpoint.authority()
        );
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");
        out.into_bytes()
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    /// Whether the body uses `Transfer-Encoding: chunked`.
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"))
    }

    /// Declared `Content-Length`, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")?.trim().parse().ok()
    }
}

/// A response whose body has not been read yet.
pub struct RawResponse {
    pub head: ResponseHead,
    pub body: BufReader<BoxedIo>,
}

/// First value of `name` in `headers`, case-insensitively.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Write `request` onto `io` and parse the response head.
pub async fn send(
    mut io: BoxedIo,
    endpoint: &Endpoint,
    request: &RawRequest,
) -> Result<RawResponse, Error> {
    io.write_all(&request.encode(endpoint)).await?;
    io.flush().await?;
    trace!(method = request.method, path = %request.path, "request written");

    let mut reader = BufReader::new(io);
    let head = read_head(&mut reader).await?;
    Ok(RawResponse { head, body: reader })
}

/// Parse a status line and headers up to the blank line.
pub async fn read_head<R>(reader: &mut R) -> Result<ResponseHead, Error>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let status_line = read_line(reader).await?;
    let status = parse_status_line(&status_line)?;

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(Error::MalformedResponse("too many headers".into()));
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::MalformedResponse(format!("bad header line: {line:?}")));
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| Error::MalformedResponse(format!("bad header name: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| Error::MalformedResponse(format!("bad header value: {e}")))?;
        headers.append(name, value);
    }

    Ok(ResponseHead { status, headers })
}

async fn read_line<R>(reader: &mut R) -> Result<String, Error>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_HEAD_LINE)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Err(Error::MalformedResponse("connection closed before end of head".into()));
    }
    if buf.last() != Some(&b'\n') {
        return Err(Error::MalformedResponse("head line too long".into()));
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| Error::MalformedResponse("head is not UTF-8".into()))
}

fn parse_status_line(line: &str) -> Result<StatusCode, Error> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(Error::MalformedResponse(format!("bad status line: {line:?}")));
    }
    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| Error::MalformedResponse(format!("bad status line: {line:?}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_head_and_leaves_body() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nX-Csrf-Token: abc\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let head = read_head(&mut reader).await.unwrap();

        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.header("x-csrf-token"), Some("abc"));
        assert_eq!(head.header("X-CSRF-TOKEN"), Some("abc"));
        assert!(head.is_chunked());

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert!(rest.starts_with("5\r\nhello"));
    }

    #[tokio::test]
    async fn duplicate_headers_keep_first_match() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nSet-Cookie: A=1\r\nSet-Cookie: TOKEN=x; Path=/\r\nContent-Length: 0\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let head = read_head(&mut reader).await.unwrap();

        assert_eq!(head.header("set-cookie"), Some("A=1"));
        assert_eq!(head.headers.get_all("set-cookie").iter().count(), 2);
        assert_eq!(head.content_length(), Some(0));
        assert!(!head.is_chunked());
    }

    #[tokio::test]
    async fn rejects_garbage_status_line() {
        let raw: &[u8] = b"SSH-2.0-OpenSSH\r\n\r\n";
        let mut reader = BufReader::new(raw);
        assert!(matches!(
            read_head(&mut reader).await,
            Err(Error::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn truncated_head_is_malformed() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: appl";
        let mut reader = BufReader::new(raw);
        assert!(matches!(
            read_head(&mut reader).await,
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn encodes_request_with_host_and_close() {
        let endpoint = Endpoint {
            secure: true,
            host: "10.0.0.1".into(),
            port: 443,
        };
        let req = RawRequest::get("/x").header("Accept", "application/json");
        let text = String::from_utf8(req.encode(&endpoint)).unwrap();
        assert_eq!(
            text,
            "GET /x HTTP/1.1\r\nHost: 10.0.0.1\r\nAccept: application/json\r\nConnection: close\r\n\r\n"
        );
    }
}
