//! HTTP client adapter.
//!
//! Implements [`HttpClient`]: one request, one response, no retries.
//!
//! - **`target_os = "espidf"`**: [`EspHttpClient`] over `esp_http_client`,
//!   with the IDF certificate bundle attached for `https://` URLs.
//! - **all other targets**: [`StdHttpClient`], plain HTTP/1.1 over a
//!   `TcpStream` for the host simulation.  `https://` is refused.

#[cfg(target_os = "espidf")]
pub use esp::EspHttpClient;

#[cfg(not(target_os = "espidf"))]
pub use host::StdHttpClient;

/// Upper bound on a buffered response body.
pub const MAX_RESPONSE_LEN: usize = 16 * 1024;

// ───────────────────────────────────────────────────────────────
// Host
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod host {
    use core::time::Duration;
    use std::io::{self, BufRead, BufReader, Read, Write};
    use std::net::{TcpStream, ToSocketAddrs};

    use log::debug;

    use super::MAX_RESPONSE_LEN;
    use crate::app::ports::{HttpClient, HttpResponse};
    use crate::transport::{ContentType, Method, TransportError};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct StdHttpClient;

    impl StdHttpClient {
        pub fn new() -> Self {
            Self
        }
    }

    /// `http://host[:port]/path?q` → (`host:port`, `host`, `/path?q`).
    pub(super) fn split_url(url: &str) -> Result<(String, &str, &str), TransportError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or(TransportError::InvalidArgument)?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(TransportError::InvalidArgument);
        }
        let host = authority.split(':').next().unwrap_or(authority);
        let addr = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        Ok((addr, host, path))
    }

    fn io_error(e: io::Error) -> TransportError {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectFailed,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportError::ConnectionReset,
            _ => TransportError::Failed,
        }
    }

    pub(super) fn parse_status(line: &str) -> Result<u16, TransportError> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(v), Some(code)) if v.starts_with("HTTP/1.") => {
                code.parse().map_err(|_| TransportError::InvalidResponse)
            }
            _ => Err(TransportError::InvalidResponse),
        }
    }

    impl HttpClient for StdHttpClient {
        fn perform(
            &self,
            method: Method,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
            content_type: ContentType,
            timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            let (addr, host, path) = split_url(url)?;
            let sock = addr
                .to_socket_addrs()
                .map_err(|_| TransportError::DnsFailed)?
                .next()
                .ok_or(TransportError::DnsFailed)?;
            let mut stream = TcpStream::connect_timeout(&sock, timeout).map_err(io_error)?;
            stream.set_read_timeout(Some(timeout)).map_err(io_error)?;
            stream.set_write_timeout(Some(timeout)).map_err(io_error)?;

            let mut head = format!(
                "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
                method.as_str(),
                path,
                host,
                content_type.mime(),
                body.len()
            );
            for (k, v) in headers {
                head.push_str(k);
                head.push_str(": ");
                head.push_str(v);
                head.push_str("\r\n");
            }
            head.push_str("\r\n");
            stream.write_all(head.as_bytes()).map_err(io_error)?;
            stream.write_all(body).map_err(io_error)?;

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).map_err(io_error)?;
            let status = parse_status(&line)?;

            let mut content_length: Option<usize> = None;
            loop {
                line.clear();
                if reader.read_line(&mut line).map_err(io_error)? == 0 {
                    break;
                }
                let l = line.trim_end();
                if l.is_empty() {
                    break;
                }
                if let Some((k, v)) = l.split_once(':') {
                    if k.eq_ignore_ascii_case("content-length") {
                        content_length = v.trim().parse().ok();
                    }
                }
            }

            let mut body = Vec::new();
            let limit = content_length.unwrap_or(MAX_RESPONSE_LEN).min(MAX_RESPONSE_LEN);
            reader
                .take(limit as u64)
                .read_to_end(&mut body)
                .map_err(io_error)?;
            debug!("HTTP(host): {} {} -> {}", method.as_str(), path, status);
            Ok(HttpResponse { status, body })
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use core::time::Duration;

    use esp_idf_svc::http::Method as EspMethod;
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
    use log::debug;

    use super::MAX_RESPONSE_LEN;
    use crate::app::ports::{HttpClient, HttpResponse};
    use crate::transport::{ContentType, Method, TransportError};

    #[derive(Debug, Default, Clone, Copy)]
    pub struct EspHttpClient;

    impl EspHttpClient {
        pub fn new() -> Self {
            Self
        }
    }

    fn map_method(m: Method) -> EspMethod {
        match m {
            Method::Get => EspMethod::Get,
            Method::Post => EspMethod::Post,
            Method::Put => EspMethod::Put,
            Method::Delete => EspMethod::Delete,
            Method::Patch => EspMethod::Patch,
        }
    }

    fn map_err(e: esp_idf_svc::sys::EspError) -> TransportError {
        use esp_idf_svc::sys::*;
        match e.code() as u32 {
            ESP_ERR_HTTP_EAGAIN | ESP_ERR_TIMEOUT => TransportError::Timeout,
            ESP_ERR_HTTP_CONNECT => TransportError::ConnectFailed,
            ESP_ERR_HTTP_CONNECTION_CLOSED => TransportError::ConnectionReset,
            ESP_ERR_NO_MEM => TransportError::NoMemory,
            ESP_ERR_INVALID_ARG => TransportError::InvalidArgument,
            ESP_ERR_ESP_TLS_CANNOT_RESOLVE_HOSTNAME => TransportError::DnsFailed,
            ESP_ERR_ESP_TLS_FAILED_CONNECT_TO_HOST => TransportError::ConnectFailed,
            ESP_ERR_MBEDTLS_SSL_HANDSHAKE_FAILED => TransportError::TlsFailed,
            _ => TransportError::Failed,
        }
    }

    impl HttpClient for EspHttpClient {
        fn perform(
            &self,
            method: Method,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
            content_type: ContentType,
            timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            let mut conn = EspHttpConnection::new(&Configuration {
                timeout: Some(timeout),
                crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                ..Default::default()
            })
            .map_err(map_err)?;

            let len = body.len().to_string();
            let mut all: Vec<(&str, &str)> = Vec::with_capacity(headers.len() + 2);
            all.push(("Content-Type", content_type.mime()));
            all.push(("Content-Length", len.as_str()));
            all.extend_from_slice(headers);

            conn.initiate_request(map_method(method), url, &all)
                .map_err(map_err)?;
            if !body.is_empty() {
                let mut sent = 0;
                while sent < body.len() {
                    sent += conn.write(&body[sent..]).map_err(map_err)?;
                }
            }
            conn.initiate_response().map_err(map_err)?;
            let status = conn.status();

            let mut out = Vec::new();
            let mut buf = [0u8; 512];
            loop {
                let n = conn.read(&mut buf).map_err(map_err)?;
                if n == 0 {
                    break;
                }
                if out.len() + n > MAX_RESPONSE_LEN {
                    return Err(TransportError::InvalidResponse);
                }
                out.extend_from_slice(&buf[..n]);
            }
            debug!("HTTP: {} {} -> {}", method.as_str(), url, status);
            Ok(HttpResponse { status, body: out })
        }
    }
}
