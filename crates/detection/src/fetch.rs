use crate::error::FetchError;
use common::span_debug;
use std::io::{self, Read};
use std::time::{Duration, Instant};
use url::Url;

const CHUNK_SIZE: usize = 64 * 1024;

/// Downloads source images with bounded time and size.
///
/// `timeout` caps the whole download, from connect to the last body byte.
#[derive(Clone)]
pub struct ImageFetcher {
    agent: ureq::Agent,
    timeout: Duration,
    max_bytes: u64,
}

impl ImageFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self {
            agent,
            timeout,
            max_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocking download of `raw_url`.
    pub fn fetch(&self, raw_url: &str) -> Result<Vec<u8>, FetchError> {
        let url = parse_url(raw_url)?;
        let _s = span_debug!("fetch_image", host = url.host_str().unwrap_or_default());
        let deadline = Instant::now() + self.timeout;

        let response = self.agent.get(url.as_str()).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => FetchError::Status(code),
            ureq::Error::Transport(t) => FetchError::Request(t.to_string()),
        })?;

        // One byte past the limit is enough to tell an oversized body apart.
        let mut reader = response.into_reader().take(self.max_bytes.saturating_add(1));
        let bytes = self.read_body(&mut reader, deadline)?;

        if bytes.len() as u64 > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }
        if bytes.is_empty() {
            return Err(FetchError::Empty);
        }

        tracing::debug!(url = %url, bytes = bytes.len(), "Downloaded image");
        Ok(bytes)
    }

    /// Read the body in chunks, giving up once `deadline` has passed.
    fn read_body(&self, reader: &mut impl Read, deadline: Instant) -> Result<Vec<u8>, FetchError> {
        let mut bytes = Vec::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];

        loop {
            if Instant::now() >= deadline {
                return Err(FetchError::TimedOut(self.timeout));
            }
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(bytes),
                Ok(n) => bytes.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                    return Err(FetchError::TimedOut(self.timeout));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::UnsupportedScheme(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned HTTP response on a random local port.
    fn serve_once(status: &str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        });

        format!("http://{addr}/image.png")
    }

    fn fetcher(max_bytes: u64) -> ImageFetcher {
        ImageFetcher::new(Duration::from_secs(2), max_bytes)
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            fetcher(1024).fetch("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_unsupported_scheme() {
        match fetcher(1024).fetch("ftp://example.com/cat.png") {
            Err(FetchError::UnsupportedScheme(scheme)) => assert_eq!(scheme, "ftp"),
            other => panic!("expected UnsupportedScheme, got {other:?}"),
        }
    }

    #[test]
    fn test_downloads_body() {
        let url = serve_once("200 OK", b"image bytes".to_vec());
        assert_eq!(fetcher(1024).fetch(&url).unwrap(), b"image bytes");
    }

    #[test]
    fn test_http_status_error() {
        let url = serve_once("404 Not Found", b"nope".to_vec());
        assert!(matches!(fetcher(1024).fetch(&url), Err(FetchError::Status(404))));
    }

    #[test]
    fn test_size_limit() {
        let url = serve_once("200 OK", vec![7u8; 64]);
        assert!(matches!(
            fetcher(32).fetch(&url),
            Err(FetchError::TooLarge { limit: 32 })
        ));
    }

    #[test]
    fn test_empty_body() {
        let url = serve_once("200 OK", Vec::new());
        assert!(matches!(fetcher(32).fetch(&url), Err(FetchError::Empty)));
    }

    /// Test a server that trickles the body slower than the deadline allows
    ///
    /// Tests:
    /// - Per-read progress does not extend the overall limit
    /// - The failure is reported as a timeout
    #[test]
    fn test_slow_body_hits_overall_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 20\r\nConnection: close\r\n\r\n");
            for _ in 0..20 {
                if stream.write_all(b"x").and_then(|_| stream.flush()).is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(100));
            }
        });

        let fetcher = ImageFetcher::new(Duration::from_millis(300), 1024);
        let start = Instant::now();
        let result = fetcher.fetch(&format!("http://{addr}/slow.png"));

        assert!(matches!(result, Err(FetchError::TimedOut(_))), "got {result:?}");
        assert!(start.elapsed() < Duration::from_secs(1), "took {:?}", start.elapsed());
    }

    #[test]
    fn test_unbounded_size_limit() {
        let url = serve_once("200 OK", b"image bytes".to_vec());
        assert_eq!(fetcher(u64::MAX).fetch(&url).unwrap(), b"image bytes");
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            fetcher(32).fetch(&format!("http://{addr}/")),
            Err(FetchError::Request(_))
        ));
    }
}
