//! HTTPS transport: `GET https://<host>[:port]<remote_path>`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::ExposeSecret;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{Credentials, HostKeyPolicy, RemoteHost, Transport, check_length};
use crate::identity::RemotePath;
use crate::{Error, Result};

/// Fetches remote files over HTTPS.
///
/// Password credentials are sent as basic auth, bearer tokens as an
/// `Authorization: Bearer` header. Certificates are checked against the
/// system roots unless the policy is `insecure-accept-any`; known_hosts files
/// and fingerprint pins only apply to sftp and are refused here.
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    client: Client,
    scheme: &'static str,
}

impl HttpsTransport {
    /// Create a transport whose certificate checks follow `policy`.
    pub fn new(policy: &HostKeyPolicy) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        match policy {
            HostKeyPolicy::KnownHosts { path: None } => {}
            HostKeyPolicy::KnownHosts { path: Some(_) } | HostKeyPolicy::Fingerprint { .. } => {
                return Err(Error::configuration(
                    "host_key known_hosts files and fingerprints require protocol = \"sftp\"",
                ));
            }
            HostKeyPolicy::InsecureAcceptAny => {
                warn!("TLS certificate verification disabled by configuration");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            scheme: "https",
        })
    }

    /// Talk plain HTTP to a local test server.
    #[cfg(test)]
    fn plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    /// Request URL for `remote_path`, one percent-encoded segment per path
    /// component so `?`, `#` and `%` in file names stay part of the path.
    fn url(&self, host: &RemoteHost, remote_path: &RemotePath) -> Result<Url> {
        let base = match host.port {
            Some(port) => format!("{}://{}:{port}", self.scheme, host.host),
            None => format!("{}://{}", self.scheme, host.host),
        };
        let mut url = Url::parse(&base)
            .map_err(|e| Error::configuration(format!("invalid remote host '{}': {e}", host.host)))?;
        url.path_segments_mut()
            .map_err(|()| {
                Error::configuration(format!("remote host '{}' cannot carry a path", host.host))
            })?
            .clear()
            .extend(remote_path.as_str().split('/').skip(1));
        Ok(url)
    }
}

/// Error for a non-success response, `None` when the body should be read.
fn map_status(status: StatusCode, host: &RemoteHost, remote_path: &RemotePath) -> Option<Error> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(Error::authentication_failed(
            &host.host,
            format!("server answered HTTP {status}"),
        ));
    }
    if status == StatusCode::NOT_FOUND {
        return Some(Error::remote_not_found(&host.host, remote_path.as_str()));
    }
    if !status.is_success() {
        return Some(Error::transport(format!(
            "GET {remote_path} on {} returned HTTP {status}",
            host.host
        )));
    }
    None
}

#[async_trait]
impl Transport for HttpsTransport {
    fn name(&self) -> &'static str {
        "https"
    }

    async fn copy_to_local(
        &self,
        host: &RemoteHost,
        remote_path: &RemotePath,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u64> {
        let url = self.url(host, remote_path)?;
        debug!(%url, "Requesting remote file");

        let mut request = self.client.get(url.clone()).timeout(timeout);
        request = match &host.credentials {
            Credentials::None => request,
            Credentials::Password { password } => request.basic_auth(
                host.user.as_deref().unwrap_or_default(),
                Some(password.expose_secret()),
            ),
            Credentials::Bearer { token } => request.bearer_auth(token.expose_secret()),
            Credentials::KeyFile { .. } => {
                return Err(Error::configuration(
                    "key file credentials are only supported over sftp",
                ));
            }
        };

        let mut response = request
            .send()
            .await
            .map_err(|e| Error::transport(format!("GET {url} failed: {e}")))?;

        if let Some(err) = map_status(response.status(), host, remote_path) {
            return Err(err);
        }

        let expected = response.content_length();
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(dest)
            .await
            .map_err(|e| Error::cache_io(e, dest, "open"))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::transport(format!("reading {url} failed: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::cache_io(e, dest, "write"))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| Error::cache_io(e, dest, "flush"))?;

        check_length(expected, written, remote_path)?;
        debug!(%url, bytes = written, "Remote file copied");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn transport() -> HttpsTransport {
        HttpsTransport::new(&HostKeyPolicy::default()).unwrap()
    }

    /// Answer one request with `response` and hand back the request line.
    async fn serve_once(response: Vec<u8>) -> (RemoteHost, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        });
        let mut host = RemoteHost::new("127.0.0.1");
        host.port = Some(port);
        (host, handle)
    }

    async fn copy(host: &RemoteHost, path: &str) -> (Result<u64>, Vec<u8>) {
        let dest = tempfile::NamedTempFile::new().unwrap();
        let result = transport()
            .plain_http()
            .copy_to_local(
                host,
                &RemotePath::from(path),
                dest.path(),
                Duration::from_secs(5),
            )
            .await;
        (result, std::fs::read(dest.path()).unwrap())
    }

    #[test]
    fn test_url_with_and_without_port() {
        let mut host = RemoteHost::new("media.example.com");
        let path = RemotePath::from("/remote/demos/foo.mp3");
        assert_eq!(
            transport().url(&host, &path).unwrap().as_str(),
            "https://media.example.com/remote/demos/foo.mp3"
        );
        host.port = Some(8443);
        assert_eq!(
            transport().url(&host, &path).unwrap().as_str(),
            "https://media.example.com:8443/remote/demos/foo.mp3"
        );
    }

    #[test]
    fn test_url_keeps_reserved_characters_in_the_path() {
        let host = RemoteHost::new("media.example.com");
        let url = |p: &str| transport().url(&host, &RemotePath::from(p)).unwrap();

        let hash = url("/remote/demos/foo#1.mp3");
        assert_eq!(hash.path(), "/remote/demos/foo%231.mp3");
        assert_eq!(hash.fragment(), None);

        let query = url("/remote/demos/what?.mp3");
        assert_eq!(query.path(), "/remote/demos/what%3F.mp3");
        assert_eq!(query.query(), None);

        let percent = url("/remote/demos/100%25.mp3");
        assert_eq!(percent.path(), "/remote/demos/100%2525.mp3");

        let space = url("/remote/my demos/a b.mp3");
        assert_eq!(space.path(), "/remote/my%20demos/a%20b.mp3");
    }

    #[test]
    fn test_builds_with_supported_policies() {
        assert!(HttpsTransport::new(&HostKeyPolicy::default()).is_ok());
        assert!(HttpsTransport::new(&HostKeyPolicy::InsecureAcceptAny).is_ok());
    }

    #[test]
    fn test_rejects_sftp_only_policies() {
        let pinned = HostKeyPolicy::Fingerprint {
            sha256: "deadbeef".to_string(),
        };
        assert!(matches!(
            HttpsTransport::new(&pinned),
            Err(Error::Configuration { .. })
        ));
        let known_hosts = HostKeyPolicy::KnownHosts {
            path: Some("/etc/ssh/ssh_known_hosts".into()),
        };
        assert!(matches!(
            HttpsTransport::new(&known_hosts),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_map_status() {
        let host = RemoteHost::new("media.example.com");
        let path = RemotePath::from("/r/a.mp3");
        let map = |code: u16| map_status(StatusCode::from_u16(code).unwrap(), &host, &path);

        assert!(map(200).is_none());
        assert!(map(204).is_none());
        assert!(matches!(map(401), Some(Error::AuthenticationFailed { .. })));
        assert!(matches!(map(403), Some(Error::AuthenticationFailed { .. })));
        assert!(matches!(map(404), Some(Error::RemoteNotFound { .. })));
        assert!(matches!(map(500), Some(Error::Transport { .. })));
        assert!(matches!(map(503), Some(Error::Transport { .. })));
        assert!(matches!(map(302), Some(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_copies_body_from_encoded_path() {
        let (host, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello".to_vec(),
        )
        .await;

        let (result, contents) = copy(&host, "/remote/demos/foo#1.mp3").await;
        assert_eq!(result.unwrap(), 5);
        assert_eq!(contents, b"hello");
        assert_eq!(
            server.await.unwrap(),
            "GET /remote/demos/foo%231.mp3 HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_short_body_is_transport_error() {
        let (host, _server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nonly ten b".to_vec(),
        )
        .await;

        let (result, _) = copy(&host, "/r/a.mp3").await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_missing_remote_file() {
        let (host, _server) = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;

        let (result, contents) = copy(&host, "/r/a.mp3").await;
        assert!(matches!(result, Err(Error::RemoteNotFound { .. })));
        assert!(contents.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let (mut host, _server) = serve_once(
            b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_vec(),
        )
        .await;
        host.user = Some("replays".to_string());
        host.credentials = Credentials::password("wrong".to_string());

        let (result, _) = copy(&host, "/r/a.mp3").await;
        assert!(matches!(result, Err(Error::AuthenticationFailed { .. })));
    }

    #[tokio::test]
    async fn test_key_file_credentials_rejected() {
        let mut host = RemoteHost::new("127.0.0.1");
        host.credentials = Credentials::key_file("/nonexistent".into(), None);
        let temp = tempfile::NamedTempFile::new().unwrap();

        let err = transport()
            .copy_to_local(
                &host,
                &RemotePath::from("/a.mp3"),
                temp.path(),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
