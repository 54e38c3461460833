//! SFTP transport over an SSH session (libssh2).
//!
//! libssh2 is blocking, so each copy runs on tokio's blocking pool. The
//! session timeout bounds every individual SSH operation and an explicit
//! deadline bounds the transfer as a whole. Dropping the copy future cancels
//! the worker, which then disconnects after the read in progress.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use ssh2::{CheckResult, ErrorCode, HashType, KnownHostFileKind, Session};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Credentials, HostKeyPolicy, RemoteHost, Transport, check_length};
use crate::identity::RemotePath;
use crate::{Error, Result};

const DEFAULT_PORT: u16 = 22;
const CHUNK_SIZE: usize = 64 * 1024;

/// `LIBSSH2_FX_NO_SUCH_FILE`
const FX_NO_SUCH_FILE: i32 = 2;
/// `LIBSSH2_FX_PERMISSION_DENIED`
const FX_PERMISSION_DENIED: i32 = 3;

/// Fetches remote files over SFTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct SftpTransport;

impl SftpTransport {
    /// Create an SFTP transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SftpTransport {
    fn name(&self) -> &'static str {
        "sftp"
    }

    async fn copy_to_local(
        &self,
        host: &RemoteHost,
        remote_path: &RemotePath,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u64> {
        let host = host.clone();
        let remote_path = remote_path.clone();
        let dest = dest.to_path_buf();
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        tokio::task::spawn_blocking(move || {
            copy_blocking(&host, &remote_path, &dest, timeout, &cancel)
        })
        .await
        .map_err(|e| Error::transport(format!("sftp worker failed: {e}")))?
    }
}

/// Disconnects the session however the copy ends.
struct SessionGuard {
    session: Session,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "transfer finished", None) {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}

fn copy_blocking(
    host: &RemoteHost,
    remote_path: &RemotePath,
    dest: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<u64> {
    let deadline = Instant::now() + timeout;
    let guard = connect(host, timeout)?;
    let session = &guard.session;

    verify_host_key(session, host)?;
    authenticate(session, host)?;
    keep_going(deadline, cancel, remote_path, timeout)?;

    let sftp = session
        .sftp()
        .map_err(|e| Error::transport(format!("opening sftp channel failed: {e}")))?;
    let mut remote = sftp
        .open(Path::new(remote_path.as_str()))
        .map_err(|e| map_open_error(&e, host, remote_path))?;
    let expected = remote.stat().ok().and_then(|stat| stat.size);

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(dest)
        .map_err(|e| Error::cache_io(e, dest, "open"))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    loop {
        keep_going(deadline, cancel, remote_path, timeout)?;
        let n = remote
            .read(&mut buf)
            .map_err(|e| Error::transport(format!("reading {remote_path} failed: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| Error::cache_io(e, dest, "write"))?;
        written += n as u64;
    }
    file.flush().map_err(|e| Error::cache_io(e, dest, "flush"))?;

    check_length(expected, written, remote_path)?;
    debug!(host = %host.host, %remote_path, bytes = written, "Remote file copied");
    Ok(written)
}

/// Stop once the caller went away or the deadline passed.
fn keep_going(
    deadline: Instant,
    cancel: &CancellationToken,
    remote_path: &RemotePath,
    timeout: Duration,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::transport(format!("transfer of {remote_path} was cancelled")));
    }
    if Instant::now() >= deadline {
        return Err(Error::transport(format!(
            "transfer of {remote_path} exceeded {}s",
            timeout.as_secs()
        )));
    }
    Ok(())
}

fn connect(host: &RemoteHost, timeout: Duration) -> Result<SessionGuard> {
    let port = host.port.unwrap_or(DEFAULT_PORT);
    let addrs = (host.host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| Error::transport(format!("resolving {}:{port} failed: {e}", host.host)))?;

    let mut last_error = None;
    let mut tcp = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }
    let tcp = tcp.ok_or_else(|| {
        Error::transport(format!(
            "connecting to {}:{port} failed: {}",
            host.host,
            last_error.map_or_else(|| "no addresses".to_string(), |e| e.to_string())
        ))
    })?;

    let mut session =
        Session::new().map_err(|e| Error::transport(format!("creating SSH session failed: {e}")))?;
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| Error::transport(format!("SSH handshake with {} failed: {e}", host.host)))?;
    Ok(SessionGuard { session })
}

fn verify_host_key(session: &Session, host: &RemoteHost) -> Result<()> {
    match &host.host_key {
        HostKeyPolicy::InsecureAcceptAny => {
            warn!(host = %host.host, "Host key verification disabled by configuration");
            Ok(())
        }
        HostKeyPolicy::Fingerprint { sha256 } => {
            let actual = session
                .host_key_hash(HashType::Sha256)
                .map(hex::encode)
                .ok_or_else(|| Error::authentication_failed(&host.host, "no host key presented"))?;
            if normalize_fingerprint(sha256) == actual {
                Ok(())
            } else {
                Err(Error::authentication_failed(
                    &host.host,
                    format!("host key fingerprint {actual} does not match configuration"),
                ))
            }
        }
        policy @ HostKeyPolicy::KnownHosts { .. } => {
            let file = policy.known_hosts_file().ok_or_else(|| {
                Error::configuration("cannot locate known_hosts: no home directory")
            })?;
            let (key, _) = session
                .host_key()
                .ok_or_else(|| Error::authentication_failed(&host.host, "no host key presented"))?;
            let mut known = session
                .known_hosts()
                .map_err(|e| Error::transport(format!("known_hosts init failed: {e}")))?;
            known
                .read_file(&file, KnownHostFileKind::OpenSSH)
                .map_err(|e| {
                    Error::configuration(format!("reading {} failed: {e}", file.display()))
                })?;

            match known.check_port(&host.host, host.port.unwrap_or(DEFAULT_PORT), key) {
                CheckResult::Match => Ok(()),
                CheckResult::Mismatch => Err(Error::authentication_failed(
                    &host.host,
                    "host key does not match known_hosts",
                )),
                CheckResult::NotFound => Err(Error::authentication_failed(
                    &host.host,
                    format!("host is not listed in {}", file.display()),
                )),
                CheckResult::Failure => Err(Error::authentication_failed(
                    &host.host,
                    "known_hosts check failed",
                )),
            }
        }
    }
}

fn authenticate(session: &Session, host: &RemoteHost) -> Result<()> {
    let user = host.user.as_deref().unwrap_or_default();
    let outcome = match &host.credentials {
        Credentials::None => session.userauth_agent(user),
        Credentials::Password { password } => {
            session.userauth_password(user, password.expose_secret())
        }
        Credentials::KeyFile {
            private_key,
            passphrase,
        } => session.userauth_pubkey_file(
            user,
            None,
            private_key,
            passphrase.as_ref().map(|p| p.expose_secret()),
        ),
        Credentials::Bearer { .. } => {
            return Err(Error::configuration(
                "bearer credentials are only supported over https",
            ));
        }
    };

    match outcome {
        Ok(()) if session.authenticated() => Ok(()),
        Ok(()) => Err(Error::authentication_failed(&host.host, "login incomplete")),
        Err(e) => Err(Error::authentication_failed(&host.host, e.message().to_string())),
    }
}

fn map_open_error(err: &ssh2::Error, host: &RemoteHost, remote_path: &RemotePath) -> Error {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) => {
            Error::remote_not_found(&host.host, remote_path.as_str())
        }
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => Error::authentication_failed(
            &host.host,
            format!("permission denied for {remote_path}"),
        ),
        _ => Error::transport(format!("opening {remote_path} failed: {err}")),
    }
}

/// Lowercase hex digits only, so `AB:CD` and `abcd` compare equal.
fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
