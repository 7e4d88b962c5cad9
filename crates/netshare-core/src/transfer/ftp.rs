//! Minimal async FTP client and the FTP transfer executor.
//!
//! Only what file push/pull needs is implemented: `USER`/`PASS`, `TYPE I`,
//! `CWD`, `PASV`, `SIZE`, `STOR`, `RETR` and `QUIT`. Data connections are
//! always passive.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::executor::{ProgressReporter, TransferExecutor, TransferJob};
use crate::config::TransferConfig;
use crate::connection::ConnectionProfile;
use crate::error::{Error, Result};

/// A parsed server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit status code
    pub code: u16,
    /// Text of the last reply line
    pub text: String,
}

impl Reply {
    fn parse_code(line: &str) -> Option<u16> {
        line.get(..3)?.parse().ok()
    }
}

/// Enable TCP keep-alive so idle control connections survive NAT timeouts.
fn configure_tcp_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!("Failed to enable TCP keep-alive: {}", e);
    }
}

async fn connect_tcp(addr: impl tokio::net::ToSocketAddrs, label: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::Connectivity(format!("{label} ({e})"))),
        Err(_) => Err(Error::Timeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

/// Control connection to an FTP server.
#[derive(Debug)]
pub struct FtpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    timeout: Duration,
}

impl FtpClient {
    /// Connect and read the `220` greeting.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let label = format!("{host}:{port}");
        let stream = connect_tcp((host, port), &label, timeout).await?;
        configure_tcp_keepalive(&stream);
        let peer = stream.peer_addr()?;
        let (read, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(read),
            writer,
            peer,
            timeout,
        };
        let greeting = client.read_reply().await?;
        expect(&greeting, &[220], "greeting")?;
        tracing::debug!(addr = %peer, "FTP connected: {}", greeting.text);
        Ok(client)
    }

    /// Authenticate. Servers that accept `USER` alone are fine too.
    pub async fn login(&mut self, user: &str, pass: &str) -> Result<()> {
        let reply = self.command(&format!("USER {user}")).await?;
        match reply.code {
            230 => Ok(()),
            331 | 332 => {
                let reply = self.command(&format!("PASS {pass}")).await?;
                expect(&reply, &[230, 202], "login")
            }
            _ => Err(rejected("login", &reply)),
        }
    }

    /// Switch to binary mode.
    pub async fn binary(&mut self) -> Result<()> {
        let reply = self.command("TYPE I").await?;
        expect(&reply, &[200], "TYPE I")
    }

    /// Change the working directory.
    pub async fn cwd(&mut self, dir: &str) -> Result<()> {
        let reply = self.command(&format!("CWD {dir}")).await?;
        expect(&reply, &[250], "CWD")
    }

    /// Size of a remote file, `None` if the server does not say.
    pub async fn size(&mut self, path: &str) -> Result<Option<u64>> {
        let reply = self.command(&format!("SIZE {path}")).await?;
        if reply.code == 213 {
            Ok(reply.text.trim().parse().ok())
        } else {
            Ok(None)
        }
    }

    /// Upload everything `source` yields to `path`.
    ///
    /// `on_progress` receives the running byte count and may abort the
    /// transfer by returning an error.
    pub async fn store<R, F>(
        &mut self,
        path: &str,
        source: &mut R,
        chunk_size: usize,
        mut on_progress: F,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send,
        F: FnMut(u64) -> Result<()> + Send,
    {
        let mut data = self.open_data().await?;
        let reply = self.command(&format!("STOR {path}")).await?;
        expect(&reply, &[125, 150], "STOR")?;

        let written = copy_with_progress(source, &mut data, chunk_size, &mut on_progress).await?;
        data.shutdown().await?;
        drop(data);

        let reply = self.read_reply().await?;
        expect(&reply, &[226, 250], "STOR")?;
        Ok(written)
    }

    /// Download `path` into `sink`.
    pub async fn retrieve<W, F>(
        &mut self,
        path: &str,
        sink: &mut W,
        chunk_size: usize,
        mut on_progress: F,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
        F: FnMut(u64) -> Result<()> + Send,
    {
        let mut data = self.open_data().await?;
        let reply = self.command(&format!("RETR {path}")).await?;
        expect(&reply, &[125, 150], "RETR")?;

        let read = copy_with_progress(&mut data, sink, chunk_size, &mut on_progress).await?;
        sink.flush().await?;
        drop(data);

        let reply = self.read_reply().await?;
        expect(&reply, &[226, 250], "RETR")?;
        Ok(read)
    }

    /// Say goodbye. Errors are ignored; the connection closes either way.
    pub async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            tracing::debug!("FTP QUIT failed: {}", e);
        }
    }

    async fn open_data(&mut self) -> Result<TcpStream> {
        let reply = self.command("PASV").await?;
        expect(&reply, &[227], "PASV")?;
        let mut addr = parse_pasv(&reply.text)
            .ok_or_else(|| Error::Protocol(format!("unparseable PASV reply: {}", reply.text)))?;
        if addr.ip().is_unspecified() {
            addr.set_ip(self.peer.ip());
        }
        connect_tcp(addr, &format!("data channel {addr}"), self.timeout).await
    }

    async fn command(&mut self, command: &str) -> Result<Reply> {
        let shown = if command.starts_with("PASS ") { "PASS ****" } else { command };
        tracing::trace!("FTP > {}", shown);
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line().await?;
        let code = Reply::parse_code(&first)
            .ok_or_else(|| Error::Protocol(format!("malformed reply: {first}")))?;

        let mut last = first;
        if last.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                last = self.read_line().await?;
                if last.starts_with(&terminator) {
                    break;
                }
            }
        }

        let text = last.get(4..).unwrap_or("").to_string();
        tracing::trace!("FTP < {} {}", code, text);
        Ok(Reply { code, text })
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| Error::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)))??;
        if read == 0 {
            return Err(Error::Connectivity(format!(
                "{} closed the control connection",
                self.peer
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

async fn copy_with_progress<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    on_progress: &mut F,
) -> Result<u64>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    F: FnMut(u64) -> Result<()> + Send,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        on_progress(total)?;
    }
    Ok(total)
}

fn expect(reply: &Reply, codes: &[u16], step: &str) -> Result<()> {
    if codes.contains(&reply.code) {
        Ok(())
    } else {
        Err(rejected(step, reply))
    }
}

fn rejected(step: &str, reply: &Reply) -> Error {
    Error::Protocol(format!("{step} rejected: {} {}", reply.code, reply.text))
}

/// Extract the data address from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv(text: &str) -> Option<SocketAddr> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let nums: Vec<u8> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse().ok())
        .collect::<Option<_>>()?;
    let [a, b, c, d, p1, p2] = nums.as_slice() else {
        return None;
    };
    let ip = IpAddr::V4(Ipv4Addr::new(*a, *b, *c, *d));
    Some(SocketAddr::new(ip, (u16::from(*p1) << 8) | u16::from(*p2)))
}

/// Split `dir/name` into its directory (if any) and file name.
fn split_remote(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => (Some("/"), name),
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    }
}

/// Runs transfers against FTP servers, retrying recoverable failures.
#[derive(Debug, Clone)]
pub struct FtpExecutor {
    connect_timeout: Duration,
    retry_attempts: u32,
    retry_backoff: Duration,
    chunk_size: usize,
}

impl FtpExecutor {
    /// Create an executor using the timeouts and retry policy of `config`.
    #[must_use]
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            retry_attempts: config.retry_attempts.max(1),
            retry_backoff: config.retry_backoff,
            chunk_size: config.chunk_size,
        }
    }

    async fn session(&self, endpoint: &ConnectionProfile, remote_path: &str) -> Result<FtpClient> {
        let mut client =
            FtpClient::connect(&endpoint.host, endpoint.port, self.connect_timeout).await?;
        client
            .login(
                endpoint.user.as_deref().unwrap_or("anonymous"),
                endpoint.secret.as_deref().unwrap_or(""),
            )
            .await?;
        client.binary().await?;

        match split_remote(remote_path).0 {
            Some(dir) => client.cwd(dir).await?,
            None => {
                if let Some(dir) = endpoint.remote_path.as_deref().filter(|d| !d.is_empty()) {
                    client.cwd(dir).await?;
                }
            }
        }
        Ok(client)
    }

    async fn upload_once(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        let mut file = File::open(&job.local_path).await?;
        progress.set_total(file.metadata().await?.len());

        let mut client = self.session(&job.endpoint, &job.remote_path).await?;
        let name = split_remote(&job.remote_path).1;
        let sent = client
            .store(name, &mut file, self.chunk_size, |n| {
                progress.report(n);
                progress.check()
            })
            .await?;
        client.quit().await;
        Ok(sent)
    }

    async fn download_once(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        let mut client = self.session(&job.endpoint, &job.remote_path).await?;
        let name = split_remote(&job.remote_path).1;
        if let Some(size) = client.size(name).await? {
            progress.set_total(size);
        }

        if let Some(parent) = job.local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(&job.local_path).await?;
        let received = client
            .retrieve(name, &mut file, self.chunk_size, |n| {
                progress.report(n);
                progress.check()
            })
            .await?;
        client.quit().await;
        Ok(received)
    }

    async fn with_retries<'a, F, Fut>(&self, job: &'a TransferJob, progress: &'a ProgressReporter, attempt_fn: F) -> Result<u64>
    where
        F: Fn(&'a TransferJob, &'a ProgressReporter) -> Fut,
        Fut: std::future::Future<Output = Result<u64>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn(job, progress).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_recoverable() && attempt < self.retry_attempts && !progress.is_stopped() => {
                    tracing::warn!(
                        task_id = %job.task_id,
                        attempt,
                        "FTP transfer attempt failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl TransferExecutor for FtpExecutor {
    async fn upload(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        self.with_retries(job, progress, |job, progress| self.upload_once(job, progress))
            .await
    }

    async fn download(&self, job: &TransferJob, progress: &ProgressReporter) -> Result<u64> {
        self.with_retries(job, progress, |job, progress| self.download_once(job, progress))
            .await
    }
}
