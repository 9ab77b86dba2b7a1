//! Delivery of one request to a backend and retrieval of its response.
//!
//! A [`Channel`] owns a single backend connection. At most one request may
//! be in flight on it at a time; an internal mutex serializes callers around
//! the whole compose/send/resolve sequence so request ids stay unambiguous
//! as correlation keys. Responses arrive either echoed on the same
//! connection, or through a shared response region named by the request id
//! that the backend populates out of band.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::protocol::{QueryRequest, QueryResponse};

/// Timeouts and retry bounds, explicit rather than buried in the poll loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Wall-clock bound on waiting for a response, either mode.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Sleep between poll iterations against a shared region.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attach attempts beyond the first before giving up on a region.
    /// A missing region is indistinguishable from an allocation race, so
    /// the first few failures are retried.
    #[serde(default = "default_max_attach_retries")]
    pub max_attach_retries: u32,
}

fn default_response_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_max_attach_retries() -> u32 {
    3
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attach_retries: default_max_attach_retries(),
        }
    }
}

impl ChannelConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path.as_ref())?;
        serde_yaml::from_reader(file)
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Where the response for a sent request comes from.
#[derive(Debug, Clone)]
pub enum ResponseMode {
    /// Echoed back on the same connection, length-prefix framed.
    Socket,
    /// Written by the backend into a region file named by the decimal
    /// request id under this directory.
    SharedRegion { dir: PathBuf },
}

/// Lifecycle of one outstanding request, for logging and postmortems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Composed,
    Sent,
    AwaitingResponse,
    Resolved,
    TimedOut,
    Failed,
}

struct ChannelInner<T> {
    conn: T,
    /// Set after a request id mismatch: the stream is desynchronized and
    /// nothing on it can be trusted until the caller reconnects.
    broken: bool,
}

pub struct Channel<T: Read + Write> {
    name: String,
    inner: Mutex<ChannelInner<T>>,
    mode: ResponseMode,
    config: ChannelConfig,
}

impl Channel<UnixStream> {
    /// Dials the conventional local socket `/tmp/<name>`.
    pub fn connect(name: &str, mode: ResponseMode, config: ChannelConfig) -> Result<Self, Error> {
        let path = format!("/tmp/{}", name);
        let stream = UnixStream::connect(&path)
            .map_err(|e| Error::ChannelUnavailable(format!("connect {}: {}", path, e)))?;
        stream.set_read_timeout(Some(config.response_timeout()))?;
        stream.set_write_timeout(Some(config.response_timeout()))?;
        Ok(Self::from_connection(name, stream, mode, config))
    }
}

impl<T: Read + Write> Channel<T> {
    pub fn from_connection(name: &str, conn: T, mode: ResponseMode, config: ChannelConfig) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(ChannelInner { conn, broken: false }),
            mode,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends one request and blocks until its response resolves, times out,
    /// or fails. Holding the internal lock for the whole exchange is what
    /// makes the request id a safe correlation key.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse, Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.broken {
            return Err(Error::ChannelUnavailable(format!(
                "channel {} is desynchronized, reconnect before reuse",
                self.name
            )));
        }

        let payload = request.encode();
        debug!(
            "channel {}: request {} {:?}",
            self.name,
            request.request_id,
            RequestState::Composed
        );

        let mut frame = Vec::with_capacity(4 + payload.len());
        let mut len_arr = [0u8; 4];
        BigEndian::write_u32(&mut len_arr, payload.len() as u32);
        frame.extend_from_slice(&len_arr);
        frame.extend_from_slice(&payload);
        inner.conn.write_all(&frame).map_err(map_io_timeout)?;
        inner.conn.flush().map_err(map_io_timeout)?;
        debug!("channel {}: request {} {:?}", self.name, request.request_id, RequestState::Sent);

        let result = match &self.mode {
            ResponseMode::Socket => self.receive_socket(&mut inner.conn, request.request_id),
            ResponseMode::SharedRegion { dir } => self.receive_region(dir, request.request_id),
        };

        let terminal = match &result {
            Ok(_) => RequestState::Resolved,
            Err(Error::TimedOut) => RequestState::TimedOut,
            Err(_) => RequestState::Failed,
        };
        debug!("channel {}: request {} {:?}", self.name, request.request_id, terminal);

        if let Err(Error::RequestIdMismatch { sent, received }) = &result {
            warn!(
                "channel {}: response for request {} while {} was in flight, marking channel broken",
                self.name, received, sent
            );
            inner.broken = true;
        }
        result
    }

    fn receive_socket(&self, conn: &mut T, request_id: u32) -> Result<QueryResponse, Error> {
        debug!("channel {}: request {} {:?}", self.name, request_id, RequestState::AwaitingResponse);
        let mut len_arr = [0u8; 4];
        conn.read_exact(&mut len_arr).map_err(map_io_timeout)?;
        let len = BigEndian::read_u32(&len_arr) as usize;
        let mut payload = vec![0u8; len];
        conn.read_exact(&mut payload).map_err(map_io_timeout)?;

        let response = QueryResponse::decode(&payload)?;
        if response.request_id != request_id {
            return Err(Error::RequestIdMismatch {
                sent: request_id,
                received: response.request_id,
            });
        }
        Ok(response)
    }

    /// Poll-lock-check-unlock cycle against the region file the backend
    /// allocates for this request id. The attach retry bound and the
    /// wall-clock deadline are independent: the first covers allocation
    /// races, the second covers a backend that attached but never writes.
    fn receive_region(&self, dir: &Path, request_id: u32) -> Result<QueryResponse, Error> {
        let path = dir.join(request_id.to_string());
        debug!("channel {}: request {} {:?}", self.name, request_id, RequestState::AwaitingResponse);

        let mut attempts = 0u32;
        let file = loop {
            match File::open(&path) {
                Ok(file) => break file,
                Err(e) => {
                    if attempts >= self.config.max_attach_retries {
                        return Err(Error::ChannelUnavailable(format!(
                            "could not attach response region {} after {} attempts: {}",
                            path.display(),
                            attempts + 1,
                            e
                        )));
                    }
                    attempts += 1;
                    thread::sleep(self.config.poll_interval());
                }
            }
        };

        let deadline = Instant::now() + self.config.response_timeout();
        loop {
            let snapshot = read_region_snapshot(&file)?;
            if let Some(bytes) = snapshot {
                let candidate = BigEndian::read_u32(&bytes[..4]);
                if candidate != 0 {
                    if candidate != request_id {
                        return Err(Error::RequestIdMismatch {
                            sent: request_id,
                            received: candidate,
                        });
                    }
                    return QueryResponse::decode(&bytes);
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::TimedOut);
            }
            thread::sleep(self.config.poll_interval());
        }
        // `file` and every mapping of it are dropped on all paths above,
        // so no attachment outlives the request.
    }
}

/// Copies the region contents out under a shared lock. `None` while the
/// region is still too small to carry a request id.
fn read_region_snapshot(file: &File) -> Result<Option<Vec<u8>>, Error> {
    fs2::FileExt::lock_shared(file)?;
    let result: Result<Option<Vec<u8>>, Error> = (|| {
        let len = file.metadata()?.len();
        if len < 4 {
            return Ok(None);
        }
        let mapping = unsafe { Mmap::map(file) }?;
        Ok(Some(mapping.to_vec()))
    })();
    let unlocked = fs2::FileExt::unlock(file);
    let snapshot = result?;
    unlocked?;
    Ok(snapshot)
}

fn map_io_timeout(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::TimedOut,
        _ => Error::Io(e),
    }
}
