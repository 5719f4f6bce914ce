//! SFTP server session: dispatcher, request handlers, lifecycle.
//!
//! One session serves one channel. Inbound packets are parsed and routed in
//! arrival order; the backend work for each request runs on its own task so
//! independent handles proceed in parallel. Requests bound to the same
//! handle are serialized through the handle's `locked` flag and FIFO queue:
//! at most one backend call per handle is ever in flight, and the next
//! queued request starts only after the previous response has been sent.
//!
//! Error tiers:
//!
//! 1. Backend errors become `STATUS` responses via the status taxonomy; the
//!    session continues.
//! 2. Faults inside one request (malformed payload, codec overflow) are
//!    caught, logged in full, and answered `FAILURE` "Internal server
//!    error"; the session continues.
//! 3. Faults while accepting a request (truncated header) emit
//!    [`SessionEvent::Error`] and tear the session down.

use crate::sftp::channel::{ChannelError, ChannelEvent, MessageChannel};
use crate::sftp::codec::{PacketReader, PacketWriter, MAX_READ_LEN, READDIR_BUDGET};
use crate::sftp::fs::{FileHandle, FileSystem, FsError};
use crate::sftp::handle::{decode_handle, encode_handle, HandleRef, HandleTable};
use crate::sftp::message::{SftpMessageType, EXT_HARDLINK, MAX_PACKET_LEN, SFTP_VERSION};
use crate::sftp::status::status_for;
use crate::sftp::types::{open_modes, FileAttributes, OpenMode, StatusCode};
use bytes::Bytes;
use parking_lot::Mutex;
use skiff_platform::{SkiffError, SkiffResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn, Level};

/// Process-wide session id counter.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Events a session emits to its parent.
#[derive(Debug)]
pub enum SessionEvent {
    /// The session tore down; the error is present when the channel failed
    /// rather than closing cleanly.
    Closed {
        /// Id of the session that closed
        session_id: u64,
        /// Transport failure, absent on clean shutdown
        error: Option<ChannelError>,
    },
    /// A fault occurred while accepting a request; teardown follows.
    Error {
        /// Id of the faulting session
        session_id: u64,
        /// The fault
        error: SkiffError,
    },
}

/// A handle-bound request in owned form, parked in the handle's FIFO while
/// an earlier request holds the handle.
#[derive(Debug)]
enum HandleRequest {
    Close,
    Read { offset: u64, len: u32 },
    Write { offset: u64, data: Bytes },
    FStat,
    FSetStat { attrs: FileAttributes },
    ReadDir,
}

/// FIFO entry: the request plus the id to answer with.
#[derive(Debug)]
struct QueuedTask {
    request_id: u32,
    request: HandleRequest,
}

/// A path-based request in owned form.
#[derive(Debug)]
enum PathRequest {
    Open {
        path: Vec<u8>,
        pflags: u32,
        attrs: FileAttributes,
    },
    LStat {
        path: Vec<u8>,
    },
    Stat {
        path: Vec<u8>,
    },
    SetStat {
        path: Vec<u8>,
        attrs: FileAttributes,
    },
    OpenDir {
        path: Vec<u8>,
    },
    Remove {
        path: Vec<u8>,
    },
    MkDir {
        path: Vec<u8>,
        attrs: FileAttributes,
    },
    RmDir {
        path: Vec<u8>,
    },
    RealPath {
        path: Vec<u8>,
    },
    Rename {
        old_path: Vec<u8>,
        new_path: Vec<u8>,
    },
    ReadLink {
        path: Vec<u8>,
    },
    Symlink {
        link_path: Vec<u8>,
        target: Vec<u8>,
    },
    Hardlink {
        old_path: Vec<u8>,
        new_path: Vec<u8>,
    },
}

/// Mutable session state behind one lock.
struct State {
    /// Dropped at teardown; its absence is the ENDED marker
    fs: Option<Arc<dyn FileSystem>>,
    handles: HandleTable<QueuedTask>,
}

/// State shared between the dispatch loop and spawned request tasks.
struct Shared {
    id: u64,
    channel: Arc<dyn MessageChannel>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Mutex<State>,
    debug: bool,
    trace: bool,
}

/// An SFTP v3 server session over one message-framed channel.
///
/// Clones share the same session; a clone is how an embedding server keeps
/// a registry entry while the original drives [`run`](Self::run).
#[derive(Clone)]
pub struct SftpSession {
    shared: Arc<Shared>,
}

impl SftpSession {
    /// Creates a session over a channel and filesystem backend.
    ///
    /// Events (teardown, accept-phase faults) are emitted on `events`. The
    /// session id is drawn from a process-wide counter. Packet-level debug
    /// and trace logging are decided here from the active log level.
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        fs: Arc<dyn FileSystem>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            id,
            channel,
            events,
            state: Mutex::new(State {
                fs: Some(fs),
                handles: HandleTable::new(),
            }),
            debug: tracing::enabled!(Level::DEBUG),
            trace: tracing::enabled!(Level::TRACE),
        });
        debug!(session = id, "sftp session created");
        Self { shared }
    }

    /// This session's id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Consumes channel events until the channel closes or a session-fatal
    /// fault occurs.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Message(bytes) => {
                    if let Err(err) = self.process(Bytes::from(bytes)).await {
                        error!(
                            session = self.shared.id,
                            error = %err,
                            "fault while accepting request, ending session"
                        );
                        let _ = self.shared.events.send(SessionEvent::Error {
                            session_id: self.shared.id,
                            error: err,
                        });
                        self.end(None).await;
                        return;
                    }
                }
                ChannelEvent::Close(err) => {
                    let error = match err {
                        Some(e) if e.is_clean_shutdown() => {
                            debug!(session = self.shared.id, code = %e.code, "client went away");
                            None
                        }
                        Some(e) => {
                            warn!(session = self.shared.id, error = %e, "channel failed");
                            Some(e)
                        }
                        None => None,
                    };
                    self.end(error).await;
                    return;
                }
            }
        }
        // event source dropped without a close notification
        self.end(None).await;
    }

    /// Tears the session down: closes the channel, submits every still-open
    /// handle to backend close (errors discarded), drops the filesystem
    /// reference, and emits [`SessionEvent::Closed`]. Idempotent.
    pub async fn end(&self, error: Option<ChannelError>) {
        let (fs, drained) = {
            let mut state = self.shared.state.lock();
            match state.fs.take() {
                Some(fs) => (fs, state.handles.drain()),
                None => return, // already ended
            }
        };
        debug!(
            session = self.shared.id,
            open_handles = drained.len(),
            "ending sftp session"
        );

        self.shared.channel.close().await;

        for entry in drained {
            let backend = entry.lock().backend.take();
            if let Some(backend) = backend {
                if let Err(err) = fs.close(backend).await {
                    debug!(
                        session = self.shared.id,
                        error = %err,
                        "ignoring close failure at teardown"
                    );
                }
            }
        }

        let _ = self.shared.events.send(SessionEvent::Closed {
            session_id: self.shared.id,
            error,
        });
    }

    /// Parses one inbound packet and routes it.
    ///
    /// A returned error means the request could not be accepted at all
    /// (tier 3); the caller tears the session down. Faults inside an
    /// accepted request are handled here (tier 2) and do not propagate.
    async fn process(&self, msg: Bytes) -> SkiffResult<()> {
        let fs = match self.shared.state.lock().fs.clone() {
            Some(fs) => fs,
            None => return Ok(()), // ended; drop silently
        };

        let mut reader = PacketReader::new(&msg);
        let declared_len = reader.read_u32()? as usize;
        let type_byte = reader.read_u8()?;

        if type_byte == SftpMessageType::Init as u8 {
            let client_version = reader.read_u32()?;
            debug!(
                session = self.shared.id,
                client_version, "initializing protocol, replying version 3"
            );
            let mut response = PacketWriter::new();
            response.start(SftpMessageType::Version, None);
            response.write_u32(SFTP_VERSION)?;
            return self.shared.send(&mut response).await;
        }

        let request_id = reader.read_u32()?;

        if self.shared.trace {
            trace!(
                session = self.shared.id,
                request_id,
                msg_type = type_byte,
                len = declared_len,
                "request"
            );
        }

        if let Err(err) = self
            .dispatch(fs, &msg, reader, type_byte, request_id, declared_len)
            .await
        {
            error!(
                session = self.shared.id,
                request_id,
                error = %err,
                "request handling failed, replying generic failure"
            );
            self.shared
                .send_status(request_id, StatusCode::Failure, "Internal server error")
                .await?;
        }
        Ok(())
    }

    /// Validates and routes one request with its id already read.
    async fn dispatch(
        &self,
        fs: Arc<dyn FileSystem>,
        msg: &Bytes,
        mut reader: PacketReader<'_>,
        type_byte: u8,
        request_id: u32,
        declared_len: usize,
    ) -> SkiffResult<()> {
        if declared_len > MAX_PACKET_LEN {
            return self
                .shared
                .send_status(request_id, StatusCode::BadMessage, "Packet too large")
                .await;
        }

        let msg_type = match SftpMessageType::from_u8(type_byte) {
            Some(t) => t,
            None => {
                return self
                    .shared
                    .send_status(request_id, StatusCode::OpUnsupported, "Not supported")
                    .await;
            }
        };

        if msg_type.is_handle_bound() {
            return self
                .dispatch_handle_bound(fs, msg, reader, msg_type, request_id)
                .await;
        }

        let request = match msg_type {
            SftpMessageType::Open => {
                let path = reader.read_string()?.to_vec();
                let pflags = reader.read_u32()?;
                let attrs = FileAttributes::read_from(&mut reader)?;
                PathRequest::Open {
                    path,
                    pflags,
                    attrs,
                }
            }
            SftpMessageType::LStat => PathRequest::LStat {
                path: reader.read_string()?.to_vec(),
            },
            SftpMessageType::Stat => PathRequest::Stat {
                path: reader.read_string()?.to_vec(),
            },
            SftpMessageType::SetStat => {
                let path = reader.read_string()?.to_vec();
                let attrs = FileAttributes::read_from(&mut reader)?;
                PathRequest::SetStat { path, attrs }
            }
            SftpMessageType::OpenDir => PathRequest::OpenDir {
                path: reader.read_string()?.to_vec(),
            },
            SftpMessageType::Remove => PathRequest::Remove {
                path: reader.read_string()?.to_vec(),
            },
            SftpMessageType::MkDir => {
                let path = reader.read_string()?.to_vec();
                let attrs = FileAttributes::read_from(&mut reader)?;
                PathRequest::MkDir { path, attrs }
            }
            SftpMessageType::RmDir => PathRequest::RmDir {
                path: reader.read_string()?.to_vec(),
            },
            SftpMessageType::RealPath => PathRequest::RealPath {
                path: reader.read_string()?.to_vec(),
            },
            SftpMessageType::Rename => {
                let old_path = reader.read_string()?.to_vec();
                let new_path = reader.read_string()?.to_vec();
                PathRequest::Rename { old_path, new_path }
            }
            SftpMessageType::ReadLink => PathRequest::ReadLink {
                path: reader.read_string()?.to_vec(),
            },
            SftpMessageType::Symlink => {
                let link_path = reader.read_string()?.to_vec();
                let target = reader.read_string()?.to_vec();
                PathRequest::Symlink { link_path, target }
            }
            SftpMessageType::Extended => {
                let name = reader.read_string()?;
                if name != EXT_HARDLINK.as_bytes() {
                    return self
                        .shared
                        .send_status(request_id, StatusCode::OpUnsupported, "Not supported")
                        .await;
                }
                let old_path = reader.read_string()?.to_vec();
                let new_path = reader.read_string()?.to_vec();
                PathRequest::Hardlink { old_path, new_path }
            }
            // a server never receives INIT (handled earlier), responses, or
            // EXTENDED_REPLY as requests
            _ => {
                return self
                    .shared
                    .send_status(request_id, StatusCode::OpUnsupported, "Not supported")
                    .await;
            }
        };

        // OPEN and OPENDIR allocate their handle here so indices follow
        // arrival order even though the backend work runs on its own task
        match request {
            PathRequest::Open {
                path,
                pflags,
                attrs,
            } => {
                let modes = open_modes(pflags);
                if modes.is_empty() {
                    return self
                        .shared
                        .send_status(request_id, StatusCode::Failure, "Unsupported flags")
                        .await;
                }
                let allocated = { self.shared.state.lock().handles.alloc() };
                let Some((index, info)) = allocated else {
                    return self
                        .shared
                        .send_status(request_id, StatusCode::Failure, "Too many open handles")
                        .await;
                };
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    shared
                        .exec_open(fs, index, info, request_id, path, modes, attrs)
                        .await;
                });
            }
            PathRequest::OpenDir { path } => {
                let allocated = { self.shared.state.lock().handles.alloc() };
                let Some((index, info)) = allocated else {
                    return self
                        .shared
                        .send_status(request_id, StatusCode::Failure, "Too many open handles")
                        .await;
                };
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    shared
                        .exec_opendir(fs, index, info, request_id, path)
                        .await;
                });
            }
            other => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    shared.exec_path_request(fs, request_id, other).await;
                });
            }
        }
        Ok(())
    }

    /// Resolves the handle prefix of a handle-bound request and either runs
    /// it now or parks it in the handle's FIFO.
    async fn dispatch_handle_bound(
        &self,
        fs: Arc<dyn FileSystem>,
        msg: &Bytes,
        mut reader: PacketReader<'_>,
        msg_type: SftpMessageType,
        request_id: u32,
    ) -> SkiffResult<()> {
        let handle_bytes = reader.read_string()?;
        let Some(index) = decode_handle(handle_bytes) else {
            return self
                .shared
                .send_status(request_id, StatusCode::Failure, "Invalid handle")
                .await;
        };

        let request = match msg_type {
            SftpMessageType::Close => HandleRequest::Close,
            SftpMessageType::Read => HandleRequest::Read {
                offset: reader.read_u64()?,
                len: reader.read_u32()?,
            },
            SftpMessageType::Write => {
                let offset = reader.read_u64()?;
                let len = reader.read_u32()? as usize;
                let start = reader.position();
                reader.skip(len)?;
                HandleRequest::Write {
                    offset,
                    data: msg.slice(start..start + len),
                }
            }
            SftpMessageType::FStat => HandleRequest::FStat,
            SftpMessageType::FSetStat => HandleRequest::FSetStat {
                attrs: FileAttributes::read_from(&mut reader)?,
            },
            SftpMessageType::ReadDir => HandleRequest::ReadDir,
            _ => unreachable!("is_handle_bound covers exactly these types"),
        };

        let resolved = { self.shared.state.lock().handles.get(index) };
        let Some(info) = resolved else {
            return self
                .shared
                .send_status(request_id, StatusCode::Failure, "Invalid handle")
                .await;
        };

        let run_now = {
            let mut guard = info.lock();
            if guard.locked {
                guard.queue.push_back(QueuedTask {
                    request_id,
                    request,
                });
                None
            } else {
                guard.locked = true;
                Some(request)
            }
        };

        if let Some(request) = run_now {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared
                    .drive_handle(fs, info, index, request_id, request)
                    .await;
            });
        }
        Ok(())
    }
}

impl Shared {
    /// Finishes a packet and transmits it.
    async fn send(&self, response: &mut PacketWriter) -> SkiffResult<()> {
        let bytes = response.finish();
        if self.trace {
            trace!(session = self.id, len = bytes.len(), "response");
        }
        self.channel.send(bytes).await
    }

    /// Sends a `STATUS` response.
    async fn send_status(
        &self,
        request_id: u32,
        code: StatusCode,
        message: &str,
    ) -> SkiffResult<()> {
        let mut response = PacketWriter::new();
        response.start(SftpMessageType::Status, Some(request_id));
        response.write_u32(code as u32)?;
        response.write_string(message.as_bytes())?;
        response.write_string(b"")?; // language tag
        self.send(&mut response).await
    }

    /// Sends the mapped `STATUS` response for a backend error.
    async fn send_fs_error(&self, request_id: u32, err: &FsError) -> SkiffResult<()> {
        let (code, message) = status_for(err);
        if self.debug {
            debug!(
                session = self.id,
                request_id,
                errno = err.errno,
                error = %err,
                status = ?code,
                "backend error"
            );
        }
        self.send_status(request_id, code, &message).await
    }

    /// Sends a `HANDLE` response carrying the 4-byte wire handle.
    async fn send_handle(&self, request_id: u32, index: u32) -> SkiffResult<()> {
        let mut response = PacketWriter::new();
        response.start(SftpMessageType::Handle, Some(request_id));
        response.write_string(&encode_handle(index))?;
        self.send(&mut response).await
    }

    /// Sends an `ATTRS` response.
    async fn send_attrs(&self, request_id: u32, attrs: &FileAttributes) -> SkiffResult<()> {
        let mut response = PacketWriter::new();
        response.start(SftpMessageType::Attrs, Some(request_id));
        attrs.write_to(&mut response)?;
        self.send(&mut response).await
    }

    /// Sends a single-entry `NAME` response: the path as filename, empty
    /// long form, empty attribute block. Used by REALPATH and READLINK.
    async fn send_single_name(&self, request_id: u32, path: &[u8]) -> SkiffResult<()> {
        let mut response = PacketWriter::new();
        response.start(SftpMessageType::Name, Some(request_id));
        response.write_u32(1)?;
        response.write_string(path)?;
        response.write_string(b"")?;
        response.write_u32(0)?; // attribute flags: nothing present
        self.send(&mut response).await
    }

    /// Frees a handle slot allocated for an open that did not complete,
    /// provided the slot still belongs to this entry.
    fn free_handle(&self, index: u32, info: &HandleRef<QueuedTask>) {
        let mut state = self.state.lock();
        if let Some(entry) = state.handles.get(index) {
            if Arc::ptr_eq(&entry, info) {
                state.handles.remove(index);
            }
        }
    }

    /// OPEN: walk the decoded mode list, closing intermediate descriptors;
    /// the final open's handle is kept and answered with `HANDLE`.
    async fn exec_open(
        self: Arc<Self>,
        fs: Arc<dyn FileSystem>,
        index: u32,
        info: HandleRef<QueuedTask>,
        request_id: u32,
        path: Vec<u8>,
        modes: Vec<OpenMode>,
        attrs: FileAttributes,
    ) {
        let mut kept = None;
        for (i, mode) in modes.iter().enumerate() {
            match fs.open(&path, *mode, &attrs).await {
                Err(err) => {
                    self.free_handle(index, &info);
                    self.reply(self.send_fs_error(request_id, &err).await);
                    return;
                }
                Ok(backend) => {
                    if i + 1 < modes.len() {
                        if let Err(err) = fs.close(backend).await {
                            self.free_handle(index, &info);
                            self.reply(self.send_fs_error(request_id, &err).await);
                            return;
                        }
                    } else {
                        kept = Some(backend);
                    }
                }
            }
        }

        let stored = {
            let mut guard = info.lock();
            if guard.is_tombstoned() {
                false
            } else {
                guard.backend = kept;
                true
            }
        };
        if !stored {
            // the session ended while the open was in flight; the handle
            // was never reported, so close it quietly
            if let Some(backend) = kept {
                let _ = fs.close(backend).await;
            }
            return;
        }
        self.reply(self.send_handle(request_id, index).await);
    }

    /// OPENDIR: open the directory and answer with `HANDLE`.
    async fn exec_opendir(
        self: Arc<Self>,
        fs: Arc<dyn FileSystem>,
        index: u32,
        info: HandleRef<QueuedTask>,
        request_id: u32,
        path: Vec<u8>,
    ) {
        match fs.opendir(&path).await {
            Err(err) => {
                self.free_handle(index, &info);
                self.reply(self.send_fs_error(request_id, &err).await);
            }
            Ok(backend) => {
                let stored = {
                    let mut guard = info.lock();
                    if guard.is_tombstoned() {
                        false
                    } else {
                        guard.backend = Some(backend);
                        true
                    }
                };
                if !stored {
                    let _ = fs.close(backend).await;
                    return;
                }
                self.reply(self.send_handle(request_id, index).await);
            }
        }
    }

    /// Runs a path-based request to completion.
    async fn exec_path_request(
        self: Arc<Self>,
        fs: Arc<dyn FileSystem>,
        request_id: u32,
        request: PathRequest,
    ) {
        let result = self.run_path_request(&fs, request_id, request).await;
        self.handle_request_fault(request_id, result).await;
    }

    async fn run_path_request(
        &self,
        fs: &Arc<dyn FileSystem>,
        request_id: u32,
        request: PathRequest,
    ) -> SkiffResult<()> {
        match request {
            PathRequest::LStat { path } => match fs.lstat(&path).await {
                Ok(attrs) => self.send_attrs(request_id, &attrs).await,
                Err(err) => self.send_fs_error(request_id, &err).await,
            },
            PathRequest::Stat { path } => match fs.stat(&path).await {
                Ok(attrs) => self.send_attrs(request_id, &attrs).await,
                Err(err) => self.send_fs_error(request_id, &err).await,
            },
            PathRequest::SetStat { path, attrs } => {
                self.reply_ok_or_error(request_id, fs.setstat(&path, &attrs).await)
                    .await
            }
            PathRequest::Remove { path } => {
                self.reply_ok_or_error(request_id, fs.unlink(&path).await)
                    .await
            }
            PathRequest::MkDir { path, attrs } => {
                self.reply_ok_or_error(request_id, fs.mkdir(&path, &attrs).await)
                    .await
            }
            PathRequest::RmDir { path } => {
                self.reply_ok_or_error(request_id, fs.rmdir(&path).await)
                    .await
            }
            PathRequest::RealPath { path } => match fs.realpath(&path).await {
                Ok(resolved) => self.send_single_name(request_id, &resolved).await,
                Err(err) => self.send_fs_error(request_id, &err).await,
            },
            PathRequest::Rename { old_path, new_path } => {
                self.reply_ok_or_error(request_id, fs.rename(&old_path, &new_path).await)
                    .await
            }
            PathRequest::ReadLink { path } => match fs.readlink(&path).await {
                Ok(target) => self.send_single_name(request_id, &target).await,
                Err(err) => self.send_fs_error(request_id, &err).await,
            },
            PathRequest::Symlink { link_path, target } => {
                self.reply_ok_or_error(request_id, fs.symlink(&target, &link_path).await)
                    .await
            }
            PathRequest::Hardlink { old_path, new_path } => {
                self.reply_ok_or_error(request_id, fs.link(&old_path, &new_path).await)
                    .await
            }
            PathRequest::Open { .. } | PathRequest::OpenDir { .. } => {
                unreachable!("open requests are dispatched with their handle")
            }
        }
    }

    /// Runs one handle-bound request, then keeps draining the handle's FIFO
    /// until it is empty, releasing the lock at that point.
    async fn drive_handle(
        self: Arc<Self>,
        fs: Arc<dyn FileSystem>,
        info: HandleRef<QueuedTask>,
        index: u32,
        request_id: u32,
        request: HandleRequest,
    ) {
        let mut current = Some((request_id, request));
        while let Some((request_id, request)) = current {
            let result = self
                .run_handle_request(&fs, &info, index, request_id, request)
                .await;
            self.handle_request_fault(request_id, result).await;

            // the response for this request is out; start the next queued
            // task, or release the handle
            current = {
                let mut guard = info.lock();
                match guard.queue.pop_front() {
                    Some(task) => Some((task.request_id, task.request)),
                    None => {
                        guard.locked = false;
                        None
                    }
                }
            };
        }
    }

    async fn run_handle_request(
        &self,
        fs: &Arc<dyn FileSystem>,
        info: &HandleRef<QueuedTask>,
        index: u32,
        request_id: u32,
        request: HandleRequest,
    ) -> SkiffResult<()> {
        // a task that was queued behind a CLOSE, or that outlived the
        // session, finds the tombstone and must not touch the backend
        let backend = {
            let guard = info.lock();
            if guard.is_tombstoned() {
                None
            } else {
                guard.backend
            }
        };

        if let HandleRequest::Close = request {
            return self.close_handle(fs, info, index, request_id).await;
        }

        let Some(backend) = backend else {
            return self
                .send_status(request_id, StatusCode::Failure, "Invalid handle")
                .await;
        };

        match request {
            HandleRequest::Read { offset, len } => {
                let len = len.min(MAX_READ_LEN) as usize;
                let mut response = PacketWriter::new();
                response.start(SftpMessageType::Data, Some(request_id));
                let len_field = response.reserve_u32()?;
                let read = {
                    let buf = response.tail_mut(len)?;
                    fs.read(backend, offset, buf).await
                };
                match read {
                    Err(err) => self.send_fs_error(request_id, &err).await,
                    Ok(0) => {
                        self.send_status(request_id, StatusCode::Eof, "End of file")
                            .await
                    }
                    Ok(n) => {
                        response.patch_u32(len_field, n as u32);
                        response.advance(n);
                        self.send(&mut response).await
                    }
                }
            }
            HandleRequest::Write { offset, data } => {
                self.reply_ok_or_error(request_id, fs.write(backend, offset, &data).await)
                    .await
            }
            HandleRequest::FStat => match fs.fstat(backend).await {
                Ok(attrs) => self.send_attrs(request_id, &attrs).await,
                Err(err) => self.send_fs_error(request_id, &err).await,
            },
            HandleRequest::FSetStat { attrs } => {
                self.reply_ok_or_error(request_id, fs.fsetstat(backend, &attrs).await)
                    .await
            }
            HandleRequest::ReadDir => {
                self.read_dir(fs, info, backend, request_id).await
            }
            HandleRequest::Close => unreachable!("handled above"),
        }
    }

    /// CLOSE: remove the handle from the table before the backend close so
    /// it can never be reused or reported on afterwards.
    async fn close_handle(
        &self,
        fs: &Arc<dyn FileSystem>,
        info: &HandleRef<QueuedTask>,
        index: u32,
        request_id: u32,
    ) -> SkiffResult<()> {
        let removed = {
            let mut state = self.state.lock();
            match state.handles.get(index) {
                Some(entry) if Arc::ptr_eq(&entry, info) => state.handles.remove(index),
                _ => None,
            }
        };
        let backend = match removed {
            Some(_) => info.lock().backend.take(),
            None => None,
        };

        match backend {
            Some(backend) => {
                self.reply_ok_or_error(request_id, fs.close(backend).await)
                    .await
            }
            None => {
                self.send_status(request_id, StatusCode::Failure, "Invalid handle")
                    .await
            }
        }
    }

    /// READDIR: drain buffered items first, otherwise poll the backend, and
    /// emit entries until the soft byte budget is passed; what does not fit
    /// is stashed back on the handle for the next call.
    async fn read_dir(
        &self,
        fs: &Arc<dyn FileSystem>,
        info: &HandleRef<QueuedTask>,
        backend: FileHandle,
        request_id: u32,
    ) -> SkiffResult<()> {
        let mut items = std::mem::take(&mut info.lock().dir_items);

        if items.is_empty() {
            match fs.readdir(backend).await {
                Err(err) => return self.send_fs_error(request_id, &err).await,
                Ok(None) => {
                    return self
                        .send_status(request_id, StatusCode::Eof, "End of file")
                        .await;
                }
                Ok(Some(batch)) => items = batch,
            }
            if items.is_empty() {
                return self
                    .send_status(request_id, StatusCode::Eof, "End of file")
                    .await;
            }
        }

        let mut response = PacketWriter::new();
        response.start(SftpMessageType::Name, Some(request_id));
        let count_field = response.reserve_u32()?;
        let mut count = 0u32;

        let mut iter = items.into_iter();
        let mut leftover = Vec::new();
        while let Some(item) = iter.next() {
            if response.position() > READDIR_BUDGET {
                leftover.push(item);
                leftover.extend(iter);
                break;
            }
            item.write_to(&mut response)?;
            count += 1;
        }
        if !leftover.is_empty() {
            info.lock().dir_items = leftover;
        }

        response.patch_u32(count_field, count);
        self.send(&mut response).await
    }

    /// Replies `OK` or the mapped error status for unit-result backend ops.
    async fn reply_ok_or_error(
        &self,
        request_id: u32,
        result: Result<(), FsError>,
    ) -> SkiffResult<()> {
        match result {
            Ok(()) => self.send_status(request_id, StatusCode::Ok, "OK").await,
            Err(err) => self.send_fs_error(request_id, &err).await,
        }
    }

    /// Tier-2 fault handling for spawned request tasks: log in full, answer
    /// with a generic failure, leak nothing.
    async fn handle_request_fault(&self, request_id: u32, result: SkiffResult<()>) {
        if let Err(err) = result {
            error!(
                session = self.id,
                request_id,
                error = %err,
                "request handling failed, replying generic failure"
            );
            self.reply(
                self.send_status(request_id, StatusCode::Failure, "Internal server error")
                    .await,
            );
        }
    }

    /// Swallows a send failure from a spawned task; the channel going away
    /// mid-response is handled by the session's close event.
    fn reply(&self, result: SkiffResult<()>) {
        if let Err(err) = result {
            debug!(session = self.id, error = %err, "response dropped, channel gone");
        }
    }
}
