//! In-Memory SFTP Session Example
//!
//! This example demonstrates how to:
//! - Plug a filesystem backend into the session engine
//! - Wire a session to a message-framed channel
//! - Drive a full open/write/read/close exchange
//!
//! No SSH transport is involved; the "client" here is a handful of
//! hand-built SFTP v3 packets pushed straight into the session.
//!
//! Usage:
//!   cargo run --example inmemory_session

use async_trait::async_trait;
use parking_lot::Mutex;
use skiff_platform::SkiffResult;
use skiff_proto::sftp::channel::{ChannelEvent, MessageChannel};
use skiff_proto::sftp::fs::{errno, FileHandle, FileSystem, FsError, FsResult};
use skiff_proto::sftp::session::{SessionEvent, SftpSession};
use skiff_proto::sftp::types::{DirItem, FileAttributes, FileMode, OpenMode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A single-directory in-memory filesystem: path -> content.
struct ScratchFs {
    files: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    open: Mutex<HashMap<u64, Vec<u8>>>,
    next: Mutex<u64>,
}

impl ScratchFs {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(HashMap::new()),
            open: Mutex::new(HashMap::new()),
            next: Mutex::new(1),
        })
    }

    fn mint(&self, path: &[u8]) -> FileHandle {
        let mut next = self.next.lock();
        let id = *next;
        *next += 1;
        self.open.lock().insert(id, path.to_vec());
        FileHandle(id)
    }

    fn path_of(&self, handle: FileHandle) -> FsResult<Vec<u8>> {
        self.open
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| FsError::new(errno::EBADF, "not open"))
    }

    fn unsupported() -> FsError {
        FsError::new(errno::ENOSYS, "not supported by the scratch backend")
    }
}

#[async_trait]
impl FileSystem for ScratchFs {
    async fn open(
        &self,
        path: &[u8],
        mode: OpenMode,
        _attrs: &FileAttributes,
    ) -> FsResult<FileHandle> {
        let mut files = self.files.lock();
        let exists = files.contains_key(path);
        match mode {
            OpenMode::Read | OpenMode::ReadWrite if !exists => {
                return Err(FsError::new(errno::ENOENT, "no such file"));
            }
            OpenMode::CreateNew | OpenMode::CreateNewRead if exists => {
                return Err(FsError::new(errno::EEXIST, "file exists"));
            }
            OpenMode::CreateNew
            | OpenMode::CreateNewRead
            | OpenMode::Truncate
            | OpenMode::TruncateRead => {
                files.insert(path.to_vec(), Vec::new());
            }
            _ => {}
        }
        drop(files);
        Ok(self.mint(path))
    }

    async fn close(&self, handle: FileHandle) -> FsResult<()> {
        self.open
            .lock()
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| FsError::new(errno::EBADF, "not open"))
    }

    async fn read(&self, handle: FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let path = self.path_of(handle)?;
        let files = self.files.lock();
        let content = files
            .get(&path)
            .ok_or_else(|| FsError::new(errno::ENOENT, "no such file"))?;
        let offset = offset as usize;
        if offset >= content.len() {
            return Ok(0);
        }
        let n = buf.len().min(content.len() - offset);
        buf[..n].copy_from_slice(&content[offset..offset + n]);
        Ok(n)
    }

    async fn write(&self, handle: FileHandle, offset: u64, data: &[u8]) -> FsResult<()> {
        let path = self.path_of(handle)?;
        let mut files = self.files.lock();
        let content = files
            .get_mut(&path)
            .ok_or_else(|| FsError::new(errno::ENOENT, "no such file"))?;
        let end = offset as usize + data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    async fn stat(&self, path: &[u8]) -> FsResult<FileAttributes> {
        let files = self.files.lock();
        let content = files
            .get(path)
            .ok_or_else(|| FsError::new(errno::ENOENT, "no such file"))?;
        let mut attrs = FileAttributes::new();
        attrs.size = Some(content.len() as u64);
        attrs.permissions = Some(FileMode(FileMode::REGULAR | FileMode::DEFAULT_FILE));
        Ok(attrs)
    }

    async fn lstat(&self, path: &[u8]) -> FsResult<FileAttributes> {
        self.stat(path).await
    }

    async fn fstat(&self, handle: FileHandle) -> FsResult<FileAttributes> {
        let path = self.path_of(handle)?;
        self.stat(&path).await
    }

    async fn setstat(&self, _path: &[u8], _attrs: &FileAttributes) -> FsResult<()> {
        Ok(())
    }

    async fn fsetstat(&self, _handle: FileHandle, _attrs: &FileAttributes) -> FsResult<()> {
        Ok(())
    }

    async fn opendir(&self, _path: &[u8]) -> FsResult<FileHandle> {
        Err(Self::unsupported())
    }

    async fn readdir(&self, _handle: FileHandle) -> FsResult<Option<Vec<DirItem>>> {
        Err(Self::unsupported())
    }

    async fn unlink(&self, path: &[u8]) -> FsResult<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::new(errno::ENOENT, "no such file"))
    }

    async fn mkdir(&self, _path: &[u8], _attrs: &FileAttributes) -> FsResult<()> {
        Err(Self::unsupported())
    }

    async fn rmdir(&self, _path: &[u8]) -> FsResult<()> {
        Err(Self::unsupported())
    }

    async fn realpath(&self, path: &[u8]) -> FsResult<Vec<u8>> {
        Ok(path.to_vec())
    }

    async fn rename(&self, _old_path: &[u8], _new_path: &[u8]) -> FsResult<()> {
        Err(Self::unsupported())
    }

    async fn readlink(&self, _path: &[u8]) -> FsResult<Vec<u8>> {
        Err(Self::unsupported())
    }

    async fn symlink(&self, _target: &[u8], _link_path: &[u8]) -> FsResult<()> {
        Err(Self::unsupported())
    }

    async fn link(&self, _old_path: &[u8], _new_path: &[u8]) -> FsResult<()> {
        Err(Self::unsupported())
    }
}

/// Outbound half of the loopback channel: prints and forwards packets.
struct PrintChannel {
    out: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl MessageChannel for PrintChannel {
    async fn send(&self, packet: &[u8]) -> SkiffResult<()> {
        let _ = self.out.send(packet.to_vec());
        Ok(())
    }

    async fn close(&self) {}
}

fn string_field(s: &[u8]) -> Vec<u8> {
    let mut field = (s.len() as u32).to_be_bytes().to_vec();
    field.extend_from_slice(s);
    field
}

fn packet(body: Vec<u8>) -> Vec<u8> {
    let mut framed = (body.len() as u32).to_be_bytes().to_vec();
    framed.extend_from_slice(&body);
    framed
}

fn request(msg_type: u8, request_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![msg_type];
    body.extend_from_slice(&request_id.to_be_bytes());
    body.extend_from_slice(payload);
    packet(body)
}

fn describe(bytes: &[u8]) -> String {
    let kind = match bytes[4] {
        2 => "VERSION",
        101 => "STATUS",
        102 => "HANDLE",
        103 => "DATA",
        104 => "NAME",
        105 => "ATTRS",
        other => return format!("type {}", other),
    };
    format!("{} ({} bytes)", kind, bytes.len())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let fs = ScratchFs::new();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (event_tx, _event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();

    let session = SftpSession::new(Arc::new(PrintChannel { out: out_tx }), fs, event_tx);
    println!("session {} started", session.id());
    tokio::spawn(session.run(msg_rx));

    // INIT -> VERSION
    let mut init = vec![1u8];
    init.extend_from_slice(&3u32.to_be_bytes());
    msg_tx.send(ChannelEvent::Message(packet(init)))?;

    // OPEN /hello.txt for create+write
    let mut open = string_field(b"/hello.txt");
    open.extend_from_slice(&0x1au32.to_be_bytes()); // write | creat | trunc
    open.extend_from_slice(&0u32.to_be_bytes());
    msg_tx.send(ChannelEvent::Message(request(3, 1, &open)))?;

    let version = out_rx.recv().await.expect("version");
    println!("<- {}", describe(&version));
    let handle_resp = out_rx.recv().await.expect("handle");
    println!("<- {}", describe(&handle_resp));
    let handle = handle_resp[13..17].to_vec(); // 4-byte wire handle

    // WRITE then READ back
    let mut write = string_field(&handle);
    write.extend_from_slice(&0u64.to_be_bytes());
    write.extend_from_slice(&string_field(b"hello from skiff"));
    msg_tx.send(ChannelEvent::Message(request(6, 2, &write)))?;
    println!("<- {}", describe(&out_rx.recv().await.expect("status")));

    let mut read = string_field(&handle);
    read.extend_from_slice(&0u64.to_be_bytes());
    read.extend_from_slice(&64u32.to_be_bytes());
    msg_tx.send(ChannelEvent::Message(request(5, 3, &read)))?;
    let data = out_rx.recv().await.expect("data");
    println!("<- {}", describe(&data));
    println!("   payload: {}", String::from_utf8_lossy(&data[13..]));

    // CLOSE
    msg_tx.send(ChannelEvent::Message(request(4, 4, &string_field(&handle))))?;
    println!("<- {}", describe(&out_rx.recv().await.expect("status")));

    Ok(())
}
