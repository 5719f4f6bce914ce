//! SFTP (SSH File Transfer Protocol) server implementation.
//!
//! This module implements the server side of SFTP v3, the most widely
//! supported version.
//!
//! # Architecture
//!
//! The engine is a per-connection session that sits between a message-framed
//! byte channel and a filesystem backend:
//!
//! ```text
//! channel message --> codec (header: length, type, request id)
//!                 --> dispatcher (validate, resolve handle)
//!                 --> handle queue (at most one in-flight op per handle)
//!                 --> filesystem backend (async)
//!                 --> codec (response packet)
//!                 --> channel send --> next queued task for that handle
//! ```
//!
//! Requests bound to the same handle are totally ordered; requests on
//! different handles (and path-based requests) proceed in parallel.
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|
//!   |                               |
//!   |-- SSH_FXP_OPEN -------------->|
//!   |<- SSH_FXP_HANDLE -------------|
//!   |                               |
//!   |-- SSH_FXP_READ -------------->|
//!   |<- SSH_FXP_DATA ---------------|
//!   |                               |
//!   |-- SSH_FXP_CLOSE ------------->|
//!   |<- SSH_FXP_STATUS -------------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use skiff_proto::sftp::session::{SftpSession, SessionEvent};
//! use skiff_proto::sftp::channel::ChannelEvent;
//! use tokio::sync::mpsc;
//!
//! # async fn example(
//! #     channel: Arc<dyn skiff_proto::sftp::channel::MessageChannel>,
//! #     fs: Arc<dyn skiff_proto::sftp::fs::FileSystem>,
//! # ) {
//! let (event_tx, _event_rx) = mpsc::unbounded_channel::<SessionEvent>();
//! let (msg_tx, msg_rx) = mpsc::unbounded_channel::<ChannelEvent>();
//!
//! let session = SftpSession::new(channel, fs, event_tx);
//! tokio::spawn(session.run(msg_rx));
//!
//! // feed inbound SFTP packets through msg_tx; responses go out on the
//! // MessageChannel
//! # let _ = msg_tx;
//! # }
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)

pub mod channel;
pub mod codec;
pub mod fs;
pub mod handle;
pub mod message;
pub mod server;
pub mod session;
pub mod status;
pub mod types;

pub use channel::{ChannelError, ChannelEvent, MessageChannel};
pub use fs::{FileHandle, FileSystem, FsError, FsResult};
pub use message::{SftpMessageType, MAX_PACKET_LEN, SFTP_VERSION};
pub use server::{SftpServer, SftpServerConfig};
pub use session::{SessionEvent, SftpSession};
pub use types::{DirItem, FileAttributes, FileMode, OpenMode, StatusCode};
