//! Protocol implementations for the skiff file-transfer server.
//!
//! This crate provides the server-side core of the SSH File Transfer
//! Protocol:
//!
//! - **SFTP v3** (`draft-ietf-secsh-filexfer-02`) - session engine: wire
//!   codec, status taxonomy, handle table, per-handle task serialization,
//!   and the request dispatcher
//!
//! The SSH transport itself is not part of this crate. The engine consumes
//! two capabilities supplied by the embedding application: a message-framed
//! duplex channel (one SFTP packet per message) and a filesystem backend.
//! Both are traits, so any transport (an SSH subsystem channel, a WebSocket,
//! an in-process pipe) and any filesystem (local disk, sandboxed root,
//! in-memory test double) can be plugged in.
//!
//! # Features
//!
//! - `sftp` (default) - SFTP v3 server session engine
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::sftp::codec::PacketWriter;
//! use skiff_proto::sftp::message::SftpMessageType;
//!
//! // Build a VERSION packet the way the session engine does
//! let mut response = PacketWriter::new();
//! response.start(SftpMessageType::Version, None);
//! response.write_u32(3).unwrap();
//! let wire_format = response.finish();
//! assert_eq!(wire_format, &[0, 0, 0, 5, 2, 0, 0, 0, 3]);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "sftp")]
pub mod sftp;
