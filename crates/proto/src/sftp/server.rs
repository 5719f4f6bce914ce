//! Multi-session SFTP server glue.
//!
//! [`SftpServer`] owns the filesystem backend and a registry of live
//! sessions. The embedding application hands it one channel per accepted
//! SFTP subsystem request; the server spawns a session for it, prunes the
//! registry when the session closes, and forwards session events upstream.

use crate::sftp::channel::{ChannelEvent, MessageChannel};
use crate::sftp::fs::FileSystem;
use crate::sftp::session::{SessionEvent, SftpSession};
use parking_lot::Mutex;
use skiff_platform::{SkiffError, SkiffResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// SFTP server configuration.
#[derive(Debug, Clone)]
pub struct SftpServerConfig {
    /// Maximum number of concurrent sessions; 0 means unlimited.
    pub max_sessions: usize,
}

impl Default for SftpServerConfig {
    fn default() -> Self {
        Self { max_sessions: 64 }
    }
}

/// Accepts channels and runs one SFTP session per channel.
pub struct SftpServer {
    fs: Arc<dyn FileSystem>,
    config: SftpServerConfig,
    sessions: Arc<Mutex<HashMap<u64, SftpSession>>>,
    internal_tx: mpsc::UnboundedSender<SessionEvent>,
    forwarder: Option<JoinHandle<()>>,
}

impl SftpServer {
    /// Creates a server over a filesystem backend.
    ///
    /// Session events are forwarded to `events` after the registry has been
    /// updated. Must be called within a tokio runtime.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        config: SftpServerConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let sessions: Arc<Mutex<HashMap<u64, SftpSession>>> = Arc::new(Mutex::new(HashMap::new()));

        let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let registry = Arc::clone(&sessions);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = internal_rx.recv().await {
                if let SessionEvent::Closed { session_id, .. } = &event {
                    registry.lock().remove(session_id);
                    debug!(session = session_id, "session removed from registry");
                }
                // keep pruning even if upstream stopped listening
                let _ = events.send(event);
            }
        });

        Self {
            fs,
            config,
            sessions,
            internal_tx,
            forwarder: Some(forwarder),
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Starts a session over `channel`, consuming `inbound` for its
    /// traffic.
    ///
    /// Refuses the channel (without affecting existing sessions) when the
    /// session limit is reached.
    pub fn accept(
        &self,
        channel: Arc<dyn MessageChannel>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> SkiffResult<SftpSession> {
        if self.config.max_sessions > 0 && self.session_count() >= self.config.max_sessions {
            warn!(
                limit = self.config.max_sessions,
                "refusing channel, session limit reached"
            );
            return Err(SkiffError::Channel("session limit reached".to_string()));
        }

        let session = SftpSession::new(channel, Arc::clone(&self.fs), self.internal_tx.clone());
        self.sessions.lock().insert(session.id(), session.clone());

        let runner = session.clone();
        tokio::spawn(async move {
            runner.run(inbound).await;
        });

        debug!(session = session.id(), "session accepted");
        Ok(session)
    }

    /// Stops the event forwarder; running sessions are not torn down.
    pub fn stop(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

impl Drop for SftpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::fs::{errno, FileHandle, FsError, FsResult};
    use crate::sftp::types::{DirItem, FileAttributes, OpenMode};
    use async_trait::async_trait;

    struct NullFs;

    #[async_trait]
    impl FileSystem for NullFs {
        async fn open(
            &self,
            _path: &[u8],
            _mode: OpenMode,
            _attrs: &FileAttributes,
        ) -> FsResult<FileHandle> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn close(&self, _handle: FileHandle) -> FsResult<()> {
            Ok(())
        }
        async fn read(&self, _handle: FileHandle, _offset: u64, _buf: &mut [u8]) -> FsResult<usize> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn write(&self, _handle: FileHandle, _offset: u64, _data: &[u8]) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn stat(&self, _path: &[u8]) -> FsResult<FileAttributes> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn lstat(&self, _path: &[u8]) -> FsResult<FileAttributes> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn fstat(&self, _handle: FileHandle) -> FsResult<FileAttributes> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn setstat(&self, _path: &[u8], _attrs: &FileAttributes) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn fsetstat(&self, _handle: FileHandle, _attrs: &FileAttributes) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn opendir(&self, _path: &[u8]) -> FsResult<FileHandle> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn readdir(&self, _handle: FileHandle) -> FsResult<Option<Vec<DirItem>>> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn unlink(&self, _path: &[u8]) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn mkdir(&self, _path: &[u8], _attrs: &FileAttributes) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn rmdir(&self, _path: &[u8]) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn realpath(&self, _path: &[u8]) -> FsResult<Vec<u8>> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn rename(&self, _old_path: &[u8], _new_path: &[u8]) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn readlink(&self, _path: &[u8]) -> FsResult<Vec<u8>> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn symlink(&self, _target: &[u8], _link_path: &[u8]) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
        async fn link(&self, _old_path: &[u8], _new_path: &[u8]) -> FsResult<()> {
            Err(FsError::new(errno::ENOSYS, "not implemented"))
        }
    }

    struct NullChannel;

    #[async_trait]
    impl MessageChannel for NullChannel {
        async fn send(&self, _packet: &[u8]) -> SkiffResult<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    fn accept_one(server: &SftpServer) -> SkiffResult<mpsc::UnboundedSender<ChannelEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        server.accept(Arc::new(NullChannel), rx)?;
        Ok(tx)
    }

    #[tokio::test]
    async fn test_session_limit() {
        let (events, _events_rx) = mpsc::unbounded_channel();
        let server = SftpServer::new(
            Arc::new(NullFs),
            SftpServerConfig { max_sessions: 2 },
            events,
        );

        let _a = accept_one(&server).unwrap();
        let _b = accept_one(&server).unwrap();
        assert_eq!(server.session_count(), 2);

        assert!(accept_one(&server).is_err());
        assert_eq!(server.session_count(), 2);
    }

    #[tokio::test]
    async fn test_registry_prunes_on_close() {
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let server = SftpServer::new(Arc::new(NullFs), SftpServerConfig::default(), events);

        let tx = accept_one(&server).unwrap();
        assert_eq!(server.session_count(), 1);

        tx.send(ChannelEvent::Close(None)).unwrap();

        // the forwarder prunes the registry before the event reaches us
        match events_rx.recv().await {
            Some(SessionEvent::Closed { error: None, .. }) => {}
            other => panic!("expected clean close, got {:?}", other),
        }
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unlimited_sessions() {
        let (events, _events_rx) = mpsc::unbounded_channel();
        let server = SftpServer::new(
            Arc::new(NullFs),
            SftpServerConfig { max_sessions: 0 },
            events,
        );

        let mut keep = Vec::new();
        for _ in 0..100 {
            keep.push(accept_one(&server).unwrap());
        }
        assert_eq!(server.session_count(), 100);
    }
}
