//! Handle table: bounded allocation of opaque wire handles.
//!
//! Wire handles are always exactly four bytes encoding a 32-bit index into
//! this table. Slots are indexed 1..=512; slot 0 is never used. Allocation
//! walks a rolling cursor forward from the previous allocation so freshly
//! freed indices are not handed out again immediately, which keeps clients
//! that cache stale handles from silently landing on a new file.
//!
//! Each entry also carries the per-handle serialization state: the `locked`
//! flag and the FIFO of tasks waiting for the handle (see
//! [`session`](crate::sftp::session)). An entry removed from the table is
//! tombstoned (`h = -1`) so queued tasks that run later can tell the handle
//! died under them.

use crate::sftp::fs::FileHandle;
use crate::sftp::types::DirItem;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Maximum number of concurrently open handles per session.
pub const MAX_HANDLE_COUNT: usize = 512;

/// Per-handle state: backend handle, buffered directory items, and the
/// serialization queue.
#[derive(Debug)]
pub struct HandleInfo<T> {
    /// Table index, or -1 once the entry is tombstoned
    pub h: i32,
    /// Backend-native handle; set once the backend open completes
    pub backend: Option<FileHandle>,
    /// Directory items produced by the backend but not yet sent
    pub dir_items: Vec<DirItem>,
    /// Whether a task currently owns the handle
    pub locked: bool,
    /// Tasks waiting for the handle, oldest first
    pub queue: VecDeque<T>,
}

impl<T> HandleInfo<T> {
    fn new(h: i32) -> Self {
        Self {
            h,
            backend: None,
            dir_items: Vec::new(),
            locked: false,
            queue: VecDeque::new(),
        }
    }

    /// Whether the entry has been removed from the table.
    pub fn is_tombstoned(&self) -> bool {
        self.h < 0
    }
}

/// Shared reference to a handle entry.
///
/// The inner mutex guards only short field accesses and is never held
/// across an await point; the `locked` flag, not the mutex, is what
/// serializes backend calls.
pub type HandleRef<T> = Arc<Mutex<HandleInfo<T>>>;

/// Fixed-capacity table of open handles.
pub struct HandleTable<T> {
    slots: Vec<Option<HandleRef<T>>>,
    next_handle: u32,
    count: usize,
}

impl<T> HandleTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_HANDLE_COUNT + 1);
        slots.resize_with(MAX_HANDLE_COUNT + 1, || None);
        Self {
            slots,
            next_handle: 1,
            count: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Allocates a slot, scanning forward from the rolling cursor.
    ///
    /// Returns `None` when all 512 slots are occupied. The new entry starts
    /// unlocked with no backend handle.
    pub fn alloc(&mut self) -> Option<(u32, HandleRef<T>)> {
        for step in 0..MAX_HANDLE_COUNT as u32 {
            let index = (self.next_handle - 1 + step) % MAX_HANDLE_COUNT as u32 + 1;
            if self.slots[index as usize].is_none() {
                let info = Arc::new(Mutex::new(HandleInfo::new(index as i32)));
                self.slots[index as usize] = Some(Arc::clone(&info));
                self.next_handle = index % MAX_HANDLE_COUNT as u32 + 1;
                self.count += 1;
                return Some((index, info));
            }
        }
        None
    }

    /// Looks up a live entry.
    pub fn get(&self, index: u32) -> Option<HandleRef<T>> {
        if index == 0 || index as usize > MAX_HANDLE_COUNT {
            return None;
        }
        self.slots[index as usize].as_ref().map(Arc::clone)
    }

    /// Removes an entry, tombstoning it so late-running queued tasks see
    /// the handle is gone. The cursor is not reset.
    pub fn remove(&mut self, index: u32) -> Option<HandleRef<T>> {
        if index == 0 || index as usize > MAX_HANDLE_COUNT {
            return None;
        }
        let entry = self.slots[index as usize].take()?;
        entry.lock().h = -1;
        self.count -= 1;
        Some(entry)
    }

    /// Removes every entry, tombstoned, for session teardown.
    pub fn drain(&mut self) -> Vec<HandleRef<T>> {
        let mut drained = Vec::with_capacity(self.count);
        for slot in self.slots.iter_mut() {
            if let Some(entry) = slot.take() {
                entry.lock().h = -1;
                drained.push(entry);
            }
        }
        self.count = 0;
        drained
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a table index as the 4-byte wire handle.
pub fn encode_handle(index: u32) -> [u8; 4] {
    index.to_be_bytes()
}

/// Decodes a wire handle; anything that is not exactly four bytes is
/// invalid.
pub fn decode_handle(bytes: &[u8]) -> Option<u32> {
    let bytes: &[u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(*bytes))
}
