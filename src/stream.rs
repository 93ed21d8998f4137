//! Stream table (C5): fixed-capacity slot table for in-flight operations.
//!
//! Mirrors the original client's `struct stream streams[MAX_STREAMS]`
//! array rather than a hash map, since the slot-table capacity and
//! "never two non-Idle slots share an id" invariant are part of the
//! spec's testable properties.

use std::fs::File;

use crate::constants::MAX_STREAMS;
use crate::exec::ExecState;
use crate::wire::StreamType;

/// Lifecycle state of a stream slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    HalfLocal,
    HalfRemote,
}

/// The single resource a stream slot owns, determined by its `StreamType`.
/// Most operation types run to completion synchronously within their
/// handler and never populate this — only `FileWrite` (awaiting inbound
/// `STREAM_DATA`) and `Exec` (polled every event loop tick) keep state
/// alive across ticks.
pub enum StreamResource {
    None,
    FileWrite(File),
    Exec(ExecState),
}

impl std::fmt::Debug for StreamResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamResource::None => write!(f, "None"),
            StreamResource::FileWrite(_) => write!(f, "FileWrite(..)"),
            StreamResource::Exec(e) => write!(f, "Exec({e:?})"),
        }
    }
}

/// A single active (or previously active, now idle) stream slot.
#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    pub stream_type: StreamType,
    pub state: StreamState,
    pub resource: StreamResource,
}

/// Fixed-capacity table of stream slots.
pub struct StreamTable {
    slots: Vec<Option<Stream>>,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_STREAMS);
        slots.resize_with(MAX_STREAMS, || None);
        Self { slots }
    }

    /// Find the slot index holding an active (non-Idle, by construction
    /// every occupied `Some` slot here is non-Idle) stream with `id`.
    pub fn find(&self, id: u32) -> Option<usize> {
        self.slots.iter().position(|s| matches!(s, Some(st) if st.id == id))
    }

    pub fn get(&self, idx: usize) -> Option<&Stream> {
        self.slots[idx].as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Stream> {
        self.slots[idx].as_mut()
    }

    pub fn find_mut(&mut self, id: u32) -> Option<&mut Stream> {
        let idx = self.find(id)?;
        self.get_mut(idx)
    }

    /// Allocate a new `Open` slot for `id`. Returns `None` if the table is
    /// full — the caller maps this to `STREAM_ERROR(NO_MEMORY, ...)`.
    /// Caller must have already checked `find(id).is_none()`.
    pub fn alloc(&mut self, id: u32, stream_type: StreamType) -> Option<usize> {
        let idx = self.slots.iter().position(|s| s.is_none())?;
        self.slots[idx] = Some(Stream {
            id,
            stream_type,
            state: StreamState::Open,
            resource: StreamResource::None,
        });
        Some(idx)
    }

    /// Release a slot's resources (closing files, terminating child
    /// processes non-blocking) and recycle it to `Idle` (i.e. `None`).
    pub fn free(&mut self, idx: usize) {
        if let Some(stream) = self.slots[idx].take() {
            if let StreamResource::Exec(mut exec) = stream.resource {
                exec.abandon();
            }
            // StreamResource::FileWrite(File) closes on drop.
        }
    }

    /// Iterate indices of streams currently in the `Exec` resource state,
    /// for the event loop's per-tick poll.
    pub fn exec_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Some(st) if matches!(st.resource, StreamResource::Exec(_)) => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_find_locates_slot() {
        let mut table = StreamTable::new();
        let idx = table.alloc(5, StreamType::FileRead).unwrap();
        assert_eq!(table.find(5), Some(idx));
        assert_eq!(table.get(idx).unwrap().state, StreamState::Open);
    }

    #[test]
    fn free_recycles_slot_to_idle() {
        let mut table = StreamTable::new();
        let idx = table.alloc(1, StreamType::FileExists).unwrap();
        table.free(idx);
        assert_eq!(table.find(1), None);
        assert_eq!(table.occupied_count(), 0);
    }

    #[test]
    fn table_full_returns_none() {
        let mut table = StreamTable::new();
        for i in 0..MAX_STREAMS as u32 {
            assert!(table.alloc(i, StreamType::FileStat).is_some());
        }
        assert!(table.alloc(9999, StreamType::FileStat).is_none());
    }

    #[test]
    fn duplicate_id_is_caller_responsibility_but_table_allows_distinct_slots() {
        // The table itself doesn't reject duplicate ids -- the dispatcher
        // must check `find(id).is_none()` before calling `alloc`. This test
        // documents that invariant lives one layer up.
        let mut table = StreamTable::new();
        table.alloc(1, StreamType::FileRead).unwrap();
        assert!(table.find(1).is_some());
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut table = StreamTable::new();
        let idx1 = table.alloc(1, StreamType::FileRead).unwrap();
        table.free(idx1);
        let idx2 = table.alloc(2, StreamType::FileRead).unwrap();
        assert_eq!(idx1, idx2);
    }
}
