//! FIFO command queue between host threads and the worker.

use std::{collections::VecDeque, fmt, time::Duration};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use url::Url;

use crate::{SourceError, SourceResult};

/// Host-visible command kind, echoed in rejections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Open,
    GetSample,
    Seek,
    SwitchStream,
    Diagnostics,
    SetBitrateRange,
    ParseChunk,
    ReplaceMedia,
    Close,
}

pub(crate) enum SourceCommand {
    Open { manifest: Bytes, base_url: Url },
    GetSample { stream: usize },
    Seek { position: Duration },
    SwitchStream { from: usize, to: usize },
    Diagnostics,
    SetBitrateRange { stream: usize, min: u64, max: u64 },
    /// Parse the header of a loaded chunk. Internal, never answered.
    ParseChunk { stream: usize, chunk: usize },
    /// Replace the chunk `offset` ahead of playback. Answered only when the
    /// host asked for it.
    ReplaceMedia {
        stream: usize,
        offset: Duration,
        reply: bool,
    },
    Close,
}

impl SourceCommand {
    pub(crate) fn kind(&self) -> CommandKind {
        match self {
            Self::Open { .. } => CommandKind::Open,
            Self::GetSample { .. } => CommandKind::GetSample,
            Self::Seek { .. } => CommandKind::Seek,
            Self::SwitchStream { .. } => CommandKind::SwitchStream,
            Self::Diagnostics => CommandKind::Diagnostics,
            Self::SetBitrateRange { .. } => CommandKind::SetBitrateRange,
            Self::ParseChunk { .. } => CommandKind::ParseChunk,
            Self::ReplaceMedia { .. } => CommandKind::ReplaceMedia,
            Self::Close => CommandKind::Close,
        }
    }

    /// Whether the host expects a response to this command.
    pub(crate) fn expects_reply(&self) -> bool {
        match self {
            Self::ParseChunk { .. } => false,
            Self::ReplaceMedia { reply, .. } => *reply,
            _ => true,
        }
    }
}

impl fmt::Debug for SourceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { manifest, base_url } => f
                .debug_struct("Open")
                .field("manifest_len", &manifest.len())
                .field("base_url", &base_url.as_str())
                .finish(),
            Self::GetSample { stream } => f.debug_struct("GetSample").field("stream", stream).finish(),
            Self::Seek { position } => f.debug_struct("Seek").field("position", position).finish(),
            Self::SwitchStream { from, to } => f
                .debug_struct("SwitchStream")
                .field("from", from)
                .field("to", to)
                .finish(),
            Self::Diagnostics => f.write_str("Diagnostics"),
            Self::SetBitrateRange { stream, min, max } => f
                .debug_struct("SetBitrateRange")
                .field("stream", stream)
                .field("min", min)
                .field("max", max)
                .finish(),
            Self::ParseChunk { stream, chunk } => f
                .debug_struct("ParseChunk")
                .field("stream", stream)
                .field("chunk", chunk)
                .finish(),
            Self::ReplaceMedia {
                stream,
                offset,
                reply,
            } => f
                .debug_struct("ReplaceMedia")
                .field("stream", stream)
                .field("offset", offset)
                .field("reply", reply)
                .finish(),
            Self::Close => f.write_str("Close"),
        }
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<SourceCommand>,
    closed: bool,
}

/// Blocking FIFO. Host threads push, the worker pops.
#[derive(Default)]
pub(crate) struct CommandQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, command: SourceCommand) -> SourceResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SourceError::Closed);
        }
        state.items.push_back(command);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Next command, blocking while the queue is empty.
    ///
    /// `None` once the queue is closed.
    pub(crate) fn pop(&self) -> Option<SourceCommand> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(command) = state.items.pop_front() {
                return Some(command);
            }
            self.ready.wait(&mut state);
        }
    }

    /// Refuse further pushes and hand back everything still queued.
    pub(crate) fn close(&self) -> Vec<SourceCommand> {
        let mut state = self.state.lock();
        state.closed = true;
        let drained = state.items.drain(..).collect();
        drop(state);
        self.ready.notify_all();
        drained
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CommandQueue")
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = CommandQueue::new();
        queue.push(SourceCommand::GetSample { stream: 1 }).unwrap();
        queue.push(SourceCommand::Diagnostics).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|c| c.kind()), Some(CommandKind::GetSample));
        assert_eq!(queue.pop().map(|c| c.kind()), Some(CommandKind::Diagnostics));
    }

    #[test]
    fn close_drains_and_refuses() {
        let queue = CommandQueue::new();
        queue.push(SourceCommand::Diagnostics).unwrap();
        queue
            .push(SourceCommand::ParseChunk { stream: 0, chunk: 2 })
            .unwrap();
        let drained = queue.close();
        assert_eq!(drained.len(), 2);
        assert!(!drained[1].expects_reply());
        assert!(matches!(
            queue.push(SourceCommand::Diagnostics),
            Err(SourceError::Closed)
        ));
        assert!(queue.pop().is_none());
        assert!(queue.is_closed());
    }

    #[test]
    fn pop_wakes_on_push() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop().map(|c| c.kind()))
        };
        queue.push(SourceCommand::Close).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(CommandKind::Close));
    }

    #[test]
    fn pop_wakes_on_close() {
        let queue = Arc::new(CommandQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop().is_none())
        };
        queue.close();
        assert!(consumer.join().unwrap());
    }
}
