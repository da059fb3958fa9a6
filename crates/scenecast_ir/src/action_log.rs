//! Scene Action Log - append-only record of scene mutations
//!
//! The log validates each action against its own liveness table before
//! recording it, so a release without a live allocation never enters the
//! stream. Actions accumulate in an open batch; [`SceneActionLog::seal`]
//! closes the batch into an immutable chunk keyed by flush sequence.
//!
//! ```text
//! append ─► open batch ─► seal(seq) ─► Arc<[SceneAction]> chunk
//!                                          │
//!                             snapshot_range(from, to) (shared, read-only)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::action::{ActionOpcode, ObjectKind, SceneAction};
use crate::error::ActionError;
use crate::ids::ObjectHandle;

/// A sealed batch of actions
#[derive(Debug, Clone)]
pub struct LogChunk {
    /// Flush sequence the batch was sealed under
    pub sequence: u64,
    /// Position of the first action in the whole log
    pub offset: u64,
    pub actions: Arc<[SceneAction]>,
}

/// Action counts, used to size send buffers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    /// Actions recorded since creation or the last reset
    pub total: u64,
    /// Actions in the open batch
    pub open: u64,
    /// Recorded actions per opcode
    pub per_opcode: BTreeMap<ActionOpcode, u64>,
    /// Bytes of embedded data carried by data buffer actions
    pub embedded_bytes: u64,
}

/// Append-only action log of one scene
#[derive(Debug, Default)]
pub struct SceneActionLog {
    chunks: Vec<LogChunk>,
    open: Vec<SceneAction>,
    live: HashMap<ObjectHandle, ObjectKind>,
    retired: HashSet<ObjectHandle>,
    counts: ActionCounts,
}

impl SceneActionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an action without recording it
    pub fn validate(&self, action: &SceneAction) -> Result<(), ActionError> {
        if let Some((handle, _)) = action.allocated() {
            if !handle.is_valid() {
                return Err(ActionError::InvalidHandle(handle));
            }
            if self.live.contains_key(&handle) {
                return Err(ActionError::AlreadyAllocated(handle));
            }
            if self.retired.contains(&handle) {
                return Err(ActionError::HandleReused(handle));
            }
        }

        for req in action.required_handles() {
            let actual = *self
                .live
                .get(&req.handle)
                .ok_or(ActionError::UnknownHandle(req.handle))?;
            if let Some(expected) = req.kind {
                if actual != expected {
                    return Err(ActionError::WrongKind {
                        handle: req.handle,
                        expected,
                        actual,
                    });
                }
            }
        }

        Ok(())
    }

    /// Validate and record an action
    pub fn append(&mut self, action: SceneAction) -> Result<(), ActionError> {
        self.validate(&action)?;
        self.record(action);
        Ok(())
    }

    fn record(&mut self, action: SceneAction) {
        if let Some((handle, kind)) = action.allocated() {
            self.live.insert(handle, kind);
        }
        if let Some(handle) = action.released() {
            self.live.remove(&handle);
            self.retired.insert(handle);
        }

        self.counts.total += 1;
        self.counts.open += 1;
        *self.counts.per_opcode.entry(action.opcode()).or_insert(0) += 1;
        match &action {
            SceneAction::AllocateDataBuffer { data, .. } | SceneAction::UpdateDataBuffer { data, .. } => {
                self.counts.embedded_bytes += data.len() as u64;
            }
            _ => {}
        }

        self.open.push(action);
    }

    /// Actions appended since the last seal
    pub fn open_actions(&self) -> &[SceneAction] {
        &self.open
    }

    /// Whether the open batch holds actions
    pub fn has_open_actions(&self) -> bool {
        !self.open.is_empty()
    }

    /// Close the open batch under a flush sequence.
    ///
    /// Returns `None` when the batch is empty.
    pub fn seal(&mut self, sequence: u64) -> Option<Arc<[SceneAction]>> {
        if self.open.is_empty() {
            return None;
        }
        let offset = self.counts.total - self.counts.open;
        let actions: Arc<[SceneAction]> = std::mem::take(&mut self.open).into();
        self.counts.open = 0;
        self.chunks.push(LogChunk {
            sequence,
            offset,
            actions: Arc::clone(&actions),
        });
        Some(actions)
    }

    /// Sealed chunks whose log position lies in `from..to` (action offsets).
    ///
    /// Chunks are shared, never copied.
    pub fn snapshot_range(&self, from: u64, to: u64) -> Vec<LogChunk> {
        self.chunks
            .iter()
            .filter(|chunk| {
                let end = chunk.offset + chunk.actions.len() as u64;
                chunk.offset < to && end > from
            })
            .cloned()
            .collect()
    }

    /// Sealed chunk for a flush sequence
    pub fn chunk(&self, sequence: u64) -> Option<&LogChunk> {
        self.chunks.iter().rev().find(|chunk| chunk.sequence == sequence)
    }

    /// All sealed chunks in order
    pub fn chunks(&self) -> &[LogChunk] {
        &self.chunks
    }

    /// Action counts
    pub fn size_info(&self) -> &ActionCounts {
        &self.counts
    }

    /// Number of recorded actions
    pub fn len(&self) -> u64 {
        self.counts.total
    }

    pub fn is_empty(&self) -> bool {
        self.counts.total == 0
    }

    /// Kind of a live handle
    pub fn kind_of(&self, handle: ObjectHandle) -> Option<ObjectKind> {
        self.live.get(&handle).copied()
    }

    /// Discard everything. Only used when the scene itself is destroyed.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(raw: u64) -> ObjectHandle {
        ObjectHandle::from_raw(raw)
    }

    fn alloc(raw: u64) -> SceneAction {
        SceneAction::AllocateNode {
            handle: h(raw),
            name: String::new(),
        }
    }

    #[test]
    fn test_release_requires_live_allocation() {
        let mut log = SceneActionLog::new();
        assert_eq!(
            log.append(SceneAction::ReleaseHandle { handle: h(1) }),
            Err(ActionError::UnknownHandle(h(1)))
        );
        assert!(log.is_empty());

        log.append(alloc(1)).unwrap();
        log.append(SceneAction::ReleaseHandle { handle: h(1) }).unwrap();
        assert_eq!(
            log.append(SceneAction::ReleaseHandle { handle: h(1) }),
            Err(ActionError::UnknownHandle(h(1)))
        );
    }

    #[test]
    fn test_handles_never_reused() {
        let mut log = SceneActionLog::new();
        log.append(alloc(1)).unwrap();
        assert_eq!(log.append(alloc(1)), Err(ActionError::AlreadyAllocated(h(1))));
        log.append(SceneAction::ReleaseHandle { handle: h(1) }).unwrap();
        assert_eq!(log.append(alloc(1)), Err(ActionError::HandleReused(h(1))));
    }

    #[test]
    fn test_kind_checked_at_append() {
        let mut log = SceneActionLog::new();
        log.append(SceneAction::AllocateRenderPass { handle: h(1) }).unwrap();
        let err = log
            .append(SceneAction::SetVisibility {
                node: h(1),
                visibility: Default::default(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::WrongKind {
                handle: h(1),
                expected: ObjectKind::Node,
                actual: ObjectKind::RenderPass,
            }
        );
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_seal_and_snapshot_range() {
        let mut log = SceneActionLog::new();
        assert!(log.seal(1).is_none());

        log.append(alloc(1)).unwrap();
        log.append(alloc(2)).unwrap();
        let first = log.seal(1).unwrap();
        assert_eq!(first.len(), 2);

        log.append(alloc(3)).unwrap();
        log.seal(2).unwrap();

        assert_eq!(log.snapshot_range(0, 3).len(), 2);
        let tail = log.snapshot_range(2, 3);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);
        assert_eq!(tail[0].offset, 2);

        // Shared, not copied
        assert!(Arc::ptr_eq(&log.chunk(1).unwrap().actions, &first));
    }

    #[test]
    fn test_size_info_counts() {
        let mut log = SceneActionLog::new();
        log.append(alloc(1)).unwrap();
        log.append(SceneAction::AllocateDataBuffer { handle: h(2), data: vec![0; 16] })
            .unwrap();
        log.append(SceneAction::SetTranslation { node: h(1), value: [1.0; 3] }).unwrap();

        let info = log.size_info();
        assert_eq!(info.total, 3);
        assert_eq!(info.open, 3);
        assert_eq!(info.per_opcode[&ActionOpcode::AllocateNode], 1);
        assert_eq!(info.embedded_bytes, 16);

        log.seal(1);
        assert_eq!(log.size_info().open, 0);

        log.reset();
        assert!(log.is_empty());
        assert!(log.kind_of(h(1)).is_none());
    }
}
