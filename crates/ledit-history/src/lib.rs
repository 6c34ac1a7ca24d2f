// SPDX-License-Identifier: Apache-2.0
//! Revision tracking for file mutations.
//!
//! Every file write or edit the agent performs is recorded as a before/after
//! snapshot.  Records accumulate as *pending* until [`ChangeTracker::commit`]
//! stamps them with a revision id; [`ChangeTracker::rollback`] restores the
//! original bytes of every active record in a revision.  Records are never
//! deleted — the full history stays auditable for the lifetime of the
//! session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// Stable identifier grouping the records committed together.
pub type RevisionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Active,
    Reverted,
}

/// One tracked file mutation.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub revision_id: RevisionId,
    pub file_path: PathBuf,
    /// `None` when the file did not exist before the change.
    pub original: Option<Vec<u8>>,
    pub new: Vec<u8>,
    pub status: ChangeStatus,
    pub instruction: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("nothing to revert for revision {0}")]
    NothingToRevert(String),
    #[error("change tracking is not enabled")]
    NotEnabled,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A snapshot awaiting commit.
#[derive(Debug, Clone)]
struct PendingChange {
    file_path: PathBuf,
    original: Option<Vec<u8>>,
    new: Vec<u8>,
}

/// Records per-file before/after snapshots keyed by revision id.
///
/// The tracker does not write files itself (except during rollback); tools
/// call `track_write` / `track_edit` *before* performing the mutation so the
/// original bytes are captured from disk.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    enabled: bool,
    instruction: String,
    pending: Vec<PendingChange>,
    records: Vec<ChangeRecord>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking changes under the given instruction text.
    pub fn enable(&mut self, instruction: impl Into<String>) {
        self.enabled = true;
        self.instruction = instruction.into();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record an upcoming whole-file write.  Reads the current contents as
    /// the original snapshot; a missing file records `original = None`.
    pub fn track_write(&mut self, path: &Path, new: &[u8]) -> Result<(), HistoryError> {
        if !self.enabled {
            return Err(HistoryError::NotEnabled);
        }
        let original = read_if_exists(path)?;
        self.pending.push(PendingChange {
            file_path: path.to_path_buf(),
            original,
            new: new.to_vec(),
        });
        Ok(())
    }

    /// Record an upcoming substring edit as full before/after contents.
    pub fn track_edit(
        &mut self,
        path: &Path,
        old_str: &str,
        new_str: &str,
    ) -> Result<(), HistoryError> {
        if !self.enabled {
            return Err(HistoryError::NotEnabled);
        }
        let original = read_if_exists(path)?;
        let before = original.clone().unwrap_or_default();
        let before_text = String::from_utf8_lossy(&before);
        let after_text = before_text.replacen(old_str, new_str, 1);
        self.pending.push(PendingChange {
            file_path: path.to_path_buf(),
            original,
            new: after_text.into_bytes(),
        });
        Ok(())
    }

    /// Assign one revision id to all pending records and mark them active.
    /// Returns `None` when there was nothing pending.
    ///
    /// Multiple pending snapshots of the same file collapse into a single
    /// record — the oldest original paired with the newest contents — so a
    /// revision holds exactly one active record per file.
    pub fn commit(&mut self, llm_response: &str) -> Option<RevisionId> {
        if self.pending.is_empty() {
            return None;
        }
        let revision_id = Uuid::new_v4().to_string();
        let timestamp = Utc::now();
        let instruction = if llm_response.is_empty() {
            self.instruction.clone()
        } else {
            llm_response.to_string()
        };
        let mut coalesced: Vec<PendingChange> = Vec::new();
        for p in self.pending.drain(..) {
            match coalesced.iter_mut().find(|c| c.file_path == p.file_path) {
                // The original stays the oldest snapshot; the contents win.
                Some(existing) => existing.new = p.new,
                None => coalesced.push(p),
            }
        }
        for p in coalesced {
            self.records.push(ChangeRecord {
                revision_id: revision_id.clone(),
                file_path: p.file_path,
                original: p.original,
                new: p.new,
                status: ChangeStatus::Active,
                instruction: instruction.clone(),
                timestamp,
            });
        }
        debug!(revision = %revision_id, "committed change records");
        Some(revision_id)
    }

    /// Restore the original bytes of every active record in `revision_id`
    /// and mark them reverted.  Fails with [`HistoryError::NothingToRevert`]
    /// when the revision has no active records.
    pub fn rollback(&mut self, revision_id: &str) -> Result<Vec<PathBuf>, HistoryError> {
        let mut restored = Vec::new();
        // Commit coalesces same-path changes, so a revision holds at most one
        // record per file and restore order within it is immaterial.
        let mut any = false;
        for i in (0..self.records.len()).rev() {
            if self.records[i].revision_id != revision_id
                || self.records[i].status != ChangeStatus::Active
            {
                continue;
            }
            any = true;
            let (path, original) = {
                let r = &self.records[i];
                (r.file_path.clone(), r.original.clone())
            };
            match original {
                Some(bytes) => {
                    if let Some(parent) = path.parent() {
                        if !parent.as_os_str().is_empty() {
                            std::fs::create_dir_all(parent).map_err(|e| HistoryError::Io {
                                path: path.clone(),
                                source: e,
                            })?;
                        }
                    }
                    std::fs::write(&path, &bytes).map_err(|e| HistoryError::Io {
                        path: path.clone(),
                        source: e,
                    })?;
                }
                // The file did not exist before this revision created it.
                None => match std::fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(HistoryError::Io {
                            path: path.clone(),
                            source: e,
                        })
                    }
                },
            }
            self.records[i].status = ChangeStatus::Reverted;
            restored.push(path);
        }
        if !any {
            return Err(HistoryError::NothingToRevert(revision_id.to_string()));
        }
        debug!(revision = %revision_id, files = restored.len(), "rolled back revision");
        Ok(restored)
    }

    /// All records, oldest first.
    pub fn history(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Records belonging to one revision.
    pub fn records_for(&self, revision_id: &str) -> Vec<&ChangeRecord> {
        self.records
            .iter()
            .filter(|r| r.revision_id == revision_id)
            .collect()
    }

    /// Records touching one file, oldest first.
    pub fn records_for_file(&self, path: &Path) -> Vec<&ChangeRecord> {
        self.records
            .iter()
            .filter(|r| r.file_path == path)
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, HistoryError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HistoryError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_tracker() -> ChangeTracker {
        let mut t = ChangeTracker::new();
        t.enable("test instruction");
        t
    }

    #[test]
    fn tracking_requires_enable() {
        let mut t = ChangeTracker::new();
        let err = t.track_write(Path::new("/tmp/x"), b"new").unwrap_err();
        assert!(matches!(err, HistoryError::NotEnabled));
    }

    #[test]
    fn commit_with_nothing_pending_returns_none() {
        let mut t = enabled_tracker();
        assert!(t.commit("response").is_none());
    }

    #[test]
    fn commit_drains_pending_and_assigns_one_revision() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        let mut t = enabled_tracker();
        t.track_write(&a, b"aa").unwrap();
        t.track_write(&b, b"bb").unwrap();
        let rev = t.commit("did things").unwrap();
        assert!(!t.has_pending());
        let records = t.records_for(&rev);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == ChangeStatus::Active));
        assert!(records.iter().all(|r| r.instruction == "did things"));
    }

    #[test]
    fn rollback_restores_original_and_marks_reverted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking_test.go");
        std::fs::write(&path, "func original() {}").unwrap();

        let mut t = enabled_tracker();
        t.track_write(&path, b"func updated() {}").unwrap();
        std::fs::write(&path, "func updated() {}").unwrap();
        let rev = t.commit("update function").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "func updated() {}");

        t.rollback(&rev).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "func original() {}");
        assert!(t
            .records_for(&rev)
            .iter()
            .all(|r| r.status == ChangeStatus::Reverted));
    }

    #[test]
    fn second_rollback_fails_with_nothing_to_revert() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "one").unwrap();

        let mut t = enabled_tracker();
        t.track_write(&path, b"two").unwrap();
        std::fs::write(&path, "two").unwrap();
        let rev = t.commit("x").unwrap();

        t.rollback(&rev).unwrap();
        let err = t.rollback(&rev).unwrap_err();
        assert!(matches!(err, HistoryError::NothingToRevert(_)));
    }

    #[test]
    fn rollback_of_unknown_revision_fails() {
        let mut t = enabled_tracker();
        let err = t.rollback("no-such-revision").unwrap_err();
        assert!(matches!(err, HistoryError::NothingToRevert(_)));
    }

    #[test]
    fn rollback_deletes_file_that_did_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("created.txt");

        let mut t = enabled_tracker();
        t.track_write(&path, b"fresh").unwrap();
        std::fs::write(&path, "fresh").unwrap();
        let rev = t.commit("create file").unwrap();

        assert!(path.exists());
        t.rollback(&rev).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn track_edit_records_full_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code.rs");
        std::fs::write(&path, "fn a() {}\nfn b() {}\n").unwrap();

        let mut t = enabled_tracker();
        t.track_edit(&path, "fn a()", "fn alpha()").unwrap();
        let rev = t.commit("rename").unwrap();

        let rec = &t.records_for(&rev)[0];
        assert_eq!(
            String::from_utf8_lossy(rec.original.as_ref().unwrap()),
            "fn a() {}\nfn b() {}\n"
        );
        assert_eq!(
            String::from_utf8_lossy(&rec.new),
            "fn alpha() {}\nfn b() {}\n"
        );
    }

    #[test]
    fn records_are_never_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "v1").unwrap();

        let mut t = enabled_tracker();
        t.track_write(&path, b"v2").unwrap();
        std::fs::write(&path, "v2").unwrap();
        let rev1 = t.commit("first").unwrap();
        t.rollback(&rev1).unwrap();

        t.track_write(&path, b"v3").unwrap();
        std::fs::write(&path, "v3").unwrap();
        let _rev2 = t.commit("second").unwrap();

        // history keeps both the reverted and the active record
        assert_eq!(t.history().len(), 2);
        assert_eq!(t.records_for_file(&path).len(), 2);
    }

    #[test]
    fn stacked_changes_to_same_file_coalesce_into_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.txt");
        std::fs::write(&path, "base").unwrap();

        let mut t = enabled_tracker();
        t.track_write(&path, b"middle").unwrap();
        std::fs::write(&path, "middle").unwrap();
        t.track_write(&path, b"top").unwrap();
        std::fs::write(&path, "top").unwrap();
        let rev = t.commit("two writes").unwrap();

        // the two snapshots collapse: oldest original, newest contents
        let records = t.records_for(&rev);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original.as_deref(), Some(b"base".as_slice()));
        assert_eq!(records[0].new, b"top".to_vec());

        t.rollback(&rev).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "base");
    }

    #[test]
    fn exactly_one_active_record_per_revision_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a0").unwrap();

        let mut t = enabled_tracker();
        // two writes to a, one to b, all in the same batch
        t.track_write(&a, b"a1").unwrap();
        std::fs::write(&a, "a1").unwrap();
        t.track_write(&a, b"a2").unwrap();
        std::fs::write(&a, "a2").unwrap();
        t.track_write(&b, b"b1").unwrap();
        std::fs::write(&b, "b1").unwrap();
        t.commit("batch").unwrap();

        let mut seen = std::collections::HashSet::new();
        for r in t.history() {
            if r.status == ChangeStatus::Active {
                assert!(
                    seen.insert((r.revision_id.clone(), r.file_path.clone())),
                    "duplicate active record for {:?}",
                    r.file_path
                );
            }
        }
        assert_eq!(seen.len(), 2);
    }
}
