//! Vacuum: rewriting a volume without its garbage.
//!
//! Compaction stages a fresh `.cpd`/`.cpx` pair holding only live, unexpired
//! needles, written against an incremented compaction revision. Reads and
//! writes continue against the original pair the whole time; only the commit
//! step, which catches up on changes made since staging and renames the pair
//! into place, needs the volume to itself. The writer queue provides that
//! exclusivity.

use std::fs;

use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::index::{decode_index_entry, encode_index_entry, NeedleValue, INDEX_ENTRY_SIZE};
use crate::super_block::read_super_block;
use crate::volume::volume::{
    now_secs, sibling_path, Volume, COMPACT_DATA_EXT, COMPACT_INDEX_EXT, DATA_EXT, INDEX_EXT,
};
use silo_needle::{actual_size, decode, NeedleId, TOMBSTONE_SIZE};
use silo_storage::StorageBackend;

/// Phase of a volume's vacuum cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VacuumState {
    /// No vacuum in progress.
    #[default]
    Idle,
    /// A staged pair exists or is being written.
    Compacting,
    /// The staged pair has been swapped in; leftovers may remain.
    Committed,
}

impl VacuumState {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Compacting => "compacting",
            Self::Committed => "committed",
        }
    }
}

/// Bookkeeping carried from [`Volume::compact`] to [`Volume::commit_compact`].
#[derive(Debug, Default)]
pub(crate) struct VacuumProgress {
    pub(crate) state: VacuumState,
    /// Index log size at the time the staged pair was cut.
    pub(crate) index_size_at_compact: u64,
    /// Revision written into the staged superblock.
    pub(crate) staged_revision: u16,
    /// Expected byte size of the staged data file.
    pub(crate) staged_data_size: u64,
}

impl Volume {
    /// Current vacuum phase.
    #[must_use]
    pub fn vacuum_state(&self) -> VacuumState {
        self.vacuum.lock().state
    }

    /// Whether the garbage ratio exceeds `threshold`.
    pub fn needs_vacuum(&self, threshold: f64) -> CoreResult<bool> {
        Ok(self.garbage_ratio()? > threshold)
    }

    /// Stages a compacted copy of the volume as a `.cpd`/`.cpx` pair.
    ///
    /// Only live index entries are carried over; deleted, superseded and
    /// expired records are dropped. The staged superblock carries the next
    /// compaction revision. Concurrent reads and appends stay untouched.
    pub fn compact(&self) -> CoreResult<()> {
        {
            let mut progress = self.vacuum.lock();
            if progress.state != VacuumState::Idle {
                return Err(CoreError::VacuumState {
                    volume_id: self.id,
                    state: progress.state.name(),
                    operation: "compact",
                });
            }
            progress.state = VacuumState::Compacting;
        }
        match self.stage_compacted_pair() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.remove_staging();
                self.vacuum.lock().state = VacuumState::Idle;
                Err(err)
            }
        }
    }

    fn stage_compacted_pair(&self) -> CoreResult<()> {
        let old_super_block = self.super_block.read().clone();
        let staged_revision = old_super_block.compact_revision.wrapping_add(1);
        let mut staged_super_block = old_super_block;
        staged_super_block.compact_revision = staged_revision;

        // Snapshot the live entries; anything that changes afterwards is
        // caught up at commit from the index log tail.
        let index_size_at_compact = self.nm.read().index_size()?;
        let mut live: Vec<(NeedleId, NeedleValue)> = self.nm.read().iter().collect();
        live.sort_by_key(|(_, value)| value.offset);

        self.remove_staging();
        let mut cpd = self
            .registry
            .create(&self.backend_name, &self.file_path(COMPACT_DATA_EXT))?;
        let mut cpx = self
            .registry
            .create(&self.backend_name, &self.file_path(COMPACT_INDEX_EXT))?;
        cpd.append(&staged_super_block.to_bytes())?;

        let version = staged_super_block.version;
        let now = now_secs();
        let mut kept = 0usize;
        for (id, value) in live {
            let record_len = actual_size(value.size, version);
            let bytes = self
                .data
                .read()
                .read_at(value.actual_offset(), record_len as usize)?;
            let needle = decode(&bytes, value.size, version).map_err(|err| {
                CoreError::corrupt(self.id, value.actual_offset(), err.to_string())
            })?;
            if needle.id != id {
                return Err(CoreError::corrupt(
                    self.id,
                    value.actual_offset(),
                    format!("index points at needle {}, expected {id}", needle.id),
                ));
            }
            if needle.is_expired(now) {
                continue;
            }
            let new_offset = cpd.append(&bytes)?;
            cpx.append(&encode_index_entry(
                id,
                NeedleValue::offset_from_bytes(new_offset),
                value.size,
            ))?;
            kept += 1;
        }
        cpd.flush()?;
        cpd.sync()?;
        cpx.flush()?;
        cpx.sync()?;
        let staged_data_size = cpd.size()?;

        let mut progress = self.vacuum.lock();
        progress.index_size_at_compact = index_size_at_compact;
        progress.staged_revision = staged_revision;
        progress.staged_data_size = staged_data_size;
        info!(
            volume_id = %self.id,
            kept,
            staged_revision,
            staged_data_size,
            "staged compacted volume"
        );
        Ok(())
    }

    /// Verifies the staged pair, catches up on changes made since staging,
    /// and renames it over the live pair.
    ///
    /// Must run with no concurrent mutations; the volume writer queues them.
    /// Returns the new compaction revision. A failed commit preserves the
    /// live pair, removes the staging, and returns the cycle to idle.
    pub fn commit_compact(&self) -> CoreResult<u16> {
        let (index_size_at_compact, staged_revision, staged_data_size) = {
            let progress = self.vacuum.lock();
            if progress.state != VacuumState::Compacting {
                return Err(CoreError::VacuumState {
                    volume_id: self.id,
                    state: progress.state.name(),
                    operation: "commit",
                });
            }
            (
                progress.index_size_at_compact,
                progress.staged_revision,
                progress.staged_data_size,
            )
        };

        match self.commit_staged_pair(index_size_at_compact, staged_revision, staged_data_size) {
            Ok(()) => {
                self.vacuum.lock().state = VacuumState::Committed;
                info!(volume_id = %self.id, revision = staged_revision, "committed vacuum");
                Ok(staged_revision)
            }
            Err(err) => {
                // A failed commit leaves the live pair untouched; drop the
                // staging and return to idle so the next cycle starts clean.
                self.remove_staging();
                self.vacuum.lock().state = VacuumState::Idle;
                Err(err)
            }
        }
    }

    fn commit_staged_pair(
        &self,
        index_size_at_compact: u64,
        staged_revision: u16,
        mut staged_data_size: u64,
    ) -> CoreResult<()> {
        let cpd_path = self.file_path(COMPACT_DATA_EXT);
        let cpx_path = self.file_path(COMPACT_INDEX_EXT);
        let mut cpd = self.registry.create(&self.backend_name, &cpd_path)?;
        let mut cpx = self.registry.create(&self.backend_name, &cpx_path)?;

        // The staged superblock must carry exactly the revision we staged.
        let staged_super_block = read_super_block(self.id, cpd.as_ref())?;
        if staged_super_block.compact_revision != staged_revision {
            return Err(CoreError::CompactRevisionMismatch {
                volume_id: self.id,
                expected: staged_revision,
                actual: staged_super_block.compact_revision,
            });
        }

        staged_data_size =
            self.catch_up_staged_pair(&mut *cpd, &mut *cpx, index_size_at_compact, staged_data_size)?;

        // Size check before the swap: a short or oversized staged file means
        // the staging is not what we wrote.
        let actual_cpd_size = cpd.size()?;
        if actual_cpd_size != staged_data_size {
            return Err(CoreError::corrupt(
                self.id,
                actual_cpd_size,
                format!("staged data file is {actual_cpd_size} bytes, expected {staged_data_size}"),
            ));
        }
        let cpx_size = cpx.size()?;
        if cpx_size % INDEX_ENTRY_SIZE as u64 != 0 {
            return Err(CoreError::corrupt(
                self.id,
                cpx_size,
                format!("staged index size {cpx_size} is not a multiple of {INDEX_ENTRY_SIZE}"),
            ));
        }
        drop(cpd);
        drop(cpx);

        // Swap. Rename is atomic per file; the data file goes first so a
        // crash between the two renames leaves a rebuildable index behind.
        fs::rename(&cpd_path, self.file_path(DATA_EXT))?;
        fs::rename(&cpx_path, self.file_path(INDEX_EXT))?;

        self.reopen_after_swap()
    }

    /// Applies index log entries written after staging to the staged pair.
    fn catch_up_staged_pair(
        &self,
        cpd: &mut dyn StorageBackend,
        cpx: &mut dyn StorageBackend,
        index_size_at_compact: u64,
        mut staged_data_size: u64,
    ) -> CoreResult<u64> {
        let nm = self.nm.read();
        let index_size = nm.index_size()?;
        if index_size == index_size_at_compact {
            return Ok(staged_data_size);
        }
        if index_size < index_size_at_compact {
            return Err(CoreError::corrupt(
                self.id,
                index_size,
                "index log shrank during compaction",
            ));
        }
        debug!(
            volume_id = %self.id,
            delta = index_size - index_size_at_compact,
            "catching up staged pair with post-staging changes"
        );

        let version = self.super_block.read().version;
        // Only the entries written after staging matter.
        let tail = nm.read_index_from(index_size_at_compact)?;
        let mut pending: Vec<(NeedleId, u32, u32)> = Vec::new();
        for entry in tail.chunks_exact(INDEX_ENTRY_SIZE) {
            pending.push(decode_index_entry(entry.try_into().unwrap()));
        }

        for (id, offset, size) in pending {
            if size == TOMBSTONE_SIZE {
                cpx.append(&encode_index_entry(id, 0, TOMBSTONE_SIZE))?;
                continue;
            }
            let value = NeedleValue { offset, size };
            let record_len = actual_size(size, version);
            let bytes = self
                .data
                .read()
                .read_at(value.actual_offset(), record_len as usize)?;
            let new_offset = cpd.append(&bytes)?;
            cpx.append(&encode_index_entry(
                id,
                NeedleValue::offset_from_bytes(new_offset),
                size,
            ))?;
            staged_data_size += record_len;
        }
        cpd.flush()?;
        cpd.sync()?;
        cpx.flush()?;
        cpx.sync()?;
        Ok(staged_data_size)
    }

    fn reopen_after_swap(&self) -> CoreResult<()> {
        let data = self
            .registry
            .create(&self.backend_name, &self.file_path(DATA_EXT))?;
        let super_block = read_super_block(self.id, data.as_ref())?;
        let index = self
            .registry
            .create(&self.backend_name, &self.file_path(INDEX_EXT))?;
        let nm = crate::index::NeedleMap::load(self.id, super_block.version, index)?;

        let size = data.size()?;
        *self.data.write() = data;
        *self.nm.write() = nm;
        *self.super_block.write() = super_block;
        self.read_only
            .store(size >= self.size_limit, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    /// Removes staged files and returns the vacuum cycle to idle.
    ///
    /// Safe to call in any state; also used to clear leftovers from an
    /// interrupted vacuum after a restart.
    pub fn cleanup_compact(&self) -> CoreResult<()> {
        self.remove_staging();
        self.vacuum.lock().state = VacuumState::Idle;
        Ok(())
    }

    fn remove_staging(&self) {
        for ext in [COMPACT_DATA_EXT, COMPACT_INDEX_EXT] {
            let path = sibling_path(&self.base_path, ext);
            if path.exists() {
                if let Err(err) = fs::remove_file(&path) {
                    warn!(volume_id = %self.id, path = %path.display(), %err, "failed to remove staging file");
                }
            }
        }
    }
}
