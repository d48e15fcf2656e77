//! Per-volume single-writer queue.
//!
//! Every mutation of a volume goes through one dedicated thread, so appends,
//! deletes and vacuum commits are totally ordered without the volume needing
//! writer-side locking. Requests carry a reply channel; callers block until
//! their mutation is durable. Shutdown drains the queue before the thread
//! exits, so accepted requests are never dropped.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error};

use crate::error::{CoreError, CoreResult};
use crate::volume::volume::{AppendOutcome, Volume};
use silo_needle::{Needle, NeedleId};

enum Request {
    Append {
        needle: Box<Needle>,
        reply: Sender<CoreResult<AppendOutcome>>,
    },
    Delete {
        id: NeedleId,
        reply: Sender<CoreResult<u32>>,
    },
    CommitVacuum {
        reply: Sender<CoreResult<u16>>,
    },
    Sync {
        reply: Sender<CoreResult<()>>,
    },
}

/// Handle to a volume's writer thread.
pub struct VolumeWriter {
    sender: Sender<Request>,
    handle: Option<JoinHandle<()>>,
    volume: Arc<Volume>,
}

impl std::fmt::Debug for VolumeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeWriter")
            .field("volume_id", &self.volume.id())
            .finish_non_exhaustive()
    }
}

impl VolumeWriter {
    /// Spawns the writer thread for `volume` with a bounded request queue.
    #[must_use]
    pub fn spawn(volume: Arc<Volume>, queue_depth: usize) -> Self {
        let (sender, receiver) = bounded(queue_depth.max(1));
        let worker = Arc::clone(&volume);
        let handle = std::thread::Builder::new()
            .name(format!("volume-writer-{}", volume.id()))
            .spawn(move || run(&worker, &receiver))
            .unwrap_or_else(|err| panic!("failed to spawn volume writer thread: {err}"));
        Self {
            sender,
            handle: Some(handle),
            volume,
        }
    }

    /// The volume this writer serializes.
    #[must_use]
    pub fn volume(&self) -> &Arc<Volume> {
        &self.volume
    }

    fn request<T>(
        &self,
        build: impl FnOnce(Sender<CoreResult<T>>) -> Request,
    ) -> CoreResult<T> {
        let (reply, response) = bounded(1);
        self.sender
            .send(build(reply))
            .map_err(|_| CoreError::WriterClosed(self.volume.id()))?;
        response
            .recv()
            .map_err(|_| CoreError::WriterClosed(self.volume.id()))?
    }

    /// Appends a needle through the writer queue.
    pub fn append(&self, needle: Needle) -> CoreResult<AppendOutcome> {
        self.request(|reply| Request::Append {
            needle: Box::new(needle),
            reply,
        })
    }

    /// Deletes a needle through the writer queue.
    pub fn delete(&self, id: NeedleId) -> CoreResult<u32> {
        self.request(|reply| Request::Delete { id, reply })
    }

    /// Commits a staged vacuum with the queue providing write exclusion.
    pub fn commit_vacuum(&self) -> CoreResult<u16> {
        self.request(|reply| Request::CommitVacuum { reply })
    }

    /// Syncs the volume's files through the writer queue.
    pub fn sync(&self) -> CoreResult<()> {
        self.request(|reply| Request::Sync { reply })
    }
}

impl Drop for VolumeWriter {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what was accepted and
        // then exit.
        let (closed, _) = bounded(0);
        drop(std::mem::replace(&mut self.sender, closed));
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(volume_id = %self.volume.id(), "volume writer thread panicked");
            }
        }
    }
}

fn run(volume: &Volume, receiver: &Receiver<Request>) {
    debug!(volume_id = %volume.id(), "volume writer started");
    while let Ok(request) = receiver.recv() {
        match request {
            Request::Append { needle, reply } => {
                let _ = reply.send(volume.append(&needle));
            }
            Request::Delete { id, reply } => {
                let _ = reply.send(volume.delete(id));
            }
            Request::CommitVacuum { reply } => {
                let _ = reply.send(volume.commit_compact());
            }
            Request::Sync { reply } => {
                let _ = reply.send(volume.sync());
            }
        }
    }
    debug!(volume_id = %volume.id(), "volume writer drained and stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeId;
    use crate::volume::volume::VolumeOptions;
    use silo_storage::BackendRegistry;

    fn spawn_writer(dir: &std::path::Path) -> VolumeWriter {
        let volume = Volume::create(
            dir.join("3"),
            VolumeId::new(3),
            String::new(),
            Arc::new(BackendRegistry::with_defaults()),
            "file",
            VolumeOptions::default(),
            u64::MAX,
        )
        .unwrap();
        VolumeWriter::spawn(Arc::new(volume), 16)
    }

    #[test]
    fn mutations_flow_through_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let writer = spawn_writer(dir.path());

        let outcome = writer
            .append(Needle::new(NeedleId::new(1), b"queued".to_vec()))
            .unwrap();
        assert_eq!(outcome.offset % 8, 0);
        assert_eq!(
            writer.volume().read(NeedleId::new(1)).unwrap().data,
            b"queued"
        );
        assert!(writer.delete(NeedleId::new(1)).unwrap() > 0);
        writer.sync().unwrap();
    }

    #[test]
    fn concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let writer = Arc::new(spawn_writer(dir.path()));

        let threads: Vec<_> = (0..4u64)
            .map(|t| {
                let writer = Arc::clone(&writer);
                std::thread::spawn(move || {
                    for i in 0..25u64 {
                        let id = NeedleId::new(t * 100 + i);
                        writer
                            .append(Needle::new(id, id.as_u64().to_le_bytes().to_vec()))
                            .unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let volume = Arc::clone(writer.volume());
        for t in 0..4u64 {
            for i in 0..25u64 {
                let id = NeedleId::new(t * 100 + i);
                assert_eq!(
                    volume.read(id).unwrap().data,
                    id.as_u64().to_le_bytes().to_vec()
                );
            }
        }
    }

    #[test]
    fn vacuum_commit_through_writer() {
        let dir = tempfile::tempdir().unwrap();
        let writer = spawn_writer(dir.path());
        writer
            .append(Needle::new(NeedleId::new(1), vec![1; 10]))
            .unwrap();
        writer
            .append(Needle::new(NeedleId::new(2), vec![2; 20]))
            .unwrap();
        writer.delete(NeedleId::new(1)).unwrap();

        writer.volume().compact().unwrap();
        assert_eq!(writer.commit_vacuum().unwrap(), 1);
        writer.volume().cleanup_compact().unwrap();
        assert_eq!(
            writer.volume().read(NeedleId::new(2)).unwrap().data,
            vec![2; 20]
        );
    }
}
