//! Owner of the in-memory server list
//!
//! All mutation goes through [`ServerRepository`]. Background work such as
//! availability probing never touches the list directly: workers send
//! [`AvailabilityUpdate`]s over a channel and the owner applies them with
//! [`ServerRepository::apply_availability_updates`].

use crate::error::{ConanError, ErrorCategory, ErrorKind, Result};
use crate::servers::{self, Availability, Server};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of probing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityUpdate {
    pub id: Uuid,
    pub availability: Availability,
}

pub struct ServerRepository {
    files: Mutex<Vec<PathBuf>>,
    /// Backing files the last reload could read; only these are rewritten
    /// when they end up without records.
    loaded: Mutex<Vec<PathBuf>>,
    servers: Mutex<Vec<Server>>,
    updates_tx: Sender<AvailabilityUpdate>,
    updates_rx: Mutex<Receiver<AvailabilityUpdate>>,
}

impl ServerRepository {
    /// An empty repository backed by `files`. Call [`reload`](Self::reload)
    /// to read them.
    pub fn new(files: Vec<PathBuf>) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel();
        Self {
            files: Mutex::new(files),
            loaded: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
            updates_tx,
            updates_rx: Mutex::new(updates_rx),
        }
    }

    fn servers(&self) -> MutexGuard<'_, Vec<Server>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loaded_files(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the list with a fresh read of every backing file. All record
    /// identifiers change. Returns the number of records loaded.
    pub fn reload(&self) -> usize {
        let (list, loaded) = servers::load_server_files(&self.files());
        let count = list.len();
        *self.servers() = list;
        *self.loaded_files() = loaded;
        debug!(count, "server repository reloaded");
        count
    }

    pub fn snapshot(&self) -> Vec<Server> {
        self.servers().clone()
    }

    pub fn len(&self) -> usize {
        self.servers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers().is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<Server> {
        self.servers().iter().find(|s| s.id == id).cloned()
    }

    /// Append a record, assigning an identifier if it has none.
    pub fn add(&self, mut server: Server) -> Uuid {
        if server.id.is_nil() {
            server.id = Uuid::new_v4();
        }
        let id = server.id;
        self.servers().push(server);
        id
    }

    /// Replace the record with the same identifier.
    pub fn update(&self, server: Server) -> Result<()> {
        let mut list = self.servers();
        let slot = list
            .iter_mut()
            .find(|s| s.id == server.id)
            .ok_or_else(|| unknown_record(server.id))?;
        *slot = server;
        Ok(())
    }

    pub fn remove(&self, id: Uuid) -> Result<Server> {
        let mut list = self.servers();
        let pos = position(&list, id)?;
        Ok(list.remove(pos))
    }

    /// Move a record to `index` (clamped to the end of the list). This is
    /// the order records are written back in.
    pub fn move_to(&self, id: Uuid, index: usize) -> Result<()> {
        let mut list = self.servers();
        let pos = position(&list, id)?;
        let server = list.remove(pos);
        let index = index.min(list.len());
        list.insert(index, server);
        Ok(())
    }

    /// Write every record back to its source file. A backing file that no
    /// longer holds any record is rewritten as an empty list.
    pub fn save(&self) -> Result<()> {
        let loaded = self.loaded_files().clone();
        let list = self.servers();
        servers::save_servers_to(&loaded, &list)?;
        info!(count = list.len(), "server repository saved");
        Ok(())
    }

    /// Channel endpoint for background workers.
    pub fn availability_sender(&self) -> Sender<AvailabilityUpdate> {
        self.updates_tx.clone()
    }

    /// Apply every queued availability update. Updates for records that no
    /// longer exist (for example after a reload) are dropped. Returns the
    /// number applied.
    pub fn apply_availability_updates(&self) -> usize {
        let rx = self.updates_rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut list = self.servers();
        let mut applied = 0;
        for update in rx.try_iter() {
            if let Some(server) = list.iter_mut().find(|s| s.id == update.id) {
                server.availability = update.availability;
                applied += 1;
            }
        }
        applied
    }

    /// Run `probe` over a snapshot of every record on at most `workers`
    /// threads, then apply the results. Returns the number applied.
    pub fn probe_availability<F>(&self, workers: usize, probe: F) -> usize
    where
        F: Fn(&Server) -> Availability + Sync,
    {
        let snapshot = self.snapshot();
        let next = AtomicUsize::new(0);
        let workers = workers.clamp(1, snapshot.len().max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = self.availability_sender();
                let (snapshot, next, probe) = (&snapshot, &next, &probe);
                scope.spawn(move || {
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(server) = snapshot.get(i) else {
                            break;
                        };
                        let update = AvailabilityUpdate {
                            id: server.id,
                            availability: probe(server),
                        };
                        if tx.send(update).is_err() {
                            break;
                        }
                    }
                });
            }
        });

        self.apply_availability_updates()
    }
}

fn position(list: &[Server], id: Uuid) -> Result<usize> {
    list.iter()
        .position(|s| s.id == id)
        .ok_or_else(|| unknown_record(id))
}

fn unknown_record(id: Uuid) -> ConanError {
    ConanError::with_kind(
        ErrorCategory::User,
        ErrorKind::UnknownRecord,
        format!("no server with id {}", id),
    )
}
