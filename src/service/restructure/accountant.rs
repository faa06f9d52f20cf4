// Copyright 2024 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use bytes::Bytes;
use config::{
    meta::{
        offsets::{OffsetRange, OffsetRangeSet},
        topic::{read_bins_csv, write_bins_csv, Bins, Ledger},
    },
    utils::file::put_file_contents,
};
use infra::storage;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

pub const OFFSETS_FILE: &str = "offsets.csv";
pub const BINS_FILE: &str = "bins.csv";

/// Durable accounting of processed offset ranges and hourly bins, shared by
/// every worker. Mutations merge in memory under a mutex; persistence runs on
/// a single writer task fed by a bounded command queue, publishing each CSV
/// atomically through the target store.
pub struct Accountant {
    state: Arc<State>,
    tx: mpsc::Sender<Cmd>,
}

struct State {
    offsets: Mutex<OffsetRangeSet>,
    bins: Mutex<Bins>,
    scratch: PathBuf,
}

enum Cmd {
    TriggerWrite,
    Flush(oneshot::Sender<Result<(), String>>),
    Close(oneshot::Sender<Result<(), String>>),
}

impl Accountant {
    /// Loads persisted state and starts the durable writer. Malformed state
    /// files are fatal: without reliable offsets nothing can safely run.
    pub async fn new(scratch: &Path) -> Result<Arc<Self>, anyhow::Error> {
        let offsets = match storage::get_opt(storage::target(), OFFSETS_FILE).await? {
            Some(data) => {
                OffsetRangeSet::read_csv(data.as_ref()).context("malformed offsets.csv")?
            }
            None => OffsetRangeSet::new(),
        };
        let bins = match storage::get_opt(storage::target(), BINS_FILE).await? {
            Some(data) => read_bins_csv(data.as_ref()).context("malformed bins.csv")?,
            None => Bins::new(),
        };
        let state = Arc::new(State {
            offsets: Mutex::new(offsets),
            bins: Mutex::new(bins),
            scratch: scratch.to_path_buf(),
        });
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_writer(state.clone(), rx));
        Ok(Arc::new(Self { state, tx }))
    }

    pub fn contains(&self, range: &OffsetRange) -> bool {
        self.state.offsets.lock().contains(range)
    }

    pub fn offsets_snapshot(&self) -> OffsetRangeSet {
        self.state.offsets.lock().clone()
    }

    /// Merges a committed ledger and queues a durable write. The queue
    /// coalesces: a full queue already carries a pending write.
    pub async fn process(&self, ledger: Ledger) -> Result<(), anyhow::Error> {
        if ledger.is_empty() {
            return Ok(());
        }
        self.state.offsets.lock().merge(&ledger.offsets);
        {
            let mut bins = self.state.bins.lock();
            for (key, count) in ledger.bins {
                *bins.entry(key).or_insert(0) += count;
            }
        }
        match self.tx.try_send(Cmd::TriggerWrite) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("accountant writer stopped")
            }
        }
    }

    /// Blocks until the latest in-memory state is durable.
    pub async fn flush(&self) -> Result<(), anyhow::Error> {
        let (ack, ret) = oneshot::channel();
        self.tx
            .send(Cmd::Flush(ack))
            .await
            .map_err(|_| anyhow::anyhow!("accountant writer stopped"))?;
        ret.await
            .context("accountant writer stopped")?
            .map_err(|e| anyhow::anyhow!(e))
    }

    /// Flushes and stops the durable writer.
    pub async fn close(&self) -> Result<(), anyhow::Error> {
        let (ack, ret) = oneshot::channel();
        self.tx
            .send(Cmd::Close(ack))
            .await
            .map_err(|_| anyhow::anyhow!("accountant writer stopped"))?;
        ret.await
            .context("accountant writer stopped")?
            .map_err(|e| anyhow::anyhow!(e))
    }
}

async fn run_writer(state: Arc<State>, mut rx: mpsc::Receiver<Cmd>) {
    while let Some(cmd) = rx.recv().await {
        let mut acks = Vec::new();
        let mut closing = false;
        let mut pending = Some(cmd);
        // drain queued commands into one write
        while let Some(cmd) = pending.take() {
            match cmd {
                Cmd::TriggerWrite => {}
                Cmd::Flush(ack) => acks.push(ack),
                Cmd::Close(ack) => {
                    acks.push(ack);
                    closing = true;
                }
            }
            pending = rx.try_recv().ok();
        }
        let ret = persist(&state).await.map_err(|e| e.to_string());
        if let Err(e) = &ret {
            log::error!("[ACCOUNTANT] durable write error: {e}");
        }
        for ack in acks {
            let _ = ack.send(ret.clone());
        }
        if closing {
            break;
        }
    }
}

/// Renders both CSVs into the run scratch dir, then stores them atomically.
/// A crash mid-store leaves either the previous or the new authoritative
/// file, never a truncated one.
async fn persist(state: &State) -> Result<(), anyhow::Error> {
    let offsets = state.offsets.lock().clone();
    let bins = state.bins.lock().clone();

    let mut buf = Vec::new();
    offsets.write_csv(&mut buf)?;
    put_file_contents(state.scratch.join(OFFSETS_FILE), &buf)?;
    storage::put(storage::target(), OFFSETS_FILE, Bytes::from(buf)).await?;

    let mut buf = Vec::new();
    write_bins_csv(&bins, &mut buf)?;
    put_file_contents(state.scratch.join(BINS_FILE), &buf)?;
    storage::put(storage::target(), BINS_FILE, Bytes::from(buf)).await?;
    Ok(())
}
