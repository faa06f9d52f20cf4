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
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use config::get_config;
use tokio::time;

use crate::service::{cleaner, restructure, restructure::accountant::Accountant};

/// Runs the configured passes: once in batch mode, or on their intervals as
/// a service until ctrl-c.
pub async fn run() -> Result<(), anyhow::Error> {
    let cfg = get_config();
    let tmp_dir = if cfg.common.tmp_dir.is_empty() {
        tempfile::tempdir()?
    } else {
        std::fs::create_dir_all(&cfg.common.tmp_dir)?;
        tempfile::tempdir_in(&cfg.common.tmp_dir)?
    };
    let accountant = Accountant::new(tmp_dir.path()).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("shutdown requested");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    if !cfg.service.enabled {
        if cfg.service.restructure {
            restructure::run_pass(accountant.clone(), tmp_dir.path(), cancel.clone()).await?;
        }
        if cfg.cleaner.enabled {
            cleaner::run_pass(accountant.clone(), cancel.clone()).await?;
        }
        accountant.close().await?;
        return Ok(());
    }

    let mut tasks = tokio::task::JoinSet::new();
    if cfg.service.restructure {
        let accountant = accountant.clone();
        let cancel = cancel.clone();
        let tmp = tmp_dir.path().to_path_buf();
        tasks.spawn(run_restructure_loop(accountant, tmp, cancel));
    }
    if cfg.cleaner.enabled {
        let accountant = accountant.clone();
        let cancel = cancel.clone();
        tasks.spawn(run_cleaner_loop(accountant, cancel));
    }
    while tasks.join_next().await.is_some() {}

    accountant.close().await?;
    Ok(())
}

async fn run_restructure_loop(
    accountant: Arc<Accountant>,
    tmp_dir: PathBuf,
    cancel: Arc<AtomicBool>,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if let Err(e) = restructure::run_pass(accountant.clone(), &tmp_dir, cancel.clone()).await {
            log::error!("[RESTRUCTURE] pass error: {e}");
        }
        sleep_interval(get_config().service.interval, &cancel).await;
    }
}

async fn run_cleaner_loop(accountant: Arc<Accountant>, cancel: Arc<AtomicBool>) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if let Err(e) = cleaner::run_pass(accountant.clone(), cancel.clone()).await {
            log::error!("[CLEANER] pass error: {e}");
        }
        sleep_interval(get_config().cleaner.interval, &cancel).await;
    }
}

// stepped so a shutdown request does not wait out the full interval
async fn sleep_interval(seconds: u64, cancel: &AtomicBool) {
    for _ in 0..seconds {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        time::sleep(Duration::from_secs(1)).await;
    }
}
