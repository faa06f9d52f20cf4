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

use rand::{distr::Alphanumeric, Rng};

use crate::{db, errors::Result};

pub struct Locker(LockerStore);

enum LockerStore {
    Redis { key: String, token: String },
    Local,
}

/// Tries to take the lock for `name`. `None` means another process holds it
/// and the caller should skip this pass. In local mode there is exactly one
/// process, so the lock degenerates to a no-op that always succeeds.
pub async fn try_lock(name: &str) -> Result<Option<Locker>> {
    let cfg = config::get_config();
    if cfg.common.local_mode {
        return Ok(Some(Locker(LockerStore::Local)));
    }
    let key = format!("{}/{}", cfg.redis.lock_prefix, name);
    let token = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect::<String>();
    if db::redis::set_nx_px(&key, &token, cfg.redis.lock_ttl * 1000).await? {
        Ok(Some(Locker(LockerStore::Redis { key, token })))
    } else {
        Ok(None)
    }
}

pub async fn unlock(locker: &Locker) -> Result<()> {
    match &locker.0 {
        LockerStore::Redis { key, token } => db::redis::del_if(key, token).await,
        LockerStore::Local => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_mode_lock_is_noop() {
        // default config is local mode
        let locker = try_lock("test-topic").await.unwrap();
        assert!(locker.is_some());
        unlock(&locker.unwrap()).await.unwrap();
    }
}
