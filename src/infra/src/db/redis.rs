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

use tokio::sync::OnceCell;

use crate::errors::Result;

static REDIS_CONN: OnceCell<redis::aio::MultiplexedConnection> = OnceCell::const_new();

async fn connect() -> Result<redis::aio::MultiplexedConnection> {
    let cfg = config::get_config();
    let client = redis::Client::open(cfg.redis.url.as_str())?;
    Ok(client.get_multiplexed_async_connection().await?)
}

async fn get_conn() -> Result<redis::aio::MultiplexedConnection> {
    let conn = REDIS_CONN.get_or_try_init(connect).await?;
    Ok(conn.clone())
}

pub async fn ping() -> Result<()> {
    let mut conn = get_conn().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
}

/// `SET key value NX PX ttl_ms`. True when the key was absent and is now set.
pub async fn set_nx_px(key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
    let mut conn = get_conn().await?;
    let ret: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(value)
        .arg("NX")
        .arg("PX")
        .arg(ttl_ms)
        .query_async(&mut conn)
        .await?;
    Ok(ret.is_some())
}

/// Deletes the key only while it still holds `value`, so an expired lock
/// re-acquired by another process is left alone.
pub async fn del_if(key: &str, value: &str) -> Result<()> {
    let mut conn = get_conn().await?;
    let current: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
    if current.as_deref() == Some(value) {
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
    }
    Ok(())
}
