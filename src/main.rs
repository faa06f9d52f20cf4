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

use restructure::{cli, job};

#[tokio::main]
async fn main() {
    let (config_file, overrides) = cli::cli();
    if let Err(e) = config::bootstrap(config_file.as_deref(), &overrides) {
        eprintln!("config error: {e}");
        std::process::exit(1);
    }
    let cfg = config::get_config();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&cfg.log.level));
    config::metrics::init();

    if let Err(e) = infra::init().await {
        log::error!("init error: {e}");
        std::process::exit(2);
    }
    if let Err(e) = job::run().await {
        log::error!("runtime error: {e}");
        std::process::exit(2);
    }
}
