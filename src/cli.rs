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

use clap::{Arg, ArgAction};
use config::CliOverrides;

/// Parses the command line into the optional config file path and the flag
/// overrides. Help and version print and exit 0; a usage error exits 1.
pub fn cli() -> (Option<String>, CliOverrides) {
    let app = clap::Command::new("restructure")
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .help("path to a restructure.yml configuration file"),
        )
        .arg(
            Arg::new("service")
                .long("service")
                .action(ArgAction::SetTrue)
                .help("keep running, polling the landing zone on an interval"),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .help("seconds between restructure passes in service mode"),
        )
        .arg(
            Arg::new("cache-size")
                .long("cache-size")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("maximum open output files per worker"),
        )
        .arg(
            Arg::new("num-threads")
                .long("num-threads")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("worker pool size"),
        )
        .arg(
            Arg::new("max-files-per-topic")
                .long("max-files-per-topic")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("source files per topic per pass"),
        )
        .arg(
            Arg::new("tmp-dir")
                .long("tmp-dir")
                .value_name("DIR")
                .help("directory for staged output files"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_parser(["csv", "json"])
                .help("output record format"),
        )
        .arg(
            Arg::new("compression")
                .long("compression")
                .value_parser(["gzip", "zip", "none"])
                .help("output compression"),
        )
        .arg(
            Arg::new("deduplicate")
                .long("deduplicate")
                .action(ArgAction::SetTrue)
                .help("deduplicate output files on close"),
        )
        .arg(
            Arg::new("clean")
                .long("clean")
                .action(ArgAction::SetTrue)
                .help("also run the landing-zone cleaner"),
        )
        .arg(
            Arg::new("no-restructure")
                .long("no-restructure")
                .action(ArgAction::SetTrue)
                .help("skip restructure passes (useful with --clean)"),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .value_name("PREFIX")
                .action(ArgAction::Append)
                .help("input prefix under the source root, repeatable"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .value_name("DIR")
                .help("target directory for local storage"),
        );

    let matches = match app.try_get_matches() {
        Ok(matches) => matches,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let overrides = CliOverrides {
        service: matches.get_flag("service"),
        poll_interval: matches.get_one::<u64>("poll-interval").copied(),
        cache_size: matches.get_one::<usize>("cache-size").copied(),
        num_threads: matches.get_one::<usize>("num-threads").copied(),
        max_files_per_topic: matches.get_one::<usize>("max-files-per-topic").copied(),
        tmp_dir: matches.get_one::<String>("tmp-dir").cloned(),
        format: matches.get_one::<String>("format").cloned(),
        compression: matches.get_one::<String>("compression").cloned(),
        deduplicate: matches.get_flag("deduplicate"),
        clean: matches.get_flag("clean"),
        no_restructure: matches.get_flag("no-restructure"),
        inputs: matches
            .get_many::<String>("input")
            .map(|v| v.cloned().collect())
            .unwrap_or_default(),
        output: matches.get_one::<String>("output").cloned(),
    };
    (matches.get_one::<String>("config").cloned(), overrides)
}
