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
    fs::File,
    io::{self, BufWriter, Cursor, Read, Write},
};

use flate2::{read::MultiGzDecoder, write::GzEncoder};
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

/// Streaming writer over a staged file. `finish` completes the compression
/// container, after which the staged bytes are valid on disk.
pub trait CompressWriter: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

pub fn extension(name: &str) -> &'static str {
    match name {
        "gzip" => ".gz",
        "zip" => ".zip",
        _ => "",
    }
}

/// Opens a compressed stream over `file`. `entry_name` names the archive
/// entry for container formats.
pub fn writer(name: &str, entry_name: &str, file: File) -> io::Result<Box<dyn CompressWriter>> {
    match name {
        "gzip" => Ok(Box::new(GzipWriter(GzEncoder::new(
            BufWriter::new(file),
            flate2::Compression::default(),
        )))),
        "zip" => {
            let mut w = ZipWriter::new(file);
            w.start_file(entry_name, SimpleFileOptions::default())
                .map_err(io::Error::other)?;
            Ok(Box::new(ZipEntryWriter(w)))
        }
        _ => Ok(Box::new(PlainWriter(BufWriter::new(file)))),
    }
}

pub fn decompress(name: &str, data: &[u8]) -> io::Result<Vec<u8>> {
    match name {
        "gzip" => {
            let mut out = Vec::new();
            MultiGzDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
        "zip" => {
            let mut archive = ZipArchive::new(Cursor::new(data)).map_err(io::Error::other)?;
            if archive.len() == 0 {
                return Ok(Vec::new());
            }
            let mut entry = archive.by_index(0).map_err(io::Error::other)?;
            let mut out = Vec::new();
            entry.read_to_end(&mut out)?;
            Ok(out)
        }
        _ => Ok(data.to_vec()),
    }
}

/// Whole-buffer compress, used when a staged file is rewritten after
/// deduplication.
pub fn compress(name: &str, entry_name: &str, data: &[u8]) -> io::Result<Vec<u8>> {
    match name {
        "gzip" => {
            let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data)?;
            enc.finish()
        }
        "zip" => {
            let mut w = ZipWriter::new(Cursor::new(Vec::new()));
            w.start_file(entry_name, SimpleFileOptions::default())
                .map_err(io::Error::other)?;
            w.write_all(data)?;
            let cursor = w.finish().map_err(io::Error::other)?;
            Ok(cursor.into_inner())
        }
        _ => Ok(data.to_vec()),
    }
}

struct PlainWriter(BufWriter<File>);

impl Write for PlainWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl CompressWriter for PlainWriter {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

struct GzipWriter(GzEncoder<BufWriter<File>>);

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl CompressWriter for GzipWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let mut inner = self.0.finish()?;
        inner.flush()
    }
}

struct ZipEntryWriter(ZipWriter<File>);

impl Write for ZipEntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl CompressWriter for ZipEntryWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.finish().map_err(io::Error::other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_round_trip() {
        let content = b"time,battery\n1,0.5\n";
        for name in ["none", "gzip", "zip"] {
            let packed = compress(name, "20240101_00.csv", content).unwrap();
            assert_eq!(decompress(name, &packed).unwrap(), content);
        }
    }

    #[test]
    fn test_writer_output_matches_buffer_compression() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("staged.csv.gz");
        let mut w = writer("gzip", "staged.csv", File::create(&staged).unwrap()).unwrap();
        w.write_all(b"hello\n").unwrap();
        w.finish().unwrap();

        let packed = std::fs::read(&staged).unwrap();
        assert_eq!(decompress("gzip", &packed).unwrap(), b"hello\n");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("gzip"), ".gz");
        assert_eq!(extension("zip"), ".zip");
        assert_eq!(extension("none"), "");
    }
}
