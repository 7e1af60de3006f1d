//! The line-delimited episode log format.
//!
//! An episode log is a stream of packet JSON objects, one per line, all
//! sharing a correlation id. Line order is admission order and is
//! significant; readers process lines in order.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::packet::{Packet, PacketDecodeError};

/// Errors raised reading or writing episode logs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LogError {
    /// Filesystem failure.
    #[error("log io error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A line failed to decode as a packet.
    #[error("line {line} is not a valid packet: {source}")]
    BadLine {
        /// 1-based line number.
        line: usize,
        /// The decode error.
        #[source]
        source: PacketDecodeError,
    },
}

/// Reads every packet from an episode log, in line order.
///
/// # Errors
///
/// Returns `LogError` on io failure or the first undecodable line.
pub fn read_packets(path: &Path) -> Result<Vec<Packet>, LogError> {
    let file = std::fs::File::open(path).map_err(|source| LogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = std::io::BufReader::new(file);

    let mut packets = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let packet = Packet::from_json_str(&line).map_err(|source| LogError::BadLine {
            line: index + 1,
            source,
        })?;
        packets.push(packet);
    }
    Ok(packets)
}

/// Writes packets to an episode log, one JSON object per line, in order.
///
/// # Errors
///
/// Returns `LogError::Io` on filesystem failure.
pub fn write_packets(path: &Path, packets: &[Packet]) -> Result<(), LogError> {
    let io_error = |source| LogError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(path).map_err(io_error)?;
    let mut writer = std::io::BufWriter::new(file);
    for packet in packets {
        let json = packet
            .to_json_string()
            .map_err(|e| io_error(std::io::Error::other(e)))?;
        writeln!(writer, "{json}").map_err(io_error)?;
    }
    writer.flush().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use crate::testing;

    use super::*;

    #[test]
    fn test_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.jsonl");
        let packets = vec![
            testing::observation("corr_log", testing::t0()),
            testing::belief_update("corr_log", testing::at(1)),
        ];

        write_packets(&path, &packets).unwrap();
        let read = read_packets(&path).unwrap();
        assert_eq!(read, packets);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.jsonl");
        let packet = testing::observation("corr_log", testing::t0());
        let json = packet.to_json_string().unwrap();
        std::fs::write(&path, format!("{json}\n\n{json2}\n", json2 = {
            testing::belief_update("corr_log", testing::at(1))
                .to_json_string()
                .unwrap()
        }))
        .unwrap();

        assert_eq!(read_packets(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_bad_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episode.jsonl");
        let good = testing::observation("corr_log", testing::t0())
            .to_json_string()
            .unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n")).unwrap();

        let result = read_packets(&path);
        assert!(matches!(result, Err(LogError::BadLine { line: 2, .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = read_packets(Path::new("/nonexistent/episode.jsonl"));
        assert!(matches!(result, Err(LogError::Io { .. })));
    }
}
