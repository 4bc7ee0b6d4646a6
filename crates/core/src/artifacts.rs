//! Text artifacts exchanged with the hardware testbench.
//!
//! Every artifact is newline-delimited text, one record per line:
//!
//! ```text
//! <dir>/flit_data.txt                    flits, one per line
//! <dir>/inj_time.txt                     decimal, one per batch
//! <dir>/pkt_len.txt                      decimal, one per batch
//! <dir>/noc_time.txt                     time-marker flits
//! <dir>/<node>/recv_data_noc<vc>.txt     flits seen by node `node` on `vc`
//! ```
//!
//! Readers skip blank lines and trim whitespace. Anything else that does not
//! parse is an error naming the file and line.

use crate::bitio::BitReader;
use crate::error::{Error, Result, TraceError};
use crate::flit::{Flit, FlitCodec, Sentinel};
use crate::layout::NocConfig;
use crate::oracle::ReceiveLog;
use crate::trace::Trace;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const FLIT_DATA_FILE: &str = "flit_data.txt";
pub const INJ_TIME_FILE: &str = "inj_time.txt";
pub const PKT_LEN_FILE: &str = "pkt_len.txt";
pub const MARKER_FILE: &str = "noc_time.txt";

/// Path of the receive log for `node` / `channel` under `dir`.
pub fn receive_log_path(dir: &Path, node: u32, channel: u32) -> PathBuf {
    dir.join(node.to_string())
        .join(format!("recv_data_noc{channel}.txt"))
}

/// Write the trace artifacts into `dir`, creating it if needed.
pub fn write_trace(dir: &Path, trace: &Trace) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_lines(&dir.join(FLIT_DATA_FILE), trace.flit_data())?;
    write_lines(&dir.join(INJ_TIME_FILE), trace.inj_time())?;
    write_lines(&dir.join(PKT_LEN_FILE), trace.batch_len())?;
    write_lines(&dir.join(MARKER_FILE), trace.markers())?;
    log::info!(
        "wrote {} flits in {} batches to {}",
        trace.flit_data().len(),
        trace.num_batches(),
        dir.display()
    );
    Ok(())
}

/// Read the trace artifacts back from `dir`.
///
/// A missing marker file means no markers were emitted.
pub fn read_trace(dir: &Path, flit_width: u32) -> Result<Trace> {
    let flit_data = read_flits(&dir.join(FLIT_DATA_FILE), flit_width)?;
    let inj_time = read_numbers(&dir.join(INJ_TIME_FILE))?;
    let batch_len = read_numbers(&dir.join(PKT_LEN_FILE))?;

    let marker_path = dir.join(MARKER_FILE);
    let markers = if marker_path.exists() {
        read_flits(&marker_path, flit_width)?
    } else {
        Vec::new()
    };

    Trace::from_parts(flit_data, inj_time, batch_len, markers)
}

/// Read every receive log of the configured grid from `dir`.
///
/// # Errors
/// `Error::Io` if any expected file is missing.
pub fn read_receive_logs(dir: &Path, config: &NocConfig) -> Result<Vec<ReceiveLog>> {
    let mut logs = Vec::new();
    for node in 0..config.num_nodes() {
        for channel in 0..config.virtual_channels {
            let path = receive_log_path(dir, node, channel);
            let flits = read_flits(&path, config.flit_width)?;
            log::debug!("{}: {} flits", path.display(), flits.len());
            logs.push(ReceiveLog {
                node,
                channel,
                flits,
            });
        }
    }
    Ok(logs)
}

/// Write one file per (node, channel) of the grid, empty ones included.
///
/// Logs for a (node, channel) that appears more than once are concatenated.
pub fn write_receive_logs(dir: &Path, config: &NocConfig, logs: &[ReceiveLog]) -> Result<()> {
    let mut files: BTreeMap<(u32, u32), Vec<&Flit>> = BTreeMap::new();
    for node in 0..config.num_nodes() {
        for channel in 0..config.virtual_channels {
            files.insert((node, channel), Vec::new());
        }
    }
    for log in logs {
        files
            .entry((log.node, log.channel))
            .or_default()
            .extend(&log.flits);
    }

    for ((node, channel), flits) in files {
        let path = receive_log_path(dir, node, channel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_lines(&path, flits)?;
    }
    Ok(())
}

/// Flits of one timestamped receive log, grouped by cycle.
pub type CycleGroups = BTreeMap<u64, Vec<Flit>>;

/// Parse a timestamped receive log.
///
/// The stream starts with a cycle number. After that an all-zero flit
/// announces that the next flit is a new cycle number; every other flit is
/// data for the current cycle.
pub fn parse_timestamped_log(codec: &FlitCodec, text: &str) -> Result<CycleGroups> {
    let mut groups = CycleGroups::new();
    let mut expect_cycle = true;
    let mut cycle = 0;

    for (line, bits) in text.split_whitespace().enumerate() {
        let flit = codec
            .parse_flit(bits)
            .map_err(|e| artifact_error("<timestamped log>", line + 1, e))?;
        if expect_cycle {
            cycle = BitReader::new(flit.as_str())?.read_bits(codec.flit_width())?;
            groups.entry(cycle).or_default();
            expect_cycle = false;
        } else if flit.sentinel_kind() == Some(Sentinel::TimeMarker) {
            expect_cycle = true;
        } else {
            groups.entry(cycle).or_default().push(flit);
        }
    }
    Ok(groups)
}

/// [`parse_timestamped_log`] on a file.
pub fn read_timestamped_log(path: &Path, codec: &FlitCodec) -> Result<CycleGroups> {
    let text = fs::read_to_string(path)?;
    parse_timestamped_log(codec, &text).map_err(|e| match e {
        Error::Trace(TraceError::Artifact { line, reason, .. }) => {
            TraceError::Artifact {
                path: path.to_path_buf(),
                line,
                reason,
            }
            .into()
        }
        other => other,
    })
}

fn write_lines<I, T>(path: &Path, items: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut text = String::new();
    for item in items {
        text.push_str(&item.to_string());
        text.push('\n');
    }
    fs::write(path, text)?;
    Ok(())
}

fn read_flits(path: &Path, width: u32) -> Result<Vec<Flit>> {
    let text = fs::read_to_string(path)?;
    records(&text)
        .map(|(line, s)| Flit::parse(s, width).map_err(|e| artifact_error(path, line, e)))
        .collect()
}

fn read_numbers<T: FromStr>(path: &Path) -> Result<Vec<T>>
where
    T::Err: std::fmt::Display,
{
    let text = fs::read_to_string(path)?;
    records(&text)
        .map(|(line, s)| {
            s.parse::<T>().map_err(|e| {
                Error::from(TraceError::Artifact {
                    path: path.to_path_buf(),
                    line,
                    reason: format!("{s:?}: {e}"),
                })
            })
        })
        .collect()
}

/// Non-blank, trimmed lines with 1-based line numbers.
fn records(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
}

fn artifact_error(path: impl AsRef<Path>, line: usize, err: Error) -> Error {
    TraceError::Artifact {
        path: path.as_ref().to_path_buf(),
        line,
        reason: err.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flit::PacketDescriptor;
    use crate::generator::{FlitExpansion, TrafficGenerator};

    fn small_trace(codec: &FlitCodec) -> Trace {
        let mut gen = TrafficGenerator::new(codec.clone(), FlitExpansion::HeaderOnly, 1);
        let pkts = gen.hotspot(&[1, 5, 8], 4, 31).unwrap();
        gen.emit_marked_batch(0, &pkts).unwrap();
        let ring = gen.ring(&[5, 6, 10, 9], 31).unwrap();
        gen.emit_marked_batch(200, &ring).unwrap();
        gen.emit_sentinel(Sentinel::Drain).unwrap();
        gen.finalize()
    }

    #[test]
    fn test_trace_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let trace = small_trace(&codec);

        write_trace(dir.path(), &trace).unwrap();
        let back = read_trace(dir.path(), 32).unwrap();
        assert_eq!(back, trace);

        let pkt_len = fs::read_to_string(dir.path().join(PKT_LEN_FILE)).unwrap();
        assert_eq!(pkt_len, "4\n5\n1\n");
    }

    #[test]
    fn test_drain_batch_at_time_zero() {
        // deadlock benches write the drain batch at t=0 after the timed ones
        let dir = tempfile::tempdir().unwrap();
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let a = codec.encode(&PacketDescriptor::new(0, 1, 4, 31)).unwrap();
        let b = codec.encode(&PacketDescriptor::new(1, 5, 4, 31)).unwrap();
        let m0 = Flit::time_marker(0, 32).unwrap();
        let m100 = Flit::time_marker(100, 32).unwrap();
        let drain = Flit::sentinel(Sentinel::Drain, 32);

        write_lines(
            &dir.path().join(FLIT_DATA_FILE),
            [&m0, &a, &m100, &b, &drain],
        )
        .unwrap();
        fs::write(dir.path().join(INJ_TIME_FILE), "0\n100\n0\n").unwrap();
        fs::write(dir.path().join(PKT_LEN_FILE), "2\n2\n1\n").unwrap();
        write_lines(&dir.path().join(MARKER_FILE), [&m0, &m100]).unwrap();

        let trace = read_trace(dir.path(), 32).unwrap();
        assert_eq!(trace.inj_time(), &[0, 100, 0]);
        assert_eq!(trace.markers(), &[m0, m100]);
        assert_eq!(trace.distinct_flits().len(), 5);
    }

    #[test]
    fn test_blank_lines_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let flit = "0".repeat(31) + "1";
        fs::write(dir.path().join(FLIT_DATA_FILE), format!("\n  {flit}  \n\n{flit}\n")).unwrap();
        fs::write(dir.path().join(INJ_TIME_FILE), "7\n\n").unwrap();
        fs::write(dir.path().join(PKT_LEN_FILE), " 2 \n").unwrap();

        let trace = read_trace(dir.path(), 32).unwrap();
        assert_eq!(trace.flit_data().len(), 2);
        assert!(trace.markers().is_empty());
    }

    #[test]
    fn test_bad_line_reports_location() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FLIT_DATA_FILE), "0101\n").unwrap();
        fs::write(dir.path().join(INJ_TIME_FILE), "0\n").unwrap();
        fs::write(dir.path().join(PKT_LEN_FILE), "x\n").unwrap();

        assert!(matches!(
            read_trace(dir.path(), 32),
            Err(Error::Trace(TraceError::Artifact { line: 1, .. }))
        ));
    }

    #[test]
    fn test_receive_logs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = NocConfig::default();
        let codec = FlitCodec::new(&config).unwrap();
        let flit = codec.encode(&PacketDescriptor::new(0, 1, 4, 2)).unwrap();

        let logs = vec![ReceiveLog {
            node: 4,
            channel: 1,
            flits: vec![flit.clone(), flit.clone()],
        }];
        write_receive_logs(dir.path(), &config, &logs).unwrap();

        assert!(receive_log_path(dir.path(), 0, 0).exists());
        assert!(receive_log_path(dir.path(), 15, 1).exists());

        let back = read_receive_logs(dir.path(), &config).unwrap();
        assert_eq!(back.len(), 32);
        let node4 = back.iter().find(|l| l.node == 4 && l.channel == 1).unwrap();
        assert_eq!(node4.flits, vec![flit.clone(), flit]);
        assert_eq!(back.iter().map(|l| l.flits.len()).sum::<usize>(), 2);
    }

    #[test]
    fn test_missing_receive_log_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = NocConfig::flat(2, 1, 1);
        write_receive_logs(dir.path(), &config, &[]).unwrap();
        fs::remove_file(receive_log_path(dir.path(), 1, 0)).unwrap();

        assert!(matches!(
            read_receive_logs(dir.path(), &config),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_timestamped_log() {
        let codec = FlitCodec::new(&NocConfig::default()).unwrap();
        let a = codec.encode(&PacketDescriptor::new(1, 1, 4, 3)).unwrap();
        let b = codec.encode(&PacketDescriptor::new(2, 5, 4, 3)).unwrap();
        let zero = Flit::sentinel(Sentinel::TimeMarker, 32);
        let t = |n| Flit::time_marker(n, 32).unwrap();

        let text = [t(12), a.clone(), a.clone(), zero.clone(), t(40), b.clone()]
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        let groups = parse_timestamped_log(&codec, &text).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&12], vec![a.clone(), a]);
        assert_eq!(groups[&40], vec![b]);
    }
}
