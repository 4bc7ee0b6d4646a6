//! # flitcheck
//!
//! Generates stimulus for a network-on-chip testbench and checks what the
//! testbench received.
//!
//! ```text
//! flitcheck generate --out run/            # flit_data.txt, inj_time.txt, pkt_len.txt, noc_time.txt
//! <run the hardware simulation>            # run/<node>/recv_data_noc<vc>.txt
//! flitcheck check run/                     # reconcile, exit 1 on findings
//! flitcheck check run/ --timestamped t.txt # loss only, from a timestamped log
//! flitcheck selftest --loss 0.05           # both ends against a simulated interconnect
//! ```

mod config;
mod input_gen;
mod scenario;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::{AppConfig, Overrides};
use flitcheck_core::artifacts::{read_receive_logs, read_timestamped_log, read_trace, write_trace};
use flitcheck_core::flit::FlitCodec;
use flitcheck_core::generator::{FlitExpansion, TrafficGenerator};
use flitcheck_core::loopback::LoopbackInterconnect;
use flitcheck_core::oracle::{Oracle, Reconciliation};
use flitcheck_core::report::{print_findings, print_result, print_summary, RunTimer, Summary};
use flitcheck_core::trace::Trace;
use scenario::Scenario;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Command-line arguments.
#[derive(Parser)]
#[command(version, about = "NoC testbench stimulus generator and delivery checker")]
struct Cli {
    /// Configuration file (default: ./flitcheck.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the resolved configuration before running
    #[arg(long, global = true)]
    print_config: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a trace and write the testbench input files
    Generate {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        #[arg(long, value_enum)]
        scenario: Option<Scenario>,

        /// `header-only` or `replicated`
        #[arg(long, value_parser = parse_expansion)]
        expansion: Option<FlitExpansion>,
    },
    /// Reconcile receive logs against a written trace
    Check {
        /// Directory holding the trace files
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Directory holding `<node>/recv_data_noc<vc>.txt` (default: the trace directory)
        #[arg(long, conflicts_with = "timestamped")]
        logs: Option<PathBuf>,

        /// Write the summary as key=value lines
        #[arg(long)]
        export: Option<PathBuf>,

        /// Reconcile a timestamped receive log instead of the per-node logs
        #[arg(long)]
        timestamped: Option<PathBuf>,
    },
    /// Generate, pass through a simulated interconnect and reconcile
    Selftest {
        #[arg(long, value_enum)]
        scenario: Option<Scenario>,

        /// Probability that a packet is lost
        #[arg(long)]
        loss: Option<f64>,

        /// Probability that a packet loses one flit
        #[arg(long)]
        truncate: Option<f64>,

        /// Probability that a packet goes to the wrong node
        #[arg(long)]
        misroute: Option<f64>,
    },
}

fn parse_expansion(s: &str) -> Result<FlitExpansion, String> {
    match s {
        "header-only" => Ok(FlitExpansion::HeaderOnly),
        "replicated" => Ok(FlitExpansion::Replicated),
        other => Err(format!("unknown expansion {other:?} (header-only, replicated)")),
    }
}

fn setup_logger(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply(&cli.overrides);
    setup_logger(&config.log_level);
    config.fit_layout_to_scenario();

    match cli.command {
        Command::Generate {
            out,
            scenario,
            expansion,
        } => {
            if let Some(scenario) = scenario {
                config.generate.scenario = scenario;
            }
            if expansion.is_some() {
                config.generate.expansion = expansion;
            }
            config.fit_layout_to_scenario();
            if cli.print_config {
                config.print();
            }
            generate(&config, &out)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            dir,
            logs,
            export,
            timestamped,
        } => {
            if cli.print_config {
                config.print();
            }
            let logs = logs.unwrap_or_else(|| dir.clone());
            let received = match &timestamped {
                Some(path) => Received::Timestamped(path),
                None => Received::PerNode(&logs),
            };
            check(&config, &dir, received, export.as_deref())
        }
        Command::Selftest {
            scenario,
            loss,
            truncate,
            misroute,
        } => {
            if let Some(scenario) = scenario {
                config.generate.scenario = scenario;
            }
            let delivery = &mut config.delivery;
            delivery.loss_rate = loss.unwrap_or(delivery.loss_rate);
            delivery.truncate_rate = truncate.unwrap_or(delivery.truncate_rate);
            delivery.misroute_rate = misroute.unwrap_or(delivery.misroute_rate);
            if cli.print_config {
                config.print();
            }
            selftest(&config)
        }
    }
}

fn build_trace(config: &AppConfig) -> anyhow::Result<(FlitCodec, Trace)> {
    let codec = FlitCodec::new(&config.noc).context("invalid NoC configuration")?;
    let params = &config.generate;
    let mut gen = TrafficGenerator::new(codec.clone(), params.expansion(), params.seed);
    scenario::run(params.scenario, &mut gen, params)
        .with_context(|| format!("scenario {:?} failed", params.scenario))?;
    Ok((codec, gen.finalize()))
}

fn generate(config: &AppConfig, out: &Path) -> anyhow::Result<()> {
    let (_, trace) = build_trace(config)?;
    write_trace(out, &trace).with_context(|| format!("writing trace to {}", out.display()))?;
    println!(
        "Wrote {} flits in {} batches ({} markers) to {}",
        trace.flit_data().len(),
        trace.num_batches(),
        trace.markers().len(),
        out.display()
    );
    Ok(())
}

/// What the testbench received.
enum Received<'a> {
    /// `<node>/recv_data_noc<vc>.txt` under a directory
    PerNode(&'a Path),
    /// One log of cycle numbers and flits, with no receiving node
    Timestamped(&'a Path),
}

fn check(
    config: &AppConfig,
    dir: &Path,
    received: Received<'_>,
    export: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    let timer = RunTimer::start();
    let codec = FlitCodec::new(&config.noc).context("invalid NoC configuration")?;
    let oracle = Oracle::new(&codec);

    let trace = read_trace(dir, config.noc.flit_width)
        .with_context(|| format!("reading trace from {}", dir.display()))?;

    let result = match received {
        Received::PerNode(logs_dir) => {
            let logs = read_receive_logs(logs_dir, &config.noc)
                .with_context(|| format!("reading receive logs from {}", logs_dir.display()))?;
            oracle.reconcile(&trace, &logs)?
        }
        Received::Timestamped(path) => {
            let groups = read_timestamped_log(path, &codec)
                .with_context(|| format!("reading timestamped log {}", path.display()))?;
            println!("=== {} ===", path.display());
            for (cycle, flits) in &groups {
                println!("cycle {cycle}: {} flits", flits.len());
                for flit in flits {
                    log::debug!("  {flit}");
                }
            }
            println!();
            log::info!("timestamped log has no receiving node; destinations and counts unchecked");
            oracle.reconcile_stream(&trace, groups.values().flatten())?
        }
    };
    let summary = report(&result, &timer);

    if let Some(path) = export {
        std::fs::write(path, summary.export_text())
            .with_context(|| format!("writing summary to {}", path.display()))?;
        log::info!("summary written to {}", path.display());
    }

    Ok(exit_code(&summary))
}

fn selftest(config: &AppConfig) -> anyhow::Result<ExitCode> {
    if config.generate.scenario == Scenario::Payload {
        bail!("selftest needs header traces; the payload scenario is generate-only");
    }

    let timer = RunTimer::start();
    let (codec, trace) = build_trace(config)?;

    let mut net = LoopbackInterconnect::new(&codec, config.delivery)?;
    net.inject(&trace, config.generate.expansion())?;
    let stats = net.stats();
    let logs = net.into_logs();

    let result = Oracle::new(&codec).reconcile(&trace, &logs)?;
    let summary = report(&result, &timer);

    println!("=== Injected faults ===");
    println!("Packets sent:      {}", stats.packets_sent);
    println!(
        "Dropped:           {} ({:.2}%)",
        stats.packets_dropped,
        stats.loss_rate() * 100.0
    );
    println!("Truncated:         {}", stats.packets_truncated);
    println!(
        "Misrouted:         {} ({} flits)",
        stats.packets_misrouted, stats.flits_misrouted
    );
    println!();

    if summary.lost_packets as u64 != stats.packets_dropped
        || summary.lost_flits as u64 != stats.packets_truncated
        || summary.wrong_destination as u64 != stats.flits_misrouted
    {
        log::warn!("reconciliation disagrees with the injected faults");
    }

    Ok(exit_code(&summary))
}

fn report(result: &Reconciliation, timer: &RunTimer) -> Summary {
    let summary = Summary::from_reconciliation(result);
    print_findings(result);
    print_summary(&summary, timer.elapsed());
    print_result(&summary);
    summary
}

fn exit_code(summary: &Summary) -> ExitCode {
    if summary.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use flitcheck_core::flit::{Flit, Sentinel};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["flitcheck", "--x", "8", "generate", "--scenario", "all-to-all"]);
        assert_eq!(cli.overrides.x, Some(8));
        assert!(matches!(
            cli.command,
            Command::Generate {
                scenario: Some(Scenario::AllToAll),
                expansion: None,
                ..
            }
        ));

        let cli = Cli::parse_from(["flitcheck", "selftest", "--loss", "0.1", "--seed", "4"]);
        assert_eq!(cli.overrides.seed, Some(4));
        assert!(matches!(cli.command, Command::Selftest { loss: Some(l), .. } if l == 0.1));
    }

    #[test]
    fn test_parse_expansion() {
        assert_eq!(parse_expansion("replicated"), Ok(FlitExpansion::Replicated));
        assert!(parse_expansion("both").is_err());
    }

    #[test]
    fn test_generate_then_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.generate.batches = 2;
        config.generate.packets_per_batch = 4;
        generate(&config, dir.path()).unwrap();

        let trace = read_trace(dir.path(), 32).unwrap();
        assert_eq!(trace.num_batches(), 3);
        // no receive logs written
        assert!(check(&config, dir.path(), Received::PerNode(dir.path()), None).is_err());
    }

    #[test]
    fn test_check_timestamped_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.generate.batches = 2;
        config.generate.packets_per_batch = 4;
        generate(&config, dir.path()).unwrap();
        let trace = read_trace(dir.path(), 32).unwrap();

        // cycle 7, then every injected flit except the cycle separator
        let flits: Vec<&Flit> = trace
            .flit_data()
            .iter()
            .filter(|f| f.sentinel_kind() != Some(Sentinel::TimeMarker))
            .collect();
        let write_log = |flits: &[&Flit]| {
            let mut text = format!("{}\n", "0".repeat(29) + "111");
            for flit in flits {
                text.push_str(&format!("{flit}\n"));
            }
            let path = dir.path().join("recv_timestamped.txt");
            std::fs::write(&path, text).unwrap();
            path
        };

        let path = write_log(&flits);
        let code = check(&config, dir.path(), Received::Timestamped(&path), None).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        // every copy of the last header goes missing
        let last = flits[flits.len() - 2].clone();
        assert!(!last.is_sentinel());
        let short: Vec<&Flit> = flits.into_iter().filter(|&f| *f != last).collect();
        let path = write_log(&short);
        let code = check(&config, dir.path(), Received::Timestamped(&path), None).unwrap();
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[test]
    fn test_logs_conflict_with_timestamped() {
        let result = Cli::try_parse_from([
            "flitcheck",
            "check",
            "--logs",
            "a",
            "--timestamped",
            "b.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_selftest_perfect_delivery() {
        let mut config = AppConfig::default();
        config.generate.batches = 3;
        assert_eq!(selftest(&config).unwrap(), ExitCode::SUCCESS);

        config.generate.scenario = Scenario::Payload;
        assert!(selftest(&config).is_err());
    }

    #[test]
    fn test_generate_payload_default_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.generate.scenario = Scenario::Payload;
        config.generate.payload.sample_bytes = 4095;
        assert!(generate(&config, dir.path()).is_err());

        config.fit_layout_to_scenario();
        generate(&config, dir.path()).unwrap();
        let trace = read_trace(dir.path(), 32).unwrap();
        assert_eq!(trace.flit_data().len() - trace.num_batches(), 1024);
    }
}
