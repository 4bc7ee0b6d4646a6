//! Configuration for the flitcheck application.
//!
//! Values are layered, later sources overriding earlier ones:
//!
//! 1. built-in defaults (the 4×4×1, 32-bit, 2-VC flat-address testbench)
//! 2. a TOML file: `--config <path>`, else `flitcheck.toml` if present
//! 3. environment variables prefixed `FLITCHECK_`, `__` separating levels
//!    (`FLITCHECK_NOC__X=8`, `FLITCHECK_GENERATE__SEED=3`)
//! 4. command-line flags
//!
//! # Philosophy
//!
//! The tool should work with ZERO arguments. The resolved configuration can
//! be printed so runs are reproducible.

use crate::scenario::Scenario;
use anyhow::{bail, Context};
use clap::Args;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use flitcheck_core::address::AddressingScheme;
use flitcheck_core::generator::FlitExpansion;
use flitcheck_core::layout::NocConfig;
use flitcheck_core::loopback::DeliveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "flitcheck.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "FLITCHECK_";

/// Identifier width used by the payload scenario unless one is configured.
pub const PAYLOAD_ID_WIDTH: u32 = 8;

/// Complete configuration for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Interconnect geometry and flit layout
    pub noc: NocConfig,

    /// Traffic generation
    pub generate: GenerateConfig,

    /// Faults injected by `selftest`
    pub delivery: DeliveryConfig,

    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            noc: NocConfig::default(),
            generate: GenerateConfig::default(),
            delivery: DeliveryConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Traffic generation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateConfig {
    pub scenario: Scenario,

    /// Random seed for determinism
    pub seed: u64,

    /// Header expansion; unset uses the scenario's own
    pub expansion: Option<FlitExpansion>,

    /// Number of batches (`random`)
    pub batches: usize,

    /// Packets per batch (`random`, `all-to-all`)
    pub packets_per_batch: usize,

    /// Longest packet in flits (`random`); the fixed length for `all-to-all`
    pub max_len: u32,

    /// Cycles between batches
    pub interval: u64,

    /// Finish with the drain terminator
    pub drain: bool,

    pub payload: PayloadConfig,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::default(),
            seed: 0,
            expansion: None,
            batches: 10,
            packets_per_batch: 16,
            max_len: 31,
            interval: 100,
            drain: true,
            payload: PayloadConfig::default(),
        }
    }
}

impl GenerateConfig {
    pub fn expansion(&self) -> FlitExpansion {
        self.expansion
            .unwrap_or_else(|| self.scenario.default_expansion())
    }
}

/// Parameters of the `payload` scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PayloadConfig {
    /// Payload file; unset generates a sample
    pub file: Option<PathBuf>,

    /// Size of the generated sample
    pub sample_bytes: usize,

    /// Source node (flat index)
    pub src: u32,

    /// Destination node (flat index)
    pub dst: u32,

    /// Fewest payload flits per packet
    pub min_len: u32,

    /// Most payload flits per packet
    pub max_len: u32,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            file: None,
            sample_bytes: 4096,
            src: 0,
            dst: 1,
            min_len: 1,
            max_len: 30,
        }
    }
}

/// Command-line overrides shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Grid columns
    #[arg(long, global = true)]
    pub x: Option<u32>,

    /// Grid rows
    #[arg(long, global = true)]
    pub y: Option<u32>,

    /// Grid layers
    #[arg(long, global = true)]
    pub z: Option<u32>,

    /// Bits per flit
    #[arg(long, global = true)]
    pub flit_width: Option<u32>,

    /// Bits of the length field
    #[arg(long, global = true)]
    pub length_width: Option<u32>,

    /// Virtual channels per node
    #[arg(long, global = true)]
    pub vcs: Option<u32>,

    /// `flat` or `coordinate`
    #[arg(long, global = true, value_parser = parse_addressing)]
    pub addressing: Option<AddressingScheme>,

    /// Fixed identifier width (leaves a padding field)
    #[arg(long, global = true)]
    pub id_width: Option<u32>,

    /// Random seed for determinism
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Log filter, e.g. `debug`
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

fn parse_addressing(s: &str) -> Result<AddressingScheme, String> {
    match s {
        "flat" => Ok(AddressingScheme::Flat),
        "coordinate" | "coord" => Ok(AddressingScheme::Coordinate),
        other => Err(format!("unknown addressing scheme {other:?} (flat, coordinate)")),
    }
}

impl AppConfig {
    /// Resolve defaults, file and environment.
    ///
    /// An explicit `config_file` must exist; the default file is optional.
    pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        match config_file {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} not found", path.display());
                }
                figment = figment.merge(Toml::file(path));
            }
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        figment.extract().context("invalid configuration")
    }

    /// Apply command-line overrides on top.
    pub fn apply(&mut self, overrides: &Overrides) {
        let noc = &mut self.noc;
        if let Some(x) = overrides.x {
            noc.x = x;
        }
        if let Some(y) = overrides.y {
            noc.y = y;
        }
        if let Some(z) = overrides.z {
            noc.z = z;
        }
        if let Some(w) = overrides.flit_width {
            noc.flit_width = w;
        }
        if let Some(w) = overrides.length_width {
            noc.length_width = w;
        }
        if let Some(vcs) = overrides.vcs {
            noc.virtual_channels = vcs;
        }
        if let Some(scheme) = overrides.addressing {
            noc.addressing = scheme;
        }
        if overrides.id_width.is_some() {
            noc.id_width = overrides.id_width;
        }
        if let Some(seed) = overrides.seed {
            self.generate.seed = seed;
            self.delivery.seed = seed;
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
    }

    /// Give the payload scenario a padding field.
    ///
    /// Flat addressing without a fixed id width leaves no padding bits, so a
    /// payload that does not end on a flit boundary could not be described.
    /// An explicit `id_width` is left alone.
    pub fn fit_layout_to_scenario(&mut self) {
        if self.generate.scenario == Scenario::Payload && self.noc.id_width.is_none() {
            log::info!(
                "payload scenario: switching to coordinate addressing with a {PAYLOAD_ID_WIDTH}-bit id"
            );
            self.noc.addressing = AddressingScheme::Coordinate;
            self.noc.id_width = Some(PAYLOAD_ID_WIDTH);
        }
    }

    /// Print the configuration in human-readable form.
    pub fn print(&self) {
        let noc = &self.noc;
        println!("=== Configuration ===");
        println!("Grid: {}x{}x{} ({} nodes)", noc.x, noc.y, noc.z, noc.num_nodes());
        println!("Flit width: {} bits", noc.flit_width);
        println!("Length field: {} bits", noc.length_width);
        println!("Virtual channels: {}", noc.virtual_channels);
        println!("Addressing: {:?}", noc.addressing);
        match noc.id_width {
            Some(w) => println!("Id width: {w} bits (rest is padding)"),
            None => println!("Id width: remaining bits"),
        }
        println!();
        println!("=== Generation ===");
        println!("Scenario: {:?}", self.generate.scenario);
        println!("Seed: {}", self.generate.seed);
        println!("Expansion: {:?}", self.generate.expansion());
        println!(
            "Batches: {} x {} packets, every {} cycles",
            self.generate.batches, self.generate.packets_per_batch, self.generate.interval
        );
        println!("Max packet length: {}", self.generate.max_len);
        println!("Drain: {}", self.generate.drain);
        println!();
        println!("=== Self-test delivery ===");
        println!("Seed: {}", self.delivery.seed);
        println!("Loss rate: {:.2}%", self.delivery.loss_rate * 100.0);
        println!("Truncate rate: {:.2}%", self.delivery.truncate_rate * 100.0);
        println!("Misroute rate: {:.2}%", self.delivery.misroute_rate * 100.0);
        println!();
    }
}
