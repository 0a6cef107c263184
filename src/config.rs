use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::judge::{EvaluationPolicy, TestCase};
use crate::language::{LanguageProfile, default_languages};
use crate::sandbox::ResourceLimits;

#[derive(Parser)]
#[command(name = "sandjudge", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the existing test case database
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of submissions judged concurrently
    #[arg(long = "threads", short = 't', default_value_t = 2)]
    pub threads: u8,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand)]
pub enum CliCommand {
    /// Judge a single source file and print the verdict instead of serving
    Judge {
        /// Problem whose test cases are used
        #[arg(long)]
        problem: u32,

        /// Language identifier, e.g. PYTHON
        #[arg(long)]
        language: String,

        /// Path to the source file
        source: PathBuf,
    },
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> anyhow::Result<Config> {
        load_config(&self.config_path)
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default = "default_languages")]
    pub languages: Vec<LanguageProfile>,
    #[serde(default)]
    pub problems: Vec<ProblemConfig>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Containers managed by a Docker daemon
    #[default]
    Docker,
    /// Plain child processes, no isolation
    Local,
}

#[derive(Deserialize, Debug, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub backend: Backend,
    pub workspace_root: Option<PathBuf>,
    pub mount_point: Option<String>,
}

impl RuntimeConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sandjudge"))
    }

    pub fn mount_point(&self) -> String {
        self.mount_point.clone().unwrap_or_else(|| "/app".to_string())
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct MilliSecond(pub u64);

#[derive(Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct MegaByte(pub u64);

#[derive(Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct KiloByte(pub u64);

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LimitsConfig {
    #[serde(default = "default_time_limit")]
    pub time_limit: MilliSecond,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: MegaByte,
    /// Share of one core, in percent
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: u32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: Option<u32>,
    /// Captured output kept per test case
    #[serde(default = "default_output_limit")]
    pub output_limit: KiloByte,
}

fn default_time_limit() -> MilliSecond {
    MilliSecond(5000)
}

fn default_memory_limit() -> MegaByte {
    MegaByte(256)
}

fn default_cpu_percent() -> u32 {
    50
}

fn default_pids_limit() -> Option<u32> {
    Some(64)
}

fn default_output_limit() -> KiloByte {
    KiloByte(4096)
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            time_limit: default_time_limit(),
            memory_limit: default_memory_limit(),
            cpu_percent: default_cpu_percent(),
            pids_limit: default_pids_limit(),
            output_limit: default_output_limit(),
        }
    }
}

impl TryFrom<&LimitsConfig> for ResourceLimits {
    type Error = anyhow::Error;

    /// Zero means "unlimited" to Docker, so every ceiling must be positive
    fn try_from(config: &LimitsConfig) -> anyhow::Result<Self> {
        if config.time_limit.0 == 0 {
            bail!("time_limit must be positive");
        }
        if config.memory_limit.0 == 0 {
            bail!("memory_limit must be positive");
        }
        if config.output_limit.0 == 0 {
            bail!("output_limit must be positive");
        }
        if config.pids_limit == Some(0) {
            bail!("pids_limit must be positive");
        }
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get() as u32);
        if !(1..=100 * cores).contains(&config.cpu_percent) {
            bail!(
                "cpu_percent must be between 1 and {} on this host, got {}",
                100 * cores,
                config.cpu_percent
            );
        }

        let memory_bytes = config
            .memory_limit
            .0
            .checked_mul(1024 * 1024)
            .filter(|bytes| i64::try_from(*bytes).is_ok())
            .with_context(|| format!("memory_limit of {}MB is too large", config.memory_limit.0))?;
        let output_bytes = config
            .output_limit
            .0
            .checked_mul(1024)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .with_context(|| format!("output_limit of {}KB is too large", config.output_limit.0))?;

        Ok(Self {
            time_limit: Duration::from_millis(config.time_limit.0),
            memory_bytes,
            cpu_percent: config.cpu_percent,
            pids_limit: config.pids_limit,
            output_bytes,
        })
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub policy: EvaluationPolicy,
}

#[derive(Deserialize, Debug)]
pub struct ProblemConfig {
    pub id: u32,
    pub name: String,
    pub cases: Vec<CaseConfig>,
}

#[derive(Deserialize, Debug)]
pub struct CaseConfig {
    pub input: TextSource,
    pub expected_output: TextSource,
    /// Defaults to the position of the case in the list
    pub order_index: Option<i32>,
}

/// Either inline text or a file to read it from
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum TextSource {
    Inline(String),
    File { file: PathBuf },
}

impl TextSource {
    pub fn load(&self) -> anyhow::Result<String> {
        match self {
            Self::Inline(text) => Ok(text.clone()),
            Self::File { file } => std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display())),
        }
    }
}

impl ProblemConfig {
    /// Resolves every case into a test case, reading referenced files
    pub fn load_test_cases(&self) -> anyhow::Result<Vec<TestCase>> {
        self.cases
            .iter()
            .enumerate()
            .map(|(position, case)| {
                Ok(TestCase {
                    input: case.input.load()?,
                    expected_output: case.expected_output.load()?,
                    order_index: case.order_index.unwrap_or(position as i32),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("Failed to load test cases of problem {}", self.id))
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let file = std::fs::File::open(path.as_ref())
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;
    let reader = std::io::BufReader::new(file);
    let config: Config = serde_json::from_reader(reader)?;
    ResourceLimits::try_from(&config.limits).context("Invalid limits")?;
    Ok(config)
}
