//! Runtime configuration for kv-bank-sim.
//!
//! Configuration is loaded from a JSON file or constructed
//! programmatically. All simulation knobs (trace paths, token counts,
//! DRAM geometry, per-policy tuning) live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::dram::organization::DramOrganization;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "kv-bank-sim",
    about = "Bank-aware KV-cache placement simulator for PIM LLM inference"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Override the input trace path from the config file.
    #[arg(short, long)]
    pub trace: Option<PathBuf>,

    /// Override the KV cache policy (Naive, BankPartitioning,
    /// ContentionAware, SmartLocality).
    #[arg(short, long)]
    pub policy: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trace frontend settings.
    pub frontend: FrontendConfig,

    /// DRAM geometry and back-end settings.
    pub dram: DramConfig,

    /// KV trace generator settings.
    pub generator: GeneratorConfig,

    /// Policy selection and tuning.
    pub policy: PolicyConfig,
}

/// Trace frontend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Path to the input trace (required for a run).
    pub path: PathBuf,

    /// Whether to generate KV cache traffic per decoded token.
    pub enable_kv_cache: bool,

    /// Optional path to the upstream static weight layout trace.
    pub static_weight_trace_path: Option<PathBuf>,

    /// Number of tokens to decode.
    pub num_tokens: usize,

    /// Kernel operations interleaved after each token's KV traffic.
    /// 0 disables the slice and produces a pure KV stream.
    pub kernel_slice_ops_per_token: usize,

    /// Frontend ticks per memory cycle.
    pub clock_ratio: u64,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            enable_kv_cache: false,
            static_weight_trace_path: None,
            num_tokens: 512,
            kernel_slice_ops_per_token: 5000,
            clock_ratio: 1,
        }
    }
}

/// DRAM geometry for the built-in back-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DramConfig {
    pub channels: usize,
    pub ranks: usize,
    pub bankgroups: usize,
    pub banks_per_bankgroup: usize,
    pub rows: usize,
    pub columns: usize,

    /// Outstanding-operation capacity of the back-end queue.
    pub queue_capacity: usize,
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            ranks: 1,
            bankgroups: 4,
            banks_per_bankgroup: 4,
            rows: 32768,
            columns: 1024,
            queue_capacity: 32,
        }
    }
}

impl DramConfig {
    /// Build the hierarchy this geometry describes.
    pub fn organization(&self) -> DramOrganization {
        DramOrganization::standard(
            self.channels,
            self.ranks,
            self.bankgroups,
            self.banks_per_bankgroup,
            self.rows,
            self.columns,
        )
    }
}

/// KV trace generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Attention head dimension.
    pub head_dim: usize,

    /// Model hidden dimension.
    pub hidden_dim: usize,

    /// Row granule in bytes: one memory operation per granule.
    pub row_bytes: usize,

    /// Bytes read per prior-token KV entry each decode step.
    pub read_block_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            head_dim: 128,
            hidden_dim: 4096,
            row_bytes: 8192,
            read_block_bytes: 8192,
        }
    }
}

impl GeneratorConfig {
    /// Size of one token's KV entry: K and V matrices in FP32.
    pub fn kv_entry_bytes(&self) -> usize {
        self.head_dim * self.hidden_dim * 2 * std::mem::size_of::<f32>()
    }
}

/// Policy selection and per-variant tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policy variant name: Naive, BankPartitioning, ContentionAware, or
    /// SmartLocality.
    #[serde(rename = "impl")]
    pub variant: String,

    /// BankPartitioning tuning.
    pub partition: PartitionConfig,

    /// ContentionAware tuning.
    pub contention: ContentionConfig,

    /// SmartLocality tuning.
    pub locality: LocalityConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            variant: "Naive".to_string(),
            partition: PartitionConfig::default(),
            contention: ContentionConfig::default(),
            locality: LocalityConfig::default(),
        }
    }
}

/// BankPartitioning reserved-range settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// First bank of the reserved KV range.
    pub kv_cache_banks_start: usize,

    /// Number of reserved banks. `None` defaults to a quarter of the
    /// banks (at least 1).
    pub kv_cache_banks_count: Option<usize>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            kv_cache_banks_start: 0,
            kv_cache_banks_count: None,
        }
    }
}

/// ContentionAware settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentionConfig {
    /// KV allocations a bank may take before the scan passes it over.
    pub max_kv_per_bank: usize,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self { max_kv_per_bank: 3 }
    }
}

/// SmartLocality settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalityConfig {
    /// Strength of the co-locality bonus, in [0, 1].
    pub locality_weight: f64,

    /// KV allocations a bank may take before the candidate set passes it
    /// over.
    pub max_kv_per_bank: usize,

    /// Activity percentage at or below which a bank still counts as cold
    /// when no zero-weight bank is available.
    pub activity_threshold_percent: u32,
}

impl Default for LocalityConfig {
    fn default() -> Self {
        Self {
            locality_weight: 0.3,
            max_kv_per_bank: 3,
            activity_threshold_percent: 10,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. An absent file is not an
    /// error: the run proceeds on defaults. A present but unparsable
    /// file is.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "No config file, running on defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
