//! kv-bank-sim: Bank-aware KV-cache placement simulator.
//!
//! Drives one simulation run: load the trace, connect the memory
//! back-end, expand kernels, synthesize the interleaved per-token
//! stream, tick until drained, and report conflict statistics.

use clap::Parser;
use tracing::info;

use kv_bank_sim::config::{Cli, Config};
use kv_bank_sim::dram::backend::QueueBackend;
use kv_bank_sim::trace::expander::TraceFrontend;
use kv_bank_sim::trace::kernel::TiledMatmulCodegen;

/// RUST_LOG wins over the verbose flag when both are set.
fn init_logging(verbose: bool) {
    let fallback = match verbose {
        true => "kv_bank_sim=debug",
        false => "kv_bank_sim=info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| fallback.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!(version = env!("CARGO_PKG_VERSION"), "kv-bank-sim starting");

    let mut config = Config::load(&cli.config)?;
    if let Some(trace) = cli.trace {
        config.frontend.path = trace;
    }
    if let Some(policy) = cli.policy {
        config.policy.variant = policy;
    }

    info!(
        trace = %config.frontend.path.display(),
        policy = %config.policy.variant,
        num_tokens = config.frontend.num_tokens,
        kernel_slice = config.frontend.kernel_slice_ops_per_token,
        enable_kv_cache = config.frontend.enable_kv_cache,
        "Configuration loaded"
    );

    let organization = config.dram.organization();
    info!(
        num_banks = organization.num_banks(),
        channels = config.dram.channels,
        bankgroups = config.dram.bankgroups,
        banks_per_bankgroup = config.dram.banks_per_bankgroup,
        "DRAM organization"
    );

    // Build the back-end and the stand-in code generator.
    let backend = QueueBackend::new(organization.clone(), config.dram.queue_capacity);
    let codegen = TiledMatmulCodegen::new(organization);

    // Load, connect, expand, synthesize, run.
    let mut frontend = TraceFrontend::load(config)?;
    frontend.connect(Box::new(backend))?;
    frontend.expand(&codegen)?;
    frontend.synthesize()?;
    frontend.run()?;

    // Report whatever accumulated.
    let report = frontend.finalize();
    info!(
        policy = %report.policy,
        total_allocations = report.total_allocations,
        total_conflicts = report.total_conflicts,
        conflict_rate_percent = report.conflict_rate_percent,
        memory_system_cycles = report.memory_system_cycles,
        "Run complete"
    );

    Ok(())
}
