//! Trace frontend: load, expand, interleave, stream, report.
//!
//! The frontend is the single driver of a simulation run. It parses the
//! high-level trace, expands kernel descriptors through the external
//! code generator, derives the weight map the policies work against,
//! synthesizes the per-token interleaving of KV and kernel traffic, and
//! streams the result into the memory back-end one operation per tick
//! with retry on back-pressure.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dram::address::{AddressVector, Opcode, Operation};
use crate::dram::backend::MemoryBackend;
use crate::policy::{build_policy, KvCachePolicy, PolicyError};
use crate::trace::conflict::BankConflictTracker;
use crate::trace::generator::KvTraceGenerator;
use crate::trace::kernel::{KernelCodegen, KernelDescriptor, KernelKind};
use crate::weights::loader::load_static_weights;
use crate::weights::map::{signature, StaticWeightMap};

/// Safety ceiling on the flat kernel-op buffer.
const MAX_FLAT_KERNEL_OPS: usize = 5_000_000;

/// Synthetic signatures injected per writing bank when the weight map is
/// derived from observed kernel writes.
const LIVE_MAP_SIGNATURES_PER_BANK: u64 = 100;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to read trace {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Trace {path} line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Frontend is not connected to a memory back-end")]
    NotConnected,
}

/// Contention class of a streamed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    /// Kernel traffic over static weights.
    Weight,
    /// KV cache reads and writes.
    Kv,
}

/// One operation in the synthesized stream, tagged for the tracker.
#[derive(Debug, Clone)]
pub struct StreamOp {
    pub op: Operation,
    pub class: OpClass,
}

/// Final statistics of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub policy: String,
    pub total_allocations: u64,
    pub total_conflicts: u64,
    pub conflict_rate_percent: f64,
    pub tracked_conflicts: u64,
    pub weight_blocked_by_kv: u64,
    pub kv_blocked_by_weight: u64,
    pub ops_streamed: u64,
    pub memory_system_cycles: u64,
}

/// The simulation driver.
pub struct TraceFrontend {
    config: Config,
    trace_ops: Vec<Operation>,
    kernels: Vec<KernelDescriptor>,
    flat_kernel_ops: Vec<Operation>,
    static_map: StaticWeightMap,
    backend: Option<Box<dyn MemoryBackend>>,
    policy: Option<Box<dyn KvCachePolicy>>,
    generator: KvTraceGenerator,
    tracker: BankConflictTracker,
    stream: Vec<StreamOp>,
    cursor: usize,
    ticks: u64,
}

impl std::fmt::Debug for TraceFrontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceFrontend")
            .field("config", &self.config)
            .field("trace_ops", &self.trace_ops)
            .field("kernels", &self.kernels)
            .field("flat_kernel_ops", &self.flat_kernel_ops)
            .field("static_map", &self.static_map)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn MemoryBackend>"))
            .field("policy", &self.policy.as_ref().map(|p| p.name()))
            .field("generator", &self.generator)
            .field("tracker", &self.tracker)
            .field("stream", &self.stream)
            .field("cursor", &self.cursor)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl TraceFrontend {
    /// Parse the input trace named by the configuration.
    ///
    /// Recognized line heads: the plain opcodes (`R`, `W`, `C`, `SR`,
    /// `SW`, `BR`, `BW`) with a comma-separated address tuple, and
    /// `conv2d`/`gemm` … `end` kernel blocks whose body lines are
    /// free-form tokens for the code generator. Anything else is a fatal
    /// configuration error.
    pub fn load(config: Config) -> Result<Self, TraceError> {
        let path = config.frontend.path.clone();
        let file = File::open(&path).map_err(|source| TraceError::Io {
            path: path.clone(),
            source,
        })?;

        let mut trace_ops = Vec::new();
        let mut kernels: Vec<KernelDescriptor> = Vec::new();
        let mut open_kernel: Option<KernelDescriptor> = None;

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| TraceError::Io {
                path: path.clone(),
                source,
            })?;
            let line_no = number + 1;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some(&head) = tokens.first() else {
                continue; // blank line
            };

            if let Some(mut descriptor) = open_kernel.take() {
                if head == "end" {
                    trace_ops.push(Operation::kernel(kernels.len()));
                    kernels.push(descriptor);
                } else {
                    descriptor.push_line(tokens.iter().map(|t| t.to_string()).collect());
                    open_kernel = Some(descriptor);
                }
                continue;
            }

            if let Some(kind) = KernelKind::from_trace_head(head) {
                open_kernel = Some(KernelDescriptor::new(kind));
                continue;
            }

            if let Some(opcode) = Opcode::from_trace_head(head) {
                let addr = tokens
                    .get(1)
                    .and_then(|f| AddressVector::parse(f))
                    .ok_or_else(|| TraceError::Malformed {
                        path: path.clone(),
                        line: line_no,
                        reason: format!("opcode {head} without a parsable address tuple"),
                    })?;
                trace_ops.push(Operation::new(opcode, addr));
                continue;
            }

            return Err(TraceError::Malformed {
                path: path.clone(),
                line: line_no,
                reason: format!("unrecognized line head `{head}`"),
            });
        }

        if open_kernel.is_some() {
            return Err(TraceError::Malformed {
                path,
                line: 0,
                reason: "kernel block not closed by `end`".to_string(),
            });
        }

        info!(
            ops = trace_ops.len(),
            kernels = kernels.len(),
            "Loaded trace"
        );

        let generator = KvTraceGenerator::new(config.generator.clone());
        Ok(Self {
            config,
            trace_ops,
            kernels,
            flat_kernel_ops: Vec::new(),
            static_map: StaticWeightMap::new(),
            backend: None,
            policy: None,
            generator,
            tracker: BankConflictTracker::default(),
            stream: Vec::new(),
            cursor: 0,
            ticks: 0,
        })
    }

    /// Attach the memory back-end, load the upstream weight layout, and
    /// initialize the configured policy against the derived bank count.
    pub fn connect(&mut self, backend: Box<dyn MemoryBackend>) -> Result<(), TraceError> {
        let num_banks = backend.organization().num_banks();
        self.tracker = BankConflictTracker::new(num_banks);

        self.static_map = match &self.config.frontend.static_weight_trace_path {
            Some(path) => load_static_weights(path, num_banks),
            None => StaticWeightMap::new(),
        };

        let mut policy = build_policy(&self.config.policy)?;
        policy.init(num_banks, &self.static_map);

        info!(
            num_banks,
            policy = policy.name(),
            weighted_banks = self.static_map.occupied_banks(),
            "Connected to memory back-end"
        );

        self.policy = Some(policy);
        self.backend = Some(backend);
        Ok(())
    }

    /// Expand every kernel descriptor into the flat kernel-op buffer and
    /// settle the weight map the policies will see.
    pub fn expand(&mut self, codegen: &dyn KernelCodegen) -> Result<(), TraceError> {
        for op in &self.trace_ops {
            let Some(index) = op.kernel_index() else {
                continue;
            };
            let descriptor = &self.kernels[index];
            if let Err(e) = codegen.expand(descriptor, &mut self.flat_kernel_ops) {
                warn!(kernel = index, error = %e, "Kernel expansion failed, skipping");
            }
            if self.flat_kernel_ops.len() >= MAX_FLAT_KERNEL_OPS {
                warn!(
                    limit = MAX_FLAT_KERNEL_OPS,
                    "Kernel expansion exceeded the safety ceiling, truncating"
                );
                self.flat_kernel_ops.truncate(MAX_FLAT_KERNEL_OPS);
                break;
            }
        }

        debug!(
            flat_ops = self.flat_kernel_ops.len(),
            "Expanded kernel descriptors"
        );

        self.settle_weight_map()?;
        Ok(())
    }

    /// Derive the live weight map from observed kernel writes and push
    /// the final map into the policy.
    ///
    /// Macro traces only reveal real bank occupancy after code
    /// generation, so an empty file-based map is substituted by the live
    /// one, padded with synthetic signatures so per-bank counts are
    /// meaningfully non-zero.
    fn settle_weight_map(&mut self) -> Result<(), TraceError> {
        let backend = self.backend.as_ref().ok_or(TraceError::NotConnected)?;
        let organization = backend.organization();

        let mut live = StaticWeightMap::new();
        for op in &self.flat_kernel_ops {
            if !op.opcode.is_write() {
                continue;
            }
            let Some(bank) = organization.project(&op.addr) else {
                continue;
            };
            let row = row_of(organization, op);
            let column = column_of(organization, op);
            live.insert(bank, signature(row, column));
        }

        if self.static_map.is_empty() && !live.is_empty() {
            let writing_banks: Vec<_> = live.banks().collect();
            for bank in writing_banks {
                for k in 0..LIVE_MAP_SIGNATURES_PER_BANK {
                    live.insert(bank, (1 << 32) | k);
                }
            }
            info!(
                banks = live.occupied_banks(),
                "No upstream layout; using live weight map from kernel writes"
            );
            self.static_map = live;
        }

        let policy = self.policy.as_mut().ok_or(TraceError::NotConnected)?;
        policy.set_static_weight_map(&self.static_map);
        Ok(())
    }

    /// Build the interleaved per-token stream: each token's KV traffic,
    /// then its kernel slice taken from the flat buffer with wrap-around.
    pub fn synthesize(&mut self) -> Result<(), TraceError> {
        let backend = self.backend.as_ref().ok_or(TraceError::NotConnected)?;
        let organization = backend.organization().clone();

        let num_tokens = self.config.frontend.num_tokens as u64;
        let slice = self.config.frontend.kernel_slice_ops_per_token;

        self.stream.clear();
        self.cursor = 0;

        if num_tokens == 0 {
            // No decoding: the stream is the expanded kernel portion.
            self.stream.extend(self.flat_kernel_ops.iter().map(|op| StreamOp {
                op: op.clone(),
                class: OpClass::Weight,
            }));
            info!(ops = self.stream.len(), "Synthesized kernel-only stream");
            return Ok(());
        }

        for token in 0..num_tokens {
            if self.config.frontend.enable_kv_cache {
                let policy = self.policy.as_mut().ok_or(TraceError::NotConnected)?;
                for op in self.generator.step(policy.as_mut(), &organization, token) {
                    self.stream.push(StreamOp {
                        op,
                        class: OpClass::Kv,
                    });
                }
            }

            if slice > 0 && !self.flat_kernel_ops.is_empty() {
                let len = self.flat_kernel_ops.len();
                let offset = (token as usize * slice) % len;
                for i in 0..slice {
                    self.stream.push(StreamOp {
                        op: self.flat_kernel_ops[(offset + i) % len].clone(),
                        class: OpClass::Weight,
                    });
                }
            }
        }

        info!(
            ops = self.stream.len(),
            tokens = num_tokens,
            slice,
            "Synthesized interleaved stream"
        );
        Ok(())
    }

    /// One frontend tick: advance the memory clock at the configured
    /// ratio, then offer the cursor operation. A refused send is retried
    /// on the next tick.
    pub fn tick(&mut self) -> Result<(), TraceError> {
        let backend = self.backend.as_mut().ok_or(TraceError::NotConnected)?;
        self.ticks += 1;

        let ratio = self.config.frontend.clock_ratio.max(1);
        if self.ticks % ratio == 0 {
            backend.cycle();
        }

        let Some(entry) = self.stream.get(self.cursor) else {
            return Ok(());
        };
        if !backend.send(&entry.op) {
            return Ok(()); // back-pressure
        }

        let organization = backend.organization();
        if let Some(bank) = organization.project(&entry.op.addr) {
            let sig = signature(row_of(organization, &entry.op), column_of(organization, &entry.op));
            match entry.class {
                OpClass::Kv => self.tracker.register_kv_op(bank, sig, self.ticks),
                OpClass::Weight => self.tracker.register_weight_op(bank, sig, self.ticks),
            }
        } else {
            debug!(addr = %entry.op.addr, "Operation without a projectable bank");
        }

        self.cursor += 1;
        Ok(())
    }

    /// Whether the stream is exhausted and the back-end has drained.
    pub fn finished(&self) -> bool {
        self.cursor >= self.stream.len()
            && self.backend.as_ref().is_none_or(|b| b.finished())
    }

    /// Drive ticks until finished.
    pub fn run(&mut self) -> Result<(), TraceError> {
        while !self.finished() {
            self.tick()?;
        }
        Ok(())
    }

    /// Emit the final statistics. Always callable; reports whatever has
    /// accumulated.
    pub fn finalize(&self) -> RunReport {
        let (policy_name, allocations, conflicts, extras) = match &self.policy {
            Some(p) => (
                p.name().to_string(),
                p.stats().total_allocations,
                p.stats().total_conflicts,
                p.extra_counters(),
            ),
            None => ("unconfigured".to_string(), 0, 0, Vec::new()),
        };

        let conflict_rate_percent = if allocations > 0 {
            100.0 * conflicts as f64 / allocations as f64
        } else {
            0.0
        };

        let tracker = self.tracker.stats();
        let cycles = self.backend.as_ref().map_or(0, |b| b.cycles());

        info!(policy = %policy_name, total_allocations = allocations, "Policy allocations");
        info!(total_conflicts = conflicts, conflict_rate_percent, "Policy conflicts");
        info!(
            tracked_conflicts = tracker.total_conflicts,
            weight_blocked_by_kv = tracker.weight_blocked_by_kv,
            kv_blocked_by_weight = tracker.kv_blocked_by_weight,
            "Tracker conflicts"
        );
        info!(memory_system_cycles = cycles, ops_streamed = self.cursor, "Stream");
        for (name, value) in &extras {
            info!(counter = name, value, "Policy counter");
        }

        if let Some(policy) = &self.policy {
            let histogram = self.allocation_histogram(policy.as_ref());
            debug!(?histogram, "KV allocations per bank");
        }

        RunReport {
            policy: policy_name,
            total_allocations: allocations,
            total_conflicts: conflicts,
            conflict_rate_percent,
            tracked_conflicts: tracker.total_conflicts,
            weight_blocked_by_kv: tracker.weight_blocked_by_kv,
            kv_blocked_by_weight: tracker.kv_blocked_by_weight,
            ops_streamed: self.cursor as u64,
            memory_system_cycles: cycles,
        }
    }

    fn allocation_histogram(&self, policy: &dyn KvCachePolicy) -> Vec<u64> {
        let num_banks = self
            .backend
            .as_ref()
            .map_or(0, |b| b.organization().num_banks());
        let mut histogram = vec![0u64; num_banks];
        for token in 0..self.config.frontend.num_tokens as u64 {
            if let Some(bank) = policy.bank_for_token(token) {
                if bank < histogram.len() {
                    histogram[bank] += 1;
                }
            }
        }
        histogram
    }

    // Accessors used by the test suite and the binary.

    pub fn stream(&self) -> &[StreamOp] {
        &self.stream
    }

    pub fn flat_kernel_ops(&self) -> &[Operation] {
        &self.flat_kernel_ops
    }

    pub fn kernels(&self) -> &[KernelDescriptor] {
        &self.kernels
    }

    pub fn trace_ops(&self) -> &[Operation] {
        &self.trace_ops
    }

    pub fn policy(&self) -> Option<&dyn KvCachePolicy> {
        self.policy.as_deref()
    }

    pub fn tracker(&self) -> &BankConflictTracker {
        &self.tracker
    }

    pub fn static_map(&self) -> &StaticWeightMap {
        &self.static_map
    }
}

fn row_of(org: &crate::dram::organization::DramOrganization, op: &Operation) -> i64 {
    org.index_of("row")
        .and_then(|i| op.addr.get(i))
        .unwrap_or(0)
}

fn column_of(org: &crate::dram::organization::DramOrganization, op: &Operation) -> i64 {
    org.index_of("column")
        .and_then(|i| op.addr.get(i))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tempfile::NamedTempFile;

    use crate::dram::backend::QueueBackend;
    use crate::dram::organization::DramOrganization;
    use crate::trace::kernel::TiledMatmulCodegen;

    fn trace_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn config_for(file: &NamedTempFile) -> Config {
        let mut config = Config::default();
        config.frontend.path = file.path().to_path_buf();
        config
    }

    fn org() -> DramOrganization {
        DramOrganization::standard(1, 1, 4, 4, 128, 64)
    }

    #[test]
    fn test_load_plain_ops_and_kernels() {
        let file = trace_file(&[
            "R 0,0,0,0,5,0",
            "gemm",
            "4 4 4",
            "end",
            "W 0,0,1,0,9,0",
        ]);
        let frontend = TraceFrontend::load(config_for(&file)).unwrap();

        assert_eq!(frontend.trace_ops().len(), 3);
        assert_eq!(frontend.kernels().len(), 1);
        assert_eq!(frontend.trace_ops()[1].kernel_index(), Some(0));
    }

    #[test]
    fn test_load_rejects_unknown_head() {
        let file = trace_file(&["R 0,0,0,0,1,0", "XYZ 1,2,3"]);
        let err = TraceFrontend::load(config_for(&file)).unwrap_err();
        assert!(matches!(err, TraceError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_load_rejects_missing_address() {
        let file = trace_file(&["R"]);
        assert!(TraceFrontend::load(config_for(&file)).is_err());
    }

    #[test]
    fn test_load_rejects_unclosed_kernel() {
        let file = trace_file(&["gemm", "4 4 4"]);
        assert!(TraceFrontend::load(config_for(&file)).is_err());
    }

    #[test]
    fn test_missing_trace_is_fatal() {
        let mut config = Config::default();
        config.frontend.path = "/nonexistent/trace.txt".into();
        assert!(matches!(
            TraceFrontend::load(config),
            Err(TraceError::Io { .. })
        ));
    }

    #[test]
    fn test_live_map_fallback_pads_signatures() {
        let file = trace_file(&["gemm", "2 2 2", "end"]);
        let mut config = config_for(&file);
        config.policy.variant = "ContentionAware".to_string();

        let mut frontend = TraceFrontend::load(config).unwrap();
        frontend
            .connect(Box::new(QueueBackend::new(org(), 8)))
            .unwrap();
        frontend
            .expand(&TiledMatmulCodegen::new(org()))
            .unwrap();

        let map = frontend.static_map();
        assert!(!map.is_empty());
        for bank in map.banks() {
            assert!(map.weight_count(bank) > LIVE_MAP_SIGNATURES_PER_BANK as usize);
        }
    }

    #[test]
    fn test_kernel_only_stream_when_no_tokens() {
        let file = trace_file(&["gemm", "2 2 2", "end"]);
        let mut config = config_for(&file);
        config.frontend.num_tokens = 0;

        let mut frontend = TraceFrontend::load(config).unwrap();
        frontend
            .connect(Box::new(QueueBackend::new(org(), 8)))
            .unwrap();
        frontend.expand(&TiledMatmulCodegen::new(org())).unwrap();
        frontend.synthesize().unwrap();

        assert_eq!(frontend.stream().len(), frontend.flat_kernel_ops().len());
        assert!(frontend
            .stream()
            .iter()
            .all(|e| e.class == OpClass::Weight));
    }

    #[test]
    fn test_pure_kv_stream_when_slice_disabled() {
        let file = trace_file(&["gemm", "2 2 2", "end"]);
        let mut config = config_for(&file);
        config.frontend.enable_kv_cache = true;
        config.frontend.num_tokens = 4;
        config.frontend.kernel_slice_ops_per_token = 0;
        config.generator.head_dim = 4;
        config.generator.hidden_dim = 8;
        config.generator.row_bytes = 64;
        config.generator.read_block_bytes = 64;

        let mut frontend = TraceFrontend::load(config).unwrap();
        frontend
            .connect(Box::new(QueueBackend::new(org(), 8)))
            .unwrap();
        frontend.expand(&TiledMatmulCodegen::new(org())).unwrap();
        frontend.synthesize().unwrap();

        assert!(!frontend.stream().is_empty());
        assert!(frontend.stream().iter().all(|e| e.class == OpClass::Kv));
    }

    #[test]
    fn test_kernel_slice_wraps_around() {
        let file = trace_file(&["gemm", "2 2 2", "end"]);
        let mut config = config_for(&file);
        config.frontend.num_tokens = 3;
        config.frontend.kernel_slice_ops_per_token = 5;

        let mut frontend = TraceFrontend::load(config).unwrap();
        frontend
            .connect(Box::new(QueueBackend::new(org(), 8)))
            .unwrap();
        frontend.expand(&TiledMatmulCodegen::new(org())).unwrap();
        frontend.synthesize().unwrap();

        // 2*2 elements * 3 ops = 12 flat ops; slices of 5 wrap.
        let flat_len = frontend.flat_kernel_ops().len();
        assert_eq!(flat_len, 12);
        assert_eq!(frontend.stream().len(), 15);
        let expected_first_of_second_slice =
            frontend.flat_kernel_ops()[5 % flat_len].clone();
        assert_eq!(frontend.stream()[5].op, expected_first_of_second_slice);
    }

    #[test]
    fn test_run_streams_everything_through_backpressure() {
        let file = trace_file(&["gemm", "4 4 4", "end"]);
        let mut config = config_for(&file);
        config.frontend.num_tokens = 2;
        config.frontend.kernel_slice_ops_per_token = 10;

        let mut frontend = TraceFrontend::load(config).unwrap();
        // Tiny queue forces refusals.
        frontend
            .connect(Box::new(QueueBackend::new(org(), 2)))
            .unwrap();
        frontend.expand(&TiledMatmulCodegen::new(org())).unwrap();
        frontend.synthesize().unwrap();

        let total = frontend.stream().len();
        frontend.run().unwrap();

        assert!(frontend.finished());
        let report = frontend.finalize();
        assert_eq!(report.ops_streamed, total as u64);
        assert!(report.memory_system_cycles >= total as u64);
    }
}
