//! Kernel descriptors and the code-generator seam.
//!
//! A `conv2d`/`gemm` … `end` block in the input trace parses into a
//! [`KernelDescriptor`]: the symbolic form of one matmul or convolution.
//! Turning a descriptor into concrete bank operations is the job of an
//! external code generator consumed through [`KernelCodegen`].
//!
//! [`TiledMatmulCodegen`] is the built-in stand-in used by the binary
//! and the tests: it reads the problem dimensions from the descriptor
//! body and stripes a read-read-write pattern across the banks. A real
//! deployment swaps in the production code generator behind the same
//! trait.

use thiserror::Error;

use crate::dram::address::{Opcode, Operation};
use crate::dram::organization::DramOrganization;

#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("Kernel descriptor carries no dimensions")]
    MissingDims,
}

/// The kernel families recognized in traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    Gemm,
    Conv2d,
}

impl KernelKind {
    pub fn from_trace_head(head: &str) -> Option<Self> {
        match head {
            "gemm" => Some(KernelKind::Gemm),
            "conv2d" => Some(KernelKind::Conv2d),
            _ => None,
        }
    }
}

/// The parsed symbolic form of one kernel block.
#[derive(Debug, Clone)]
pub struct KernelDescriptor {
    pub kind: KernelKind,

    /// Body lines, tokenized; interpreted by the code generator.
    pub lines: Vec<Vec<String>>,
}

impl KernelDescriptor {
    pub fn new(kind: KernelKind) -> Self {
        Self {
            kind,
            lines: Vec::new(),
        }
    }

    /// Append one tokenized body line.
    pub fn push_line(&mut self, tokens: Vec<String>) {
        self.lines.push(tokens);
    }

    /// All integer tokens in the body, in order.
    pub fn dimensions(&self) -> Vec<usize> {
        self.lines
            .iter()
            .flatten()
            .filter_map(|t| t.parse::<usize>().ok())
            .collect()
    }
}

/// The consumed code-generator interface: descriptor in, ordered
/// operations appended to `out`.
pub trait KernelCodegen {
    fn expand(
        &self,
        descriptor: &KernelDescriptor,
        out: &mut Vec<Operation>,
    ) -> Result<(), CodegenError>;
}

/// Built-in stand-in code generator.
///
/// Interprets the first three integers in the descriptor body as
/// `M K N` (a missing K or N falls back to the previous dimension) and
/// emits, for each of the `M * N` output elements, two reads and one
/// write striped across the banks row-major.
pub struct TiledMatmulCodegen {
    organization: DramOrganization,
}

impl TiledMatmulCodegen {
    pub fn new(organization: DramOrganization) -> Self {
        Self { organization }
    }
}

impl KernelCodegen for TiledMatmulCodegen {
    fn expand(
        &self,
        descriptor: &KernelDescriptor,
        out: &mut Vec<Operation>,
    ) -> Result<(), CodegenError> {
        let dims = descriptor.dimensions();
        let &m = dims.first().ok_or(CodegenError::MissingDims)?;
        let k = dims.get(1).copied().unwrap_or(m);
        let n = dims.get(2).copied().unwrap_or(k);

        let num_banks = self.organization.num_banks();
        let rows = self.organization.level_size("row").unwrap_or(1).max(1) as i64;

        for element in 0..m * n {
            let row = (element / num_banks) as i64 % rows;
            let a_bank = (element * 2) % num_banks;
            let b_bank = (element * 2 + 1) % num_banks;
            let c_bank = element % num_banks;

            out.push(Operation::new(
                Opcode::Read,
                self.organization.compose(a_bank, row, 0),
            ));
            out.push(Operation::new(
                Opcode::Read,
                self.organization.compose(b_bank, row, 0),
            ));
            out.push(Operation::new(
                Opcode::Write,
                self.organization.compose(c_bank, row, 0),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(tokens: &[&str]) -> KernelDescriptor {
        let mut desc = KernelDescriptor::new(KernelKind::Gemm);
        desc.push_line(tokens.iter().map(|t| t.to_string()).collect());
        desc
    }

    #[test]
    fn test_kernel_head_recognition() {
        assert_eq!(KernelKind::from_trace_head("gemm"), Some(KernelKind::Gemm));
        assert_eq!(
            KernelKind::from_trace_head("conv2d"),
            Some(KernelKind::Conv2d)
        );
        assert_eq!(KernelKind::from_trace_head("R"), None);
    }

    #[test]
    fn test_dimension_extraction() {
        let desc = descriptor(&["matmul", "4", "x", "8", "16"]);
        assert_eq!(desc.dimensions(), vec![4, 8, 16]);
    }

    #[test]
    fn test_expand_emits_read_read_write() {
        let org = DramOrganization::standard(1, 1, 2, 2, 64, 64);
        let codegen = TiledMatmulCodegen::new(org);

        let mut out = Vec::new();
        codegen.expand(&descriptor(&["2", "2", "2"]), &mut out).unwrap();

        // 2*2 output elements, three ops each.
        assert_eq!(out.len(), 12);
        assert_eq!(out[0].opcode, Opcode::Read);
        assert_eq!(out[2].opcode, Opcode::Write);
    }

    #[test]
    fn test_expand_without_dims_fails() {
        let org = DramOrganization::standard(1, 1, 2, 2, 64, 64);
        let codegen = TiledMatmulCodegen::new(org);

        let mut out = Vec::new();
        let err = codegen.expand(&descriptor(&["relu"]), &mut out);
        assert!(matches!(err, Err(CodegenError::MissingDims)));
    }

    #[test]
    fn test_expanded_ops_project_to_valid_banks() {
        let org = DramOrganization::standard(1, 1, 2, 2, 64, 64);
        let codegen = TiledMatmulCodegen::new(org.clone());

        let mut out = Vec::new();
        codegen.expand(&descriptor(&["3", "3", "3"]), &mut out).unwrap();

        for op in &out {
            let bank = org.project(&op.addr).unwrap();
            assert!(bank < org.num_banks());
        }
    }
}
