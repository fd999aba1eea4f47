//! Memory operations and hierarchical addresses.
//!
//! An address is an ordered tuple of coordinates, one per DRAM hierarchy
//! level (channel, rank, bankgroup, bank, row, column). Coordinates that
//! have not been bound yet are `-1`.

use serde::{Deserialize, Serialize};

/// A flat bank index in `[0, num_banks)`.
pub type BankId = usize;

/// Coordinate value marking an unset hierarchy level.
pub const UNSET: i64 = -1;

/// Memory operation kinds recognized in traces and issued to the back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Read,
    Write,
    Compute,
    SubarrayRead,
    SubarrayWrite,
    BankRead,
    BankWrite,
    /// Synthetic placeholder for an unexpanded kernel; its single address
    /// slot carries the kernel index.
    Kernel,
}

impl Opcode {
    /// Map a trace line head to an opcode. Kernel blocks (`conv2d`,
    /// `gemm`, `end`) are framed by the trace parser, not here.
    pub fn from_trace_head(head: &str) -> Option<Self> {
        match head {
            "R" => Some(Opcode::Read),
            "W" => Some(Opcode::Write),
            "C" => Some(Opcode::Compute),
            "SR" => Some(Opcode::SubarrayRead),
            "SW" => Some(Opcode::SubarrayWrite),
            "BR" => Some(Opcode::BankRead),
            "BW" => Some(Opcode::BankWrite),
            _ => None,
        }
    }

    /// Whether this opcode deposits data into a bank.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Opcode::Write | Opcode::SubarrayWrite | Opcode::BankWrite
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Opcode::Read => "read",
            Opcode::Write => "write",
            Opcode::Compute => "compute",
            Opcode::SubarrayRead => "subarray-read",
            Opcode::SubarrayWrite => "subarray-write",
            Opcode::BankRead => "bank-read",
            Opcode::BankWrite => "bank-write",
            Opcode::Kernel => "kernel",
        };
        write!(f, "{s}")
    }
}

/// An ordered tuple of hierarchy coordinates.
///
/// The tuple length and level ordering are defined by the
/// [`DramOrganization`](crate::dram::organization::DramOrganization) in
/// use; this type is just the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressVector(pub Vec<i64>);

impl AddressVector {
    /// An all-unset vector of the given length.
    pub fn unset(len: usize) -> Self {
        Self(vec![UNSET; len])
    }

    /// Parse a comma-separated integer tuple (`0,1,2,0,512`).
    pub fn parse(field: &str) -> Option<Self> {
        let coords: Result<Vec<i64>, _> =
            field.split(',').map(|c| c.trim().parse::<i64>()).collect();
        coords.ok().filter(|c| !c.is_empty()).map(Self)
    }

    /// Coordinate at a level index, if present and bound.
    pub fn get(&self, level: usize) -> Option<i64> {
        self.0.get(level).copied().filter(|&c| c != UNSET)
    }

    /// Bind the coordinate at a level index. Out-of-range levels are
    /// ignored rather than grown.
    pub fn set(&mut self, level: usize, value: i64) {
        if let Some(slot) = self.0.get_mut(level) {
            *slot = value;
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for AddressVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// A single memory operation as delivered to the back-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub opcode: Opcode,
    pub addr: AddressVector,
}

impl Operation {
    pub fn new(opcode: Opcode, addr: AddressVector) -> Self {
        Self { opcode, addr }
    }

    /// The synthetic kernel placeholder op for kernel block `index`.
    pub fn kernel(index: usize) -> Self {
        Self {
            opcode: Opcode::Kernel,
            addr: AddressVector(vec![index as i64]),
        }
    }

    /// Kernel index carried by a [`Opcode::Kernel`] op.
    pub fn kernel_index(&self) -> Option<usize> {
        if self.opcode == Opcode::Kernel {
            self.addr.get(0).map(|i| i as usize)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_head_mapping() {
        assert_eq!(Opcode::from_trace_head("R"), Some(Opcode::Read));
        assert_eq!(Opcode::from_trace_head("SW"), Some(Opcode::SubarrayWrite));
        assert_eq!(Opcode::from_trace_head("gemm"), None);
    }

    #[test]
    fn test_parse_address_tuple() {
        let addr = AddressVector::parse("0,1,2,3").unwrap();
        assert_eq!(addr.len(), 4);
        assert_eq!(addr.get(2), Some(2));

        assert!(AddressVector::parse("0,x,2").is_none());
        assert!(AddressVector::parse("").is_none());
    }

    #[test]
    fn test_unset_coordinates() {
        let mut addr = AddressVector::unset(6);
        assert_eq!(addr.get(0), None);
        addr.set(0, 3);
        assert_eq!(addr.get(0), Some(3));
        // Out-of-range set is a no-op.
        addr.set(10, 1);
        assert_eq!(addr.len(), 6);
    }

    #[test]
    fn test_kernel_op_roundtrip() {
        let op = Operation::kernel(7);
        assert_eq!(op.kernel_index(), Some(7));

        let read = Operation::new(Opcode::Read, AddressVector::unset(6));
        assert_eq!(read.kernel_index(), None);
    }
}
