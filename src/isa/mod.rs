// ISA registry (C3): an immutable table mapping opcode id <-> name and
// id <-> signature. Built once at startup (§9 "global mutable state");
// every other component treats it as `&'static`.

pub mod opcodes;

pub use opcodes::{ArgKind, ArgKindSet, Opcode, OpcodeId};

use std::collections::HashMap;

pub struct Isa {
    by_id: Vec<Opcode>,
    by_name: HashMap<&'static str, OpcodeId>,
}

impl Isa {
    fn build() -> Isa {
        let by_id: Vec<Opcode> = Opcode::ALL.to_vec();
        let mut by_name = HashMap::with_capacity(by_id.len());
        for (i, op) in by_id.iter().enumerate() {
            by_name.insert(op.name(), OpcodeId(i as u16));
        }
        Isa { by_id, by_name }
    }

    pub fn resolve_name(&self, name: &str) -> Option<OpcodeId> {
        self.by_name.get(name.to_ascii_uppercase().as_str()).copied()
    }

    pub fn opcode(&self, id: OpcodeId) -> Option<Opcode> {
        self.by_id.get(id.0 as usize).copied()
    }

    pub fn name(&self, id: OpcodeId) -> Option<&'static str> {
        self.opcode(id).map(Opcode::name)
    }

    pub fn signature(&self, id: OpcodeId) -> Option<&'static [ArgKind]> {
        self.opcode(id).map(Opcode::signature)
    }

    /// `1 + sum(slot_count)`, the total number of cells this instruction
    /// occupies on the grid (opcode cell plus operand cells).
    pub fn instruction_length(&self, id: OpcodeId, dims: usize) -> Option<usize> {
        let op = self.opcode(id)?;
        let operand_cells: usize = op.signature().iter().map(|k| k.cell_count(dims)).sum();
        Some(1 + operand_cells)
    }

    pub fn is_predicate_skip(&self, id: OpcodeId) -> bool {
        self.opcode(id).map(Opcode::is_predicate_skip).unwrap_or(false)
    }
}

lazy_static::lazy_static! {
    pub static ref ISA: Isa = Isa::build();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_bidirectional() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            let id = OpcodeId(i as u16);
            assert_eq!(ISA.resolve_name(op.name()), Some(id));
            assert_eq!(ISA.name(id), Some(op.name()));
        }
    }

    #[test]
    fn signature_respected_in_length() {
        // SETI reg literal => opcode cell + 1 (register) + 1 (literal)
        let id = ISA.resolve_name("SETI").unwrap();
        assert_eq!(ISA.instruction_length(id, 3), Some(3));

        // SETV reg vector(dims) => opcode cell + 1 + dims
        let id = ISA.resolve_name("SETV").unwrap();
        assert_eq!(ISA.instruction_length(id, 3), Some(5));

        // NOP => just the opcode cell
        let id = ISA.resolve_name("NOP").unwrap();
        assert_eq!(ISA.instruction_length(id, 4), Some(1));
    }

    #[test]
    fn predicate_skip_family_is_flagged() {
        for name in ["IFI", "IFR", "IFTI", "GTI", "GTR", "LTI", "LTR"] {
            let id = ISA.resolve_name(name).unwrap();
            assert!(ISA.is_predicate_skip(id), "{} should be predicate-skip", name);
        }
        let id = ISA.resolve_name("NOP").unwrap();
        assert!(!ISA.is_predicate_skip(id));
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        assert_eq!(ISA.resolve_name("FROB"), None);
    }
}
