// Molecule codec: pack/unpack a (type, value) pair into one machine word.
//
// Bit layout (stable, documented per §3/§4.1 and §6 "bit-exact items"):
//
//   word: i32
//   bits 31..30  -- type tag
//   bits 29..0   -- signed value, sign-extended from a 30-bit two's
//                   complement field
//
// `pack(0, 0)` is the canonical empty cell: type CODE, value 0.

use std::fmt;

const VALUE_BITS: u32 = 30;
const VALUE_MASK: i32 = (1 << VALUE_BITS) - 1;
const SIGN_BIT: i32 = 1 << (VALUE_BITS - 1);
const TYPE_SHIFT: u32 = VALUE_BITS;

/// The four recognized molecule types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MoleculeType {
    Code = 0,
    Data = 1,
    Energy = 2,
    Structure = 3,
}

impl MoleculeType {
    fn from_tag(tag: u8) -> MoleculeType {
        match tag & 0b11 {
            0 => MoleculeType::Code,
            1 => MoleculeType::Data,
            2 => MoleculeType::Energy,
            3 => MoleculeType::Structure,
            _ => unreachable!("tag is masked to 2 bits"),
        }
    }
}

impl fmt::Display for MoleculeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoleculeType::Code => "CODE",
            MoleculeType::Data => "DATA",
            MoleculeType::Energy => "ENERGY",
            MoleculeType::Structure => "STRUCTURE",
        };
        write!(f, "{}", name)
    }
}

/// One word of world storage: a type tag plus a signed value.
pub type Word = i32;

/// Range of values representable in the 30-bit signed value field.
pub const MIN_VALUE: i32 = -(1 << (VALUE_BITS - 1));
pub const MAX_VALUE: i32 = (1 << (VALUE_BITS - 1)) - 1;

/// Pack a (type, value) pair into one word. `value` is clamped into the
/// representable range by truncation of its low 30 bits (callers that
/// need overflow detection should check against `MIN_VALUE`/`MAX_VALUE`
/// themselves).
pub fn pack(ty: MoleculeType, value: i32) -> Word {
    let tag = (ty as i32) << TYPE_SHIFT;
    let field = value & VALUE_MASK;
    tag | field
}

/// Unpack a word into its (type, value) pair, sign-extending the value.
pub fn unpack(word: Word) -> (MoleculeType, i32) {
    (type_of(word), value_of(word))
}

/// Extract just the type tag.
pub fn type_of(word: Word) -> MoleculeType {
    let tag = ((word >> TYPE_SHIFT) & 0b11) as u8;
    MoleculeType::from_tag(tag)
}

/// Extract just the signed value, sign-extended.
pub fn value_of(word: Word) -> i32 {
    let field = word & VALUE_MASK;
    if field & SIGN_BIT != 0 {
        field - (1 << VALUE_BITS)
    } else {
        field
    }
}

/// The canonical empty cell: `type=CODE, value=0`.
pub fn is_empty(word: Word) -> bool {
    word == 0
}

/// Construct the canonical empty cell.
pub fn empty() -> Word {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_every_type() {
        for ty in [
            MoleculeType::Code,
            MoleculeType::Data,
            MoleculeType::Energy,
            MoleculeType::Structure,
        ] {
            for value in [MIN_VALUE, -1, 0, 1, 42, MAX_VALUE] {
                let w = pack(ty, value);
                assert_eq!(unpack(w), (ty, value), "type={:?} value={}", ty, value);
            }
        }
    }

    #[test]
    fn empty_cell_is_canonical() {
        assert_eq!(pack(MoleculeType::Code, 0), 0);
        assert!(is_empty(empty()));
        assert!(is_empty(pack(MoleculeType::Code, 0)));
        assert!(!is_empty(pack(MoleculeType::Data, 0)));
    }

    #[test]
    fn negative_values_survive() {
        let w = pack(MoleculeType::Energy, -100);
        assert_eq!(value_of(w), -100);
        assert_eq!(type_of(w), MoleculeType::Energy);
    }
}
