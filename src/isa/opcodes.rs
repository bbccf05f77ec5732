// The recognized opcode families (§4.3). Names are an implementation
// choice; these are the ones emitted into `labelAddressToName`-adjacent
// artifact tables and recognized by the assembler's mnemonic table.

use enumflags2::BitFlags;

/// Where an operand's cells come from and how many it occupies.
///
/// `REGISTER`/`LITERAL` occupy one cell; `VECTOR`/`LABEL` occupy `dims`
/// cells, one per world dimension (§4.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, enumflags2::BitFlags)]
#[repr(u8)]
pub enum ArgKind {
    Register = 0b0001,
    Literal = 0b0010,
    Vector = 0b0100,
    Label = 0b1000,
}

impl ArgKind {
    /// Number of cells this argument occupies, given the world's
    /// dimensionality.
    pub fn cell_count(self, dims: usize) -> usize {
        match self {
            ArgKind::Register | ArgKind::Literal => 1,
            ArgKind::Vector | ArgKind::Label => dims,
        }
    }
}

pub type ArgKindSet = BitFlags<ArgKind>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpcodeId(pub u16);

/// Every recognized opcode, grouped by family as in §4.3.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    // -- arithmetic/logic on data registers --
    AddR,
    SubR,
    MulR,
    DivR,
    ModR,
    AndR,
    OrR,
    XorR,
    NotR,
    NegR,
    AddI,
    SubI,
    MulI,
    DivI,
    ModI,
    AndI,
    OrI,
    XorI,

    // -- set/move family --
    Seti,
    Setv,
    Setr,
    Movr,

    // -- compare/test family (conditional "skip next") --
    Ifi,
    Ifr,
    Ifti,
    Gti,
    Gtr,
    Lti,
    Ltr,

    // -- control flow --
    Jmpi,
    Jmpr,
    Call,
    Ret,

    // -- world I/O --
    Scan,
    Peek,
    Poke,
    Seek,
    Sync,
    Nrg,
    Nop,

    // -- stack --
    Push,
    Pop,

    // -- replication / lifecycle --
    Repl,
    Die,

    /// Stack-driven POKE: target coordinate comes off the location
    /// stack rather than a literal operand. Modeled as producing
    /// `Intent::WorldWriteUnresolved` by policy (§4.4 step 3's example
    /// of a target that "cannot be determined until execution"); see
    /// `DESIGN.md`.
    PokeStack,
}

impl Opcode {
    /// All opcodes, in the fixed order that assigns their numeric id.
    /// This order is part of the artifact's bit-exact contract (§6) and
    /// must never be reordered after release; new opcodes are appended.
    pub const ALL: &'static [Opcode] = &[
        Opcode::AddR,
        Opcode::SubR,
        Opcode::MulR,
        Opcode::DivR,
        Opcode::ModR,
        Opcode::AndR,
        Opcode::OrR,
        Opcode::XorR,
        Opcode::NotR,
        Opcode::NegR,
        Opcode::AddI,
        Opcode::SubI,
        Opcode::MulI,
        Opcode::DivI,
        Opcode::ModI,
        Opcode::AndI,
        Opcode::OrI,
        Opcode::XorI,
        Opcode::Seti,
        Opcode::Setv,
        Opcode::Setr,
        Opcode::Movr,
        Opcode::Ifi,
        Opcode::Ifr,
        Opcode::Ifti,
        Opcode::Gti,
        Opcode::Gtr,
        Opcode::Lti,
        Opcode::Ltr,
        Opcode::Jmpi,
        Opcode::Jmpr,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Scan,
        Opcode::Peek,
        Opcode::Poke,
        Opcode::Seek,
        Opcode::Sync,
        Opcode::Nrg,
        Opcode::Nop,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Repl,
        Opcode::Die,
        Opcode::PokeStack,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Opcode::AddR => "ADDR",
            Opcode::SubR => "SUBR",
            Opcode::MulR => "MULR",
            Opcode::DivR => "DIVR",
            Opcode::ModR => "MODR",
            Opcode::AndR => "ANDR",
            Opcode::OrR => "ORR",
            Opcode::XorR => "XORR",
            Opcode::NotR => "NOTR",
            Opcode::NegR => "NEGR",
            Opcode::AddI => "ADDI",
            Opcode::SubI => "SUBI",
            Opcode::MulI => "MULI",
            Opcode::DivI => "DIVI",
            Opcode::ModI => "MODI",
            Opcode::AndI => "ANDI",
            Opcode::OrI => "ORI",
            Opcode::XorI => "XORI",
            Opcode::Seti => "SETI",
            Opcode::Setv => "SETV",
            Opcode::Setr => "SETR",
            Opcode::Movr => "MOV",
            Opcode::Ifi => "IFI",
            Opcode::Ifr => "IFR",
            Opcode::Ifti => "IFTI",
            Opcode::Gti => "GTI",
            Opcode::Gtr => "GTR",
            Opcode::Lti => "LTI",
            Opcode::Ltr => "LTR",
            Opcode::Jmpi => "JMPI",
            Opcode::Jmpr => "JMPR",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Scan => "SCAN",
            Opcode::Peek => "PEEK",
            Opcode::Poke => "POKE",
            Opcode::Seek => "SEEK",
            Opcode::Sync => "SYNC",
            Opcode::Nrg => "NRG",
            Opcode::Nop => "NOP",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Repl => "REPL",
            Opcode::Die => "DIE",
            Opcode::PokeStack => "POKES",
        }
    }

    /// True for the compare/test family that produces a conditional
    /// "skip next instruction" effect (§4.3, §4.4 step 4).
    pub fn is_predicate_skip(self) -> bool {
        matches!(
            self,
            Opcode::Ifi
                | Opcode::Ifr
                | Opcode::Ifti
                | Opcode::Gti
                | Opcode::Gtr
                | Opcode::Lti
                | Opcode::Ltr
        )
    }

    /// Argument signature: one `ArgKind` per operand slot, in order.
    /// `CALL`'s REF/VAL operand list is variable-length and is therefore
    /// not modeled here; the assembler emits it as a sequence of
    /// `Register` slots sized by `callSiteBindings` (§4.7).
    pub fn signature(self) -> &'static [ArgKind] {
        use ArgKind::*;
        match self {
            Opcode::AddR | Opcode::SubR | Opcode::MulR | Opcode::DivR | Opcode::ModR
            | Opcode::AndR | Opcode::OrR | Opcode::XorR | Opcode::Setr | Opcode::Movr
            | Opcode::Ifr | Opcode::Gtr | Opcode::Ltr => &[Register, Register],

            Opcode::NotR | Opcode::NegR | Opcode::Nrg | Opcode::Pop | Opcode::Push
            | Opcode::Jmpr => &[Register],

            Opcode::AddI | Opcode::SubI | Opcode::MulI | Opcode::DivI | Opcode::ModI
            | Opcode::AndI | Opcode::OrI | Opcode::XorI | Opcode::Seti | Opcode::Ifi
            | Opcode::Ifti | Opcode::Gti | Opcode::Lti => &[Register, Literal],

            Opcode::Setv => &[Register, Vector],

            Opcode::Scan | Opcode::Peek | Opcode::Poke => &[Register, Vector],

            // Value register plus a location-stack pop for the target;
            // the target itself is not an operand slot (§4.3 "stack-
            // driven addressing").
            Opcode::PokeStack => &[Register],

            Opcode::Seek | Opcode::Repl => &[Vector],

            Opcode::Jmpi => &[Label],

            Opcode::Call => &[Label],
            Opcode::Ret => &[],

            Opcode::Sync | Opcode::Nop | Opcode::Die => &[],
        }
    }
}
