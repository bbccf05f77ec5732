// Error taxonomy (§7). Compile/artifact errors fail fast and carry a full
// diagnostic list; runtime errors are data attached to an organism, never
// a control-flow escape out of the VM.

use thiserror::Error;

/// A source location, attached to every compile-time diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompilationErrorKind {
    #[error("lex error: {0}")]
    Lex(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown directive `{0}`")]
    UnknownDirective(String),
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),
    #[error("bad operand: {0}")]
    BadOperand(String),
    #[error("redefinition of `{0}`")]
    Redefinition(String),
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),
    #[error("label `{0}` already defined in this scope")]
    LabelCollision(String),
    #[error("code collision at address {0}")]
    CodeCollision(String),
    #[error("include cycle detected: {0}")]
    IncludeCycle(String),
    #[error("arity mismatch: expected {expected}, got {got}")]
    ArityMismatch { expected: usize, got: usize },
}

/// One compile-time diagnostic, always carrying `(file, line, column)`.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{loc}: {kind}")]
pub struct CompilationError {
    pub kind: CompilationErrorKind,
    pub loc: SourceLoc,
}

impl CompilationError {
    pub fn new(kind: CompilationErrorKind, loc: SourceLoc) -> Self {
        CompilationError { kind, loc }
    }
}

/// A non-empty collection of compile errors. Compilation never yields a
/// partial artifact alongside errors (§7 propagation policy).
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{} compilation error(s)", .0.len())]
pub struct Diagnostics(pub Vec<CompilationError>);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArtifactError {
    #[error("malformed artifact: {0}")]
    Malformed(String),
    #[error("artifact incompatible with environment: {0}")]
    Incompatible(String),
}

/// Runtime errors are local to one organism's instruction (§7). They are
/// never propagated as a `Result` out of the scheduler; they are recorded
/// as `instructionFailed`/`failureReason` on the organism.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("illegal instruction at opcode {0}")]
    IllegalInstruction(u16),
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("insufficient energy: need {need}, have {have}")]
    OutOfEnergy { need: i64, have: i64 },
    #[error("invalid register id {0}")]
    InvalidRegister(usize),
    #[error("invalid intent produced by instruction")]
    InvalidIntent,
}

/// Per-instruction scheduler verdict (§4.5, §7). Not an error type in the
/// `std::error::Error` sense — it is recorded data, always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SchedulerStatus {
    NotApplicable,
    WonExecution,
    LostLowerIdWon,
    LostOtherReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_display_names_the_count() {
        let d = Diagnostics(vec![CompilationError::new(
            CompilationErrorKind::UndefinedSymbol("FOO".into()),
            SourceLoc { file: "a.asm".into(), line: 1, column: 2 },
        )]);
        assert_eq!(format!("{}", d), "1 compilation error(s)");
    }

    #[test]
    fn compilation_error_includes_location() {
        let e = CompilationError::new(
            CompilationErrorKind::UnknownOpcode("FROB".into()),
            SourceLoc { file: "a.asm".into(), line: 3, column: 1 },
        );
        assert_eq!(format!("{}", e), "a.asm:3:1: unknown opcode `FROB`");
    }
}
