// Assembler front end (C7/C8, §4.6/§4.7): source text to `ProgramArtifact`.
// `compile` chains Lex -> Preprocess -> Parse -> Analyze -> Layout -> Link,
// the only entry point a host needs.

pub mod ast;
pub mod lexer;
pub mod link;
pub mod layout;
pub mod parser;
pub mod preprocess;
pub mod semantic;
pub mod token;

use crate::artifact::ProgramArtifact;
use crate::error::{CompilationError, Diagnostics};

use preprocess::SourceSet;

pub fn compile(
    program_id: &str,
    entry_file: &str,
    sources: &SourceSet,
    dims: usize,
) -> Result<ProgramArtifact, Diagnostics> {
    let tokens = preprocess::preprocess(entry_file, sources).map_err(one)?;
    let program = parser::Parser::new(tokens).parse_program().map_err(one)?;
    let analyzed = semantic::analyze(program)?;
    let placed = layout::layout(&analyzed, dims).map_err(one)?;
    link::link(program_id.to_string(), analyzed, placed, sources, dims).map_err(one)
}

fn one(e: CompilationError) -> Diagnostics {
    Diagnostics(vec![e])
}
