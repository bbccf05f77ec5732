// Layout (C8, §4.7 "Layout"): a cursor-based walk over the analyzed
// statement list that assigns every code cell a coordinate and a linear
// address. Label/CALL targets are written as placeholders here and
// patched by `link` once every label's address is known.

use std::collections::HashMap;

use crate::debug::SourcePos;
use crate::error::{CompilationError, CompilationErrorKind, SourceLoc};
use crate::isa::ISA;
use crate::molecule::{self, MoleculeType, Word};
use crate::world::Coord;

use super::semantic::{ResolvedExpr, ResolvedItem, SemanticResult};

/// A placeholder operand site that needs its final relative vector
/// patched in by `link` (§4.7 "rewrites label references").
#[derive(Clone, Debug)]
pub struct LabelSite {
    pub addr: usize,
    pub label: String,
    pub loc: SourceLoc,
}

/// One CALL instruction's call-site, recorded so `link` can build
/// `callSiteBindings` from the proc's REF/VAL signature. One entry per
/// operand cell placed after the target vector, in source order;
/// `None` where the operand isn't a register (a VAL literal).
#[derive(Clone, Debug)]
pub struct CallSite {
    pub addr: usize,
    pub proc_name: String,
    pub register_operands: Vec<Option<usize>>,
    pub loc: SourceLoc,
}

#[derive(Clone, Debug, Default)]
pub struct Placed {
    pub linear_to_coord: Vec<Coord>,
    pub coord_to_linear: HashMap<Coord, usize>,
    pub machine_code_layout: HashMap<Coord, Word>,
    pub initial_world_objects: HashMap<Coord, Word>,
    pub label_address_to_name: HashMap<usize, String>,
    pub source_map: HashMap<usize, SourcePos>,
    pub label_sites: Vec<LabelSite>,
    pub call_sites: Vec<CallSite>,
}

struct Cursor {
    pos: Coord,
    dv: Vec<i64>,
}

fn add(a: &[i64], b: &[i64]) -> Coord {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

pub fn layout(analyzed: &SemanticResult, dims: usize) -> Result<Placed, CompilationError> {
    let origin: Coord = vec![0; dims];
    let mut cursor = Cursor { pos: origin.clone(), dv: default_dv(dims) };
    let mut out = Placed::default();
    let mut next_linear: usize = 0;

    for stmt in &analyzed.stmts {
        match &stmt.item {
            ResolvedItem::Label(name) => {
                out.label_address_to_name.insert(next_linear, name.clone());
            }
            ResolvedItem::ProcStart { name, .. } => {
                out.label_address_to_name.insert(next_linear, name.clone());
            }
            ResolvedItem::ProcEnd | ResolvedItem::ScopeStart | ResolvedItem::ScopeEnd => {}
            ResolvedItem::Directive { name, args } => {
                apply_directive(name, args, &mut cursor, &origin, &mut out, &stmt.loc)?;
            }
            ResolvedItem::Instruction { mnemonic, operands } => {
                place_instruction(
                    mnemonic,
                    operands,
                    dims,
                    &mut cursor,
                    &mut next_linear,
                    &mut out,
                    &stmt.loc,
                )?;
            }
        }
    }

    Ok(out)
}

fn default_dv(dims: usize) -> Vec<i64> {
    let mut dv = vec![0; dims];
    dv[0] = 1;
    dv
}

fn apply_directive(
    name: &str,
    args: &[ResolvedExpr],
    cursor: &mut Cursor,
    origin: &[i64],
    out: &mut Placed,
    loc: &SourceLoc,
) -> Result<(), CompilationError> {
    match name {
        "ORG" => {
            let v = expect_vector(args, 0, loc)?;
            cursor.pos = add(origin, &v);
        }
        "DIR" => {
            let v = expect_vector(args, 0, loc)?;
            cursor.dv = v;
        }
        "PLACE" => {
            let (ty, value) = match args.get(0) {
                Some(ResolvedExpr::TypedLiteral(ty, v)) => (*ty, *v),
                _ => {
                    return Err(CompilationError::new(
                        CompilationErrorKind::BadOperand(".PLACE requires a typed literal".into()),
                        loc.clone(),
                    ))
                }
            };
            let v = expect_vector(args, 1, loc)?;
            let at = add(origin, &v);
            if out.machine_code_layout.contains_key(&at) {
                return Err(CompilationError::new(
                    CompilationErrorKind::CodeCollision(format!("{:?}", at)),
                    loc.clone(),
                ));
            }
            out.initial_world_objects.insert(at, molecule::pack(ty, value as i32));
        }
        "REQUIRE" | "ROUTINE" => {
            // No further layout effect; these name external/auxiliary
            // linkage concerns the single-file core doesn't resolve.
        }
        other => {
            return Err(CompilationError::new(
                CompilationErrorKind::UnknownDirective(other.to_string()),
                loc.clone(),
            ))
        }
    }
    Ok(())
}

fn expect_vector(args: &[ResolvedExpr], i: usize, loc: &SourceLoc) -> Result<Vec<i64>, CompilationError> {
    match args.get(i) {
        Some(ResolvedExpr::Vector(v)) => Ok(v.clone()),
        other => Err(CompilationError::new(
            CompilationErrorKind::BadOperand(format!("expected a vector, found {:?}", other)),
            loc.clone(),
        )),
    }
}

fn place_instruction(
    mnemonic: &str,
    operands: &[ResolvedExpr],
    dims: usize,
    cursor: &mut Cursor,
    next_linear: &mut usize,
    out: &mut Placed,
    loc: &SourceLoc,
) -> Result<(), CompilationError> {
    let id = ISA.resolve_name(mnemonic).expect("semantic analysis already validated the mnemonic");

    let instr_addr = *next_linear;
    place_cell(molecule::pack(MoleculeType::Code, id.0 as i32), cursor, next_linear, out, loc)?;

    let mut register_operands = Vec::new();
    let mut proc_name = None;
    for operand in operands {
        match operand {
            ResolvedExpr::Register(r) => {
                register_operands.push(Some(*r));
                place_cell(molecule::pack(MoleculeType::Code, *r as i32), cursor, next_linear, out, loc)?;
            }
            ResolvedExpr::TypedLiteral(ty, v) => {
                register_operands.push(None);
                place_cell(molecule::pack(*ty, *v as i32), cursor, next_linear, out, loc)?;
            }
            ResolvedExpr::Number(n) => {
                register_operands.push(None);
                place_cell(molecule::pack(MoleculeType::Data, *n as i32), cursor, next_linear, out, loc)?;
            }
            ResolvedExpr::Vector(v) => {
                if v.len() != dims {
                    return Err(CompilationError::new(
                        CompilationErrorKind::BadOperand(format!(
                            "vector has {} components, world has {} dimensions",
                            v.len(),
                            dims
                        )),
                        loc.clone(),
                    ));
                }
                register_operands.push(None);
                for component in v {
                    place_cell(molecule::pack(MoleculeType::Data, *component as i32), cursor, next_linear, out, loc)?;
                }
            }
            ResolvedExpr::Label(name) => {
                if mnemonic == "CALL" && proc_name.is_none() {
                    proc_name = Some(name.clone());
                } else {
                    register_operands.push(None);
                }
                let site_addr = *next_linear;
                out.label_sites.push(LabelSite { addr: site_addr, label: name.clone(), loc: loc.clone() });
                for _ in 0..dims {
                    place_cell(molecule::empty(), cursor, next_linear, out, loc)?;
                }
            }
        }
    }

    if mnemonic == "CALL" {
        if let Some(proc_name) = proc_name {
            out.call_sites.push(CallSite {
                addr: instr_addr,
                proc_name,
                register_operands,
                loc: loc.clone(),
            });
        }
    }

    Ok(())
}

/// Places one code cell, failing if a prior statement already claimed
/// this coordinate (§4.7: "address collisions inside code regions are
/// compilation failures"). A cursor can land back on already-placed code
/// after an `.ORG` that jumps backward; `.PLACE` already guards its own
/// insertion the same way.
fn place_cell(
    word: Word,
    cursor: &mut Cursor,
    next_linear: &mut usize,
    out: &mut Placed,
    loc: &SourceLoc,
) -> Result<(), CompilationError> {
    if out.machine_code_layout.contains_key(&cursor.pos) {
        return Err(CompilationError::new(
            CompilationErrorKind::CodeCollision(format!("{:?}", cursor.pos)),
            loc.clone(),
        ));
    }
    out.machine_code_layout.insert(cursor.pos.clone(), word);
    out.coord_to_linear.insert(cursor.pos.clone(), *next_linear);
    out.linear_to_coord.push(cursor.pos.clone());
    out.source_map.insert(
        *next_linear,
        SourcePos { file: loc.file.clone(), line: loc.line, column: loc.column },
    );
    *next_linear += 1;
    cursor.pos = add(&cursor.pos, &cursor.dv);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{parser::Parser, preprocess};

    fn place(src: &str, dims: usize) -> Placed {
        let mut sources = preprocess::SourceSet::new();
        sources.insert("t.asm".into(), src);
        let tokens = preprocess::preprocess("t.asm", &sources).unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let analyzed = super::super::semantic::analyze(program).unwrap();
        layout(&analyzed, dims).unwrap()
    }

    #[test]
    fn straight_line_code_advances_along_default_dv() {
        let placed = place("NOP\nNOP\n", 2);
        assert_eq!(placed.machine_code_layout.len(), 2);
        assert!(placed.machine_code_layout.contains_key(&vec![0, 0]));
        assert!(placed.machine_code_layout.contains_key(&vec![1, 0]));
    }

    #[test]
    fn org_moves_the_cursor() {
        let placed = place(".ORG 5|0\nNOP\n", 2);
        assert!(placed.machine_code_layout.contains_key(&vec![5, 0]));
    }

    #[test]
    fn place_directive_writes_non_code_cell() {
        let placed = place(".PLACE DATA:9 3|3|3\n", 3);
        assert_eq!(placed.initial_world_objects.get(&vec![3, 3, 3]), Some(&molecule::pack(MoleculeType::Data, 9)));
    }

    #[test]
    fn call_site_is_recorded_with_its_register_operands() {
        let placed = place(".PROC F REF x\nRET\n.ENDP\nCALL F %DR0\n", 2);
        assert_eq!(placed.call_sites.len(), 1);
        assert_eq!(placed.call_sites[0].proc_name, "F");
        assert_eq!(placed.call_sites[0].register_operands, vec![Some(0)]);
    }

    #[test]
    fn reorg_back_over_placed_code_is_a_collision() {
        let mut sources = preprocess::SourceSet::new();
        sources.insert("t.asm".into(), ".ORG 2|0\nNOP\n.ORG 2|0\nNOP\n");
        let tokens = preprocess::preprocess("t.asm", &sources).unwrap();
        let program = Parser::new(tokens).parse_program().unwrap();
        let analyzed = super::super::semantic::analyze(program).unwrap();
        assert!(layout(&analyzed, 2).is_err());
    }
}
