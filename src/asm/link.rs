// Link (C8, §4.7 "Link"): patches every label-reference placeholder
// `layout` left behind into a relative vector, and turns each recorded
// CALL site into a `callSiteBindings` entry. Verifies its own linear
// cursor agrees with layout's — they walk the same statement list, so
// any disagreement is a bug in one of the two passes, not bad input.

use std::collections::HashMap;

use crate::artifact::{ParamKind, ProgramArtifact};
use crate::error::{CompilationError, CompilationErrorKind};

use super::layout::Placed;
use super::preprocess::SourceSet;
use super::semantic::SemanticResult;

fn sub(a: &[i64], b: &[i64]) -> Vec<i64> {
    a.iter().zip(b).map(|(x, y)| x - y).collect()
}

pub fn link(
    program_id: String,
    analyzed: SemanticResult,
    mut placed: Placed,
    sources: &SourceSet,
    dims: usize,
) -> Result<ProgramArtifact, CompilationError> {
    let origin = vec![0i64; dims];

    let mut name_to_addr: HashMap<String, usize> = HashMap::new();
    for (addr, name) in &placed.label_address_to_name {
        name_to_addr.insert(name.clone(), *addr);
    }

    for site in &placed.label_sites {
        let target_addr = name_to_addr.get(&site.label).ok_or_else(|| {
            CompilationError::new(
                CompilationErrorKind::UndefinedSymbol(site.label.clone()),
                site.loc.clone(),
            )
        })?;
        let target_coord = placed.linear_to_coord[*target_addr].clone();
        let relative = sub(&target_coord, &origin);
        for i in 0..dims {
            let addr = site.addr + i;
            let coord = placed.linear_to_coord[addr].clone();
            placed
                .machine_code_layout
                .insert(coord, crate::molecule::pack(crate::molecule::MoleculeType::Code, relative[i] as i32));
        }
    }

    let mut call_site_bindings = HashMap::new();
    let mut call_site_procs = HashMap::new();
    for call in &placed.call_sites {
        let sig = analyzed.proc_name_to_params.get(&call.proc_name).ok_or_else(|| {
            CompilationError::new(
                CompilationErrorKind::UndefinedSymbol(call.proc_name.clone()),
                call.loc.clone(),
            )
        })?;
        call_site_procs.insert(call.addr, call.proc_name.clone());
        let refs: Vec<usize> = sig
            .params
            .iter()
            .zip(&call.register_operands)
            .filter(|((_, kind), _)| *kind == ParamKind::Ref)
            .map(|((_, _), reg)| {
                reg.expect("semantic analysis requires a REF parameter's argument to be a register")
            })
            .collect();
        if !refs.is_empty() {
            call_site_bindings.insert(call.addr, refs);
        }
    }

    assert_layout_cursor_agrees(&analyzed, dims, placed.linear_to_coord.len());

    let source_files = sources
        .iter()
        .map(|(file, text)| (file.clone(), text.lines().map(str::to_string).collect()))
        .collect();

    Ok(ProgramArtifact {
        program_id,
        dims,
        source_files,
        linear_to_coord: placed.linear_to_coord,
        coord_to_linear: placed.coord_to_linear,
        machine_code_layout: placed.machine_code_layout,
        initial_world_objects: placed.initial_world_objects,
        label_address_to_name: placed.label_address_to_name,
        register_alias_map: analyzed.register_alias_map,
        proc_name_to_params: analyzed.proc_name_to_params,
        call_site_bindings,
        call_site_procs,
        source_map: placed.source_map,
        token_map: None,
    })
}

/// `layout` advances its linear-address cursor by one per code cell it
/// places as it walks `analyzed.stmts`. This independently recomputes
/// that same total by summing each instruction's cell count straight off
/// the resolved operand list, with no cursor or coordinate bookkeeping of
/// its own. Agreement means the two passes walked the same statements the
/// same way; disagreement means one of them drifted from the other, which
/// is a bug in this crate, not bad input, so it's asserted rather than
/// surfaced as a `CompilationError`.
fn assert_layout_cursor_agrees(analyzed: &SemanticResult, dims: usize, placed_cell_count: usize) {
    let expected: usize = analyzed
        .stmts
        .iter()
        .map(|stmt| match &stmt.item {
            super::semantic::ResolvedItem::Instruction { operands, .. } => {
                1 + operands.iter().map(|op| operand_cell_count(op, dims)).sum::<usize>()
            }
            _ => 0,
        })
        .sum();
    assert_eq!(
        expected, placed_cell_count,
        "layout/link cursor disagreement: link independently counted {} code cells, \
         layout placed {} - one of the two passes drifted from the statement list",
        expected, placed_cell_count,
    );
}

fn operand_cell_count(op: &super::semantic::ResolvedExpr, dims: usize) -> usize {
    use super::semantic::ResolvedExpr;
    match op {
        ResolvedExpr::Register(_) | ResolvedExpr::TypedLiteral(..) | ResolvedExpr::Number(_) => 1,
        ResolvedExpr::Vector(_) | ResolvedExpr::Label(_) => dims,
    }
}

#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    use crate::asm::{self, preprocess::SourceSet};

    fn instruction_line(i: usize) -> String {
        match i % 3 {
            0 => "NOP\n".to_string(),
            1 => format!("SETI %DR0 DATA:{}\n", i as i64),
            _ => "ADDR %DR0 %DR0\n".to_string(),
        }
    }

    proptest! {
        // `link` panics via `assert_layout_cursor_agrees` if its
        // independently-recomputed cell count ever disagrees with
        // `layout`'s; a successful compile across a spread of random
        // straight-line programs and dimension counts is the property
        // holding (§4.7, §8 "Layout/link agreement").
        #[test]
        fn layout_and_link_agree_on_random_straight_line_programs(
            dims in 1usize..5,
            n in 0usize..40,
        ) {
            let src: String = (0..n).map(instruction_line).collect();
            let mut sources = SourceSet::new();
            sources.insert("t.asm".into(), src.as_str());
            prop_assert!(asm::compile("p", "t.asm", &sources, dims).is_ok());
        }
    }
}
