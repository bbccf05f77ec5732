// VM executor (C5): fetch one instruction, dispatch its semantics, and
// produce the `Intent` the scheduler will arbitrate (§4.4 steps 2-3).
//
// Organism-local effects (registers, stacks, IP, energy, call frames) are
// applied directly here as the instruction executes; only effects that
// touch the shared `World` are deferred into the returned `Intent`.

pub mod intent;

use crate::artifact::{ParamKind, ProgramArtifact};
use crate::error::RuntimeError;
use crate::isa::{ArgKind, Isa, Opcode};
use crate::molecule::{self, MoleculeType, Word};
use crate::organism::{CallFrame, FprBinding, Organism, RegId};
use crate::world::{Coord, World};

pub use intent::{no_effect, snapshot_organism_for_log, ChildSpec, Intent, PlannedStep};

/// Energy an organism must hold before REPL will spawn a child (§4.3,
/// value not specified by the format; chosen so the energy-pickup
/// scenario in §8 has room to run a few REPLs before starving).
pub const MIN_REPL_ENERGY: i64 = 10;

#[derive(Debug, Clone)]
enum Operand {
    Register(usize),
    Literal(Word),
    Vector(Coord),
}

#[derive(Debug, Clone)]
enum CallArg {
    Ref(usize),
    Val(Word),
}

struct Fetched {
    opcode: Opcode,
    operands: Vec<Operand>,
    call_args: Option<Vec<CallArg>>,
    call_proc: Option<String>,
    next_ip: Coord,
}

fn add_vectors(a: &[i64], b: &[i64]) -> Coord {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

/// Read the opcode at `coord` without consuming any of its operands, just
/// to learn its length (used by the predicate-skip family, §4.4 step 4).
///
/// CALL's on-grid length isn't a static function of its opcode: it grows
/// by one cell per REF/VAL parameter declared on the callee, which varies
/// per call site (`asm::layout::place_instruction` places those cells).
/// A CALL landed on by a predicate skip must therefore be sized from the
/// artifact's recorded call-site proc, not from the ISA's static
/// signature, or the skip lands mid-instruction.
fn instruction_length_at(
    world: &World,
    coord: &Coord,
    isa: &Isa,
    artifact: &ProgramArtifact,
) -> Result<usize, RuntimeError> {
    let word = world.get(coord).molecule;
    if molecule::type_of(word) != MoleculeType::Code {
        return Err(RuntimeError::IllegalInstruction(0));
    }
    let raw_id = molecule::value_of(word);
    let id = crate::isa::OpcodeId(raw_id.max(0) as u16);
    let opcode = isa.opcode(id).ok_or(RuntimeError::IllegalInstruction(id.0))?;
    if opcode == Opcode::Call {
        if let Some(params) = artifact
            .coord_to_linear
            .get(coord)
            .and_then(|linear| artifact.call_site_procs.get(linear))
            .and_then(|proc_name| artifact.proc_name_to_params.get(proc_name))
        {
            return Ok(1 + coord.len() + params.params.len());
        }
    }
    isa.instruction_length(id, coord.len())
        .ok_or(RuntimeError::IllegalInstruction(id.0))
}

fn fetch(
    organism: &Organism,
    world: &World,
    artifact: &ProgramArtifact,
    isa: &Isa,
) -> Result<Fetched, RuntimeError> {
    let dims = organism.ip.len();
    let mut cursor = organism.ip.clone();

    let opcode_word = world.get(&cursor).molecule;
    if molecule::type_of(opcode_word) != MoleculeType::Code {
        return Err(RuntimeError::IllegalInstruction(0));
    }
    let raw_id = molecule::value_of(opcode_word);
    if raw_id < 0 {
        return Err(RuntimeError::IllegalInstruction(0));
    }
    let opcode_id = crate::isa::OpcodeId(raw_id as u16);
    let opcode = isa.opcode(opcode_id).ok_or(RuntimeError::IllegalInstruction(raw_id as u16))?;
    cursor = world.neighbor(&cursor, &organism.dv);

    let mut operands = Vec::with_capacity(opcode.signature().len());
    for kind in opcode.signature() {
        match kind {
            ArgKind::Register => {
                let w = world.get(&cursor).molecule;
                cursor = world.neighbor(&cursor, &organism.dv);
                operands.push(Operand::Register(molecule::value_of(w).max(0) as usize));
            }
            ArgKind::Literal => {
                let w = world.get(&cursor).molecule;
                cursor = world.neighbor(&cursor, &organism.dv);
                operands.push(Operand::Literal(w));
            }
            ArgKind::Vector | ArgKind::Label => {
                let mut v = Vec::with_capacity(dims);
                for _ in 0..dims {
                    let w = world.get(&cursor).molecule;
                    v.push(molecule::value_of(w) as i64);
                    cursor = world.neighbor(&cursor, &organism.dv);
                }
                operands.push(Operand::Vector(v));
            }
        }
    }

    let mut call_args = None;
    let mut call_proc = None;
    if opcode == Opcode::Call {
        if let Some(Operand::Vector(relative)) = operands.first() {
            let absolute = world.wrap(&add_vectors(&organism.initial_position, relative));
            let name = artifact
                .coord_to_linear
                .get(&absolute)
                .and_then(|linear| artifact.label_address_to_name.get(linear))
                .cloned();
            if let Some(sig) = name.as_ref().and_then(|n| artifact.proc_name_to_params.get(n)) {
                let mut args = Vec::with_capacity(sig.params.len());
                for (_, kind) in &sig.params {
                    let w = world.get(&cursor).molecule;
                    cursor = world.neighbor(&cursor, &organism.dv);
                    args.push(match kind {
                        ParamKind::Ref => CallArg::Ref(molecule::value_of(w).max(0) as usize),
                        // A VAL argument cell holds either a register id
                        // (classic `CALL proc %DR0`, or an explicit `[VAL
                        // %DR0]`) or a literal value placed directly by
                        // an explicit `[VAL DATA:7]` — only the former is
                        // Code-tagged, so the tag disambiguates.
                        ParamKind::Val => {
                            if molecule::type_of(w) == MoleculeType::Code {
                                let src = RegId::decode(molecule::value_of(w).max(0) as usize)
                                    .ok_or(RuntimeError::InvalidRegister(molecule::value_of(w).max(0) as usize))?;
                                CallArg::Val(organism.read_word(src)?)
                            } else {
                                CallArg::Val(w)
                            }
                        }
                    });
                }
                call_args = Some(args);
            }
            call_proc = name;
        }
    }

    Ok(Fetched { opcode, operands, call_args, call_proc, next_ip: cursor })
}

fn reg(operands: &[Operand], i: usize) -> Result<RegId, RuntimeError> {
    match operands.get(i) {
        Some(Operand::Register(abs)) => {
            RegId::decode(*abs).ok_or(RuntimeError::InvalidRegister(*abs))
        }
        _ => Err(RuntimeError::InvalidIntent),
    }
}

fn literal(operands: &[Operand], i: usize) -> Result<Word, RuntimeError> {
    match operands.get(i) {
        Some(Operand::Literal(w)) => Ok(*w),
        _ => Err(RuntimeError::InvalidIntent),
    }
}

fn vector(operands: &[Operand], i: usize) -> Result<Coord, RuntimeError> {
    match operands.get(i) {
        Some(Operand::Vector(v)) => Ok(v.clone()),
        _ => Err(RuntimeError::InvalidIntent),
    }
}

fn binop_r(
    organism: &mut Organism,
    a: RegId,
    b: RegId,
    f: impl Fn(i32, i32) -> i32,
) -> Result<(), RuntimeError> {
    let wa = organism.read_word(a)?;
    let wb = organism.read_word(b)?;
    let ty = molecule::type_of(wa);
    let result = f(molecule::value_of(wa), molecule::value_of(wb));
    organism.write_word(a, molecule::pack(ty, result))
}

fn binop_i(
    organism: &mut Organism,
    a: RegId,
    lit: Word,
    f: impl Fn(i32, i32) -> i32,
) -> Result<(), RuntimeError> {
    let wa = organism.read_word(a)?;
    let ty = molecule::type_of(wa);
    let result = f(molecule::value_of(wa), molecule::value_of(lit));
    organism.write_word(a, molecule::pack(ty, result))
}

fn unop_r(organism: &mut Organism, a: RegId, f: impl Fn(i32) -> i32) -> Result<(), RuntimeError> {
    let wa = organism.read_word(a)?;
    let ty = molecule::type_of(wa);
    organism.write_word(a, molecule::pack(ty, f(molecule::value_of(wa))))
}

/// Run one organism's fetch+plan step (§4.4 steps 1-4). Organism-local
/// effects are already applied by the time this returns; the returned
/// `Intent` is only what remains for the scheduler.
pub fn step(organism: &mut Organism, world: &World, artifact: &ProgramArtifact, isa: &Isa) -> Intent {
    organism.snapshot_and_clear_flags();

    let fetched = match fetch(organism, world, artifact, isa) {
        Ok(f) => f,
        Err(e) => {
            // Can't even read the opcode cell; advance by one cell so a
            // persistently malformed program doesn't spin forever on the
            // same coordinate.
            organism.ip = world.neighbor(&organism.ip, &organism.dv);
            organism.instruction_failed = true;
            organism.failure_reason = Some(e.into());
            return Intent::NoEffect;
        }
    };

    organism.ip = fetched.next_ip.clone();

    match dispatch(&fetched, organism, world, artifact, isa) {
        Ok(intent) => intent,
        Err(e) => {
            organism.instruction_failed = true;
            organism.failure_reason = Some(e.into());
            Intent::NoEffect
        }
    }
}

fn dispatch(
    fetched: &Fetched,
    organism: &mut Organism,
    world: &World,
    artifact: &ProgramArtifact,
    isa: &Isa,
) -> Result<Intent, RuntimeError> {
    let ops = &fetched.operands;
    match fetched.opcode {
        Opcode::AddR => { binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a.wrapping_add(b))?; Ok(Intent::RegisterWrite) }
        Opcode::SubR => { binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a.wrapping_sub(b))?; Ok(Intent::RegisterWrite) }
        Opcode::MulR => { binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a.wrapping_mul(b))?; Ok(Intent::RegisterWrite) }
        Opcode::DivR => {
            let b = organism.read_word(reg(ops, 1)?)?;
            if molecule::value_of(b) == 0 { return Err(RuntimeError::InvalidIntent); }
            binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a.wrapping_div(b))?;
            Ok(Intent::RegisterWrite)
        }
        Opcode::ModR => {
            let b = organism.read_word(reg(ops, 1)?)?;
            if molecule::value_of(b) == 0 { return Err(RuntimeError::InvalidIntent); }
            binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a.wrapping_rem(b))?;
            Ok(Intent::RegisterWrite)
        }
        Opcode::AndR => { binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a & b)?; Ok(Intent::RegisterWrite) }
        Opcode::OrR => { binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a | b)?; Ok(Intent::RegisterWrite) }
        Opcode::XorR => { binop_r(organism, reg(ops, 0)?, reg(ops, 1)?, |a, b| a ^ b)?; Ok(Intent::RegisterWrite) }
        Opcode::NotR => { unop_r(organism, reg(ops, 0)?, |a| !a)?; Ok(Intent::RegisterWrite) }
        Opcode::NegR => { unop_r(organism, reg(ops, 0)?, |a| a.wrapping_neg())?; Ok(Intent::RegisterWrite) }

        Opcode::AddI => { binop_i(organism, reg(ops, 0)?, literal(ops, 1)?, |a, b| a.wrapping_add(b))?; Ok(Intent::RegisterWrite) }
        Opcode::SubI => { binop_i(organism, reg(ops, 0)?, literal(ops, 1)?, |a, b| a.wrapping_sub(b))?; Ok(Intent::RegisterWrite) }
        Opcode::MulI => { binop_i(organism, reg(ops, 0)?, literal(ops, 1)?, |a, b| a.wrapping_mul(b))?; Ok(Intent::RegisterWrite) }
        Opcode::DivI => {
            let lit = literal(ops, 1)?;
            if molecule::value_of(lit) == 0 { return Err(RuntimeError::InvalidIntent); }
            binop_i(organism, reg(ops, 0)?, lit, |a, b| a.wrapping_div(b))?;
            Ok(Intent::RegisterWrite)
        }
        Opcode::ModI => {
            let lit = literal(ops, 1)?;
            if molecule::value_of(lit) == 0 { return Err(RuntimeError::InvalidIntent); }
            binop_i(organism, reg(ops, 0)?, lit, |a, b| a.wrapping_rem(b))?;
            Ok(Intent::RegisterWrite)
        }
        Opcode::AndI => { binop_i(organism, reg(ops, 0)?, literal(ops, 1)?, |a, b| a & b)?; Ok(Intent::RegisterWrite) }
        Opcode::OrI => { binop_i(organism, reg(ops, 0)?, literal(ops, 1)?, |a, b| a | b)?; Ok(Intent::RegisterWrite) }
        Opcode::XorI => { binop_i(organism, reg(ops, 0)?, literal(ops, 1)?, |a, b| a ^ b)?; Ok(Intent::RegisterWrite) }

        Opcode::Seti => {
            let r = reg(ops, 0)?;
            let lit = literal(ops, 1)?;
            organism.write_word(r, lit)?;
            Ok(Intent::RegisterWrite)
        }
        Opcode::Setv => {
            let r = reg(ops, 0)?;
            let v = vector(ops, 1)?;
            organism.write_vector(r, v)?;
            Ok(Intent::RegisterWrite)
        }
        Opcode::Setr | Opcode::Movr => {
            let dst = reg(ops, 0)?;
            let src = reg(ops, 1)?;
            let v = organism.read_word(src)?;
            organism.write_word(dst, v)?;
            Ok(Intent::RegisterWrite)
        }

        Opcode::Ifi => predicate_skip(organism, world, isa, artifact, fetched, {
            let w = organism.read_word(reg(ops, 0)?)?;
            molecule::value_of(w) == molecule::value_of(literal(ops, 1)?)
        }),
        Opcode::Ifr => predicate_skip(organism, world, isa, artifact, fetched, {
            let a = organism.read_word(reg(ops, 0)?)?;
            let b = organism.read_word(reg(ops, 1)?)?;
            molecule::value_of(a) == molecule::value_of(b)
        }),
        Opcode::Ifti => predicate_skip(organism, world, isa, artifact, fetched, {
            let w = organism.read_word(reg(ops, 0)?)?;
            molecule::type_of(w) == molecule::type_of(literal(ops, 1)?)
        }),
        Opcode::Gti => predicate_skip(organism, world, isa, artifact, fetched, {
            let w = organism.read_word(reg(ops, 0)?)?;
            molecule::value_of(w) > molecule::value_of(literal(ops, 1)?)
        }),
        Opcode::Gtr => predicate_skip(organism, world, isa, artifact, fetched, {
            let a = organism.read_word(reg(ops, 0)?)?;
            let b = organism.read_word(reg(ops, 1)?)?;
            molecule::value_of(a) > molecule::value_of(b)
        }),
        Opcode::Lti => predicate_skip(organism, world, isa, artifact, fetched, {
            let w = organism.read_word(reg(ops, 0)?)?;
            molecule::value_of(w) < molecule::value_of(literal(ops, 1)?)
        }),
        Opcode::Ltr => predicate_skip(organism, world, isa, artifact, fetched, {
            let a = organism.read_word(reg(ops, 0)?)?;
            let b = organism.read_word(reg(ops, 1)?)?;
            molecule::value_of(a) < molecule::value_of(b)
        }),

        Opcode::Jmpi => {
            let rel = vector(ops, 0)?;
            let target = world.wrap(&add_vectors(&organism.initial_position, &rel));
            organism.ip = target.clone();
            Ok(Intent::Move { new_ip: target })
        }
        Opcode::Jmpr => {
            let r = reg(ops, 0)?;
            let target = world.wrap(&organism.read_vector(r)?);
            organism.ip = target.clone();
            Ok(Intent::Move { new_ip: target })
        }

        Opcode::Call => do_call(fetched, organism, world, artifact),
        Opcode::Ret => {
            let frame: CallFrame = organism.pop_call()?;
            organism.ip = frame.absolute_return_ip;
            if let Some(dv) = frame.saved_dv {
                organism.dv = dv;
            }
            Ok(Intent::Return)
        }

        Opcode::Scan => {
            let r = reg(ops, 0)?;
            let offset = vector(ops, 1)?;
            let target = world.neighbor(&organism.ip_before_fetch, &offset);
            let word = world.get(&target).molecule;
            organism.write_word(r, word)?;
            Ok(Intent::WorldRead)
        }
        Opcode::Peek => {
            let r = reg(ops, 0)?;
            let offset = vector(ops, 1)?;
            let target = world.neighbor(&organism.ip_before_fetch, &offset);
            let word = world.get(&target).molecule;
            organism.write_word(r, word)?;
            if molecule::type_of(word) == MoleculeType::Energy {
                organism.er += molecule::value_of(word) as i64;
            }
            Ok(Intent::WorldWrite { coord: target, molecule: molecule::empty() })
        }
        Opcode::Poke => {
            let r = reg(ops, 0)?;
            let offset = vector(ops, 1)?;
            let target = world.neighbor(&organism.ip_before_fetch, &offset);
            let value = organism.read_word(r)?;
            Ok(Intent::WorldWrite { coord: target, molecule: value })
        }
        Opcode::PokeStack => {
            let r = reg(ops, 0)?;
            let target = organism.pop_location()?;
            let value = organism.read_word(r)?;
            Ok(Intent::WorldWriteUnresolved { coord: target, molecule: value })
        }

        Opcode::Seek => {
            let offset = vector(ops, 0)?;
            let new_ip = world.neighbor(&organism.ip_before_fetch, &offset);
            organism.ip = new_ip.clone();
            Ok(Intent::Move { new_ip })
        }

        Opcode::Sync | Opcode::Nop => Ok(Intent::NoEffect),

        Opcode::Nrg => {
            let r = reg(ops, 0)?;
            let clamped = organism.er.clamp(molecule::MIN_VALUE as i64, molecule::MAX_VALUE as i64) as i32;
            organism.write_word(r, molecule::pack(MoleculeType::Energy, clamped))?;
            Ok(Intent::RegisterWrite)
        }

        Opcode::Push => {
            let r = reg(ops, 0)?;
            let w = organism.read_word(r)?;
            organism.push_data(w)?;
            Ok(Intent::StackOp)
        }
        Opcode::Pop => {
            let r = reg(ops, 0)?;
            let w = organism.pop_data()?;
            organism.write_word(r, w)?;
            Ok(Intent::StackOp)
        }

        Opcode::Repl => {
            if organism.er < MIN_REPL_ENERGY {
                return Err(RuntimeError::OutOfEnergy { need: MIN_REPL_ENERGY, have: organism.er });
            }
            let offset = vector(ops, 0)?;
            let position = world.neighbor(&organism.ip_before_fetch, &offset);
            let cost = MIN_REPL_ENERGY;
            organism.er -= cost;
            Ok(Intent::Spawn {
                child: ChildSpec {
                    program_id: organism.program_id.clone(),
                    position,
                    direction: organism.dv.clone(),
                    initial_energy: cost,
                    parent_id: organism.id,
                },
            })
        }
        Opcode::Die => {
            organism.is_dead = true;
            Ok(Intent::Die)
        }
    }
}

fn predicate_skip(
    organism: &mut Organism,
    world: &World,
    isa: &Isa,
    artifact: &ProgramArtifact,
    fetched: &Fetched,
    predicate: bool,
) -> Result<Intent, RuntimeError> {
    if !predicate {
        return Ok(Intent::NoEffect);
    }
    let skip_len = instruction_length_at(world, &fetched.next_ip, isa, artifact)?;
    let offset: Vec<i64> = organism.dv.iter().map(|d| d * skip_len as i64).collect();
    let new_ip = world.neighbor(&fetched.next_ip, &offset);
    organism.ip = new_ip.clone();
    organism.skip_ip_advance = true;
    Ok(Intent::Move { new_ip })
}

fn do_call(
    fetched: &Fetched,
    organism: &mut Organism,
    world: &World,
    artifact: &ProgramArtifact,
) -> Result<Intent, RuntimeError> {
    let ops = &fetched.operands;
    let relative = vector(ops, 0)?;
    let target = world.wrap(&add_vectors(&organism.initial_position, &relative));

    let proc_name = fetched.call_proc.as_ref();
    let sig = proc_name.and_then(|n| artifact.proc_name_to_params.get(n));
    let call_args = fetched.call_args.as_ref();

    let mut new_fpr = Vec::new();
    let mut binding_vector = Vec::new();
    if let (Some(sig), Some(call_args)) = (sig, call_args) {
        for ((_, kind), arg) in sig.params.iter().zip(call_args.iter()) {
            match (kind, arg) {
                (ParamKind::Ref, CallArg::Ref(abs)) => {
                    let source = RegId::decode(*abs).ok_or(RuntimeError::InvalidRegister(*abs))?;
                    let flattened = organism.flatten_ref(source);
                    let binding = match flattened {
                        RegId::Lr(_) => FprBinding::RefVector(flattened),
                        _ => FprBinding::RefWord(flattened),
                    };
                    new_fpr.push(binding);
                    binding_vector.push(Some(source));
                }
                (ParamKind::Val, CallArg::Val(w)) => {
                    new_fpr.push(FprBinding::Value(*w));
                    binding_vector.push(None);
                }
                _ => return Err(RuntimeError::InvalidIntent),
            }
        }
    }

    organism.push_call(fetched.next_ip.clone(), Some(organism.dv.clone()), new_fpr, binding_vector)?;
    organism.ip = target.clone();
    Ok(Intent::Call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::ISA;
    use crate::molecule::pack;
    use crate::organism::{RegisterCounts, StackLimits};

    fn world_2d() -> World {
        World::new(vec![10, 10], true)
    }

    fn empty_artifact() -> ProgramArtifact {
        ProgramArtifact {
            program_id: "p".into(),
            dims: 2,
            source_files: Default::default(),
            linear_to_coord: vec![],
            coord_to_linear: Default::default(),
            machine_code_layout: Default::default(),
            initial_world_objects: Default::default(),
            label_address_to_name: Default::default(),
            register_alias_map: Default::default(),
            proc_name_to_params: Default::default(),
            call_site_bindings: Default::default(),
            call_site_procs: Default::default(),
            source_map: Default::default(),
            token_map: None,
        }
    }

    fn organism_at(pos: Coord, dv: Vec<i64>) -> Organism {
        Organism::new(0, None, 0, "p".into(), pos, dv, 0, &RegisterCounts::default(), StackLimits::default())
    }

    fn place_opcode(world: &mut World, at: &Coord, op: Opcode) {
        let id = ISA.resolve_name(op.name()).unwrap();
        world.set(at, pack(MoleculeType::Code, id.0 as i32), None);
    }

    #[test]
    fn seti_writes_literal_and_advances() {
        let mut world = world_2d();
        let artifact = empty_artifact();
        let mut o = organism_at(vec![0, 0], vec![1, 0]);
        place_opcode(&mut world, &[0, 0], Opcode::Seti);
        world.set(&[1, 0], pack(MoleculeType::Code, 0), None); // %DR0
        world.set(&[2, 0], pack(MoleculeType::Data, 42), None);

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert!(matches!(intent, Intent::RegisterWrite));
        assert_eq!(o.read_word(RegId::Dr(0)).unwrap(), pack(MoleculeType::Data, 42));
        assert_eq!(o.ip, vec![3, 0]);
    }

    #[test]
    fn seek_wraps_around_torus() {
        let mut world = World::new(vec![5, 5], true);
        let artifact = empty_artifact();
        let mut o = organism_at(vec![4, 0], vec![1, 0]);
        place_opcode(&mut world, &[4, 0], Opcode::Seek);
        world.set(&[0, 0], pack(MoleculeType::Code, 1), None);
        world.set(&[1, 0], pack(MoleculeType::Code, 0), None);

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert!(matches!(intent, Intent::Move { .. }));
        assert_eq!(o.ip[0], 0);
    }

    #[test]
    fn peek_consumes_energy_cell_and_credits_organism() {
        let mut world = world_2d();
        let artifact = empty_artifact();
        let mut o = organism_at(vec![0, 0], vec![1, 0]);
        place_opcode(&mut world, &[0, 0], Opcode::Peek);
        world.set(&[1, 0], pack(MoleculeType::Code, 0), None); // %DR0
        world.set(&[2, 0], pack(MoleculeType::Code, 5), None); // vector (5,0)
        world.set(&[3, 0], pack(MoleculeType::Code, 0), None);
        world.set(&[5, 0], pack(MoleculeType::Energy, 5), None);

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert_eq!(o.er, 5);
        assert_eq!(o.read_word(RegId::Dr(0)).unwrap(), pack(MoleculeType::Energy, 5));
        match intent {
            Intent::WorldWrite { coord, molecule } => {
                assert_eq!(coord, vec![5, 0]);
                assert!(molecule::is_empty(molecule));
            }
            other => panic!("expected WorldWrite, got {:?}", other),
        }
    }

    #[test]
    fn scan_does_not_consume() {
        let mut world = world_2d();
        let artifact = empty_artifact();
        let mut o = organism_at(vec![0, 0], vec![1, 0]);
        place_opcode(&mut world, &[0, 0], Opcode::Scan);
        world.set(&[1, 0], pack(MoleculeType::Code, 0), None); // %DR0
        world.set(&[2, 0], pack(MoleculeType::Code, 5), None); // vector (5,0)
        world.set(&[3, 0], pack(MoleculeType::Code, 0), None);
        world.set(&[5, 0], pack(MoleculeType::Energy, 9), None);

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert!(matches!(intent, Intent::WorldRead));
        assert_eq!(o.er, 0);
        assert_eq!(world.get(&[5, 0]).molecule, pack(MoleculeType::Energy, 9));
    }

    #[test]
    fn predicate_skip_jumps_over_next_instruction_atomically() {
        let mut world = world_2d();
        let artifact = empty_artifact();
        let mut o = organism_at(vec![0, 0], vec![1, 0]);
        // IFI %DR0 0  -> true, should skip the JMPI at (3,0)
        place_opcode(&mut world, &[0, 0], Opcode::Ifi);
        world.set(&[1, 0], pack(MoleculeType::Code, 0), None); // %DR0
        world.set(&[2, 0], pack(MoleculeType::Data, 0), None); // literal 0
        place_opcode(&mut world, &[3, 0], Opcode::Jmpi);
        world.set(&[4, 0], pack(MoleculeType::Code, 0), None);
        world.set(&[5, 0], pack(MoleculeType::Code, 0), None);
        place_opcode(&mut world, &[6, 0], Opcode::Nop);

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert!(matches!(intent, Intent::Move { .. }));
        assert_eq!(o.ip, vec![6, 0]);
    }

    #[test]
    fn predicate_skip_over_parameterized_call_uses_its_true_length() {
        let mut world = world_2d();
        let mut artifact = empty_artifact();
        let mut o = organism_at(vec![0, 0], vec![1, 0]);
        // IFI %DR0 0 -> true, should skip the 4-cell CALL at (3,0): opcode
        // + 2-cell target vector + 1 REF param cell, not the ISA's static
        // 3-cell `[Label]` signature.
        place_opcode(&mut world, &[0, 0], Opcode::Ifi);
        world.set(&[1, 0], pack(MoleculeType::Code, 0), None); // %DR0
        world.set(&[2, 0], pack(MoleculeType::Data, 0), None); // literal 0
        place_opcode(&mut world, &[3, 0], Opcode::Call);
        world.set(&[4, 0], pack(MoleculeType::Code, 0), None);
        world.set(&[5, 0], pack(MoleculeType::Code, 0), None);
        world.set(&[6, 0], pack(MoleculeType::Code, 0), None); // REF param register id
        place_opcode(&mut world, &[7, 0], Opcode::Nop);

        artifact.coord_to_linear.insert(vec![3, 0], 3);
        artifact.call_site_procs.insert(3, "P".into());
        artifact.proc_name_to_params.insert(
            "P".into(),
            crate::artifact::ProcSignature {
                params: vec![("a".into(), ParamKind::Ref)],
                exported: true,
            },
        );

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert!(matches!(intent, Intent::Move { .. }));
        assert_eq!(o.ip, vec![7, 0]);
    }

    #[test]
    fn die_marks_organism_dead() {
        let mut world = world_2d();
        let artifact = empty_artifact();
        let mut o = organism_at(vec![0, 0], vec![1, 0]);
        place_opcode(&mut world, &[0, 0], Opcode::Die);

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert!(matches!(intent, Intent::Die));
        assert!(o.is_dead);
    }

    #[test]
    fn div_by_zero_fails_instruction_without_panicking() {
        let mut world = world_2d();
        let artifact = empty_artifact();
        let mut o = organism_at(vec![0, 0], vec![1, 0]);
        place_opcode(&mut world, &[0, 0], Opcode::DivI);
        world.set(&[1, 0], pack(MoleculeType::Code, 0), None);
        world.set(&[2, 0], pack(MoleculeType::Data, 0), None);

        let intent = step(&mut o, &world, &artifact, &ISA);
        assert!(matches!(intent, Intent::NoEffect));
        assert!(o.instruction_failed);
        assert!(o.failure_reason.is_some());
    }
}
