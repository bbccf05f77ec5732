// Tick scheduler (C6): plan -> resolve -> commit -> birth -> advance
// (§4.5), plus the control surface a host drives it with (§6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::artifact::{EnvironmentProperties, Placement, ProgramArtifact};
use crate::error::{ArtifactError, SchedulerStatus};
use crate::isa::{Isa, ISA};
use crate::molecule;
use crate::organism::{FailureReason, Organism, RegisterCounts, StackLimits};
use crate::vm::{self, Intent};
use crate::world::{Coord, OrganismId, World};

/// One committed call frame, flattened for emission (§6 `callStack[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCallFrame {
    pub absolute_return_ip: Coord,
    pub saved_dv: Option<Vec<i64>>,
    pub bindings: Vec<Option<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOrganismState {
    pub id: OrganismId,
    pub parent_id: Option<OrganismId>,
    pub birth_tick: u64,
    pub program_id: String,
    pub initial_position: Coord,
    pub ip: Coord,
    pub dv: Vec<i64>,
    pub dps: Vec<Coord>,
    pub active_dp_index: usize,
    pub er: i64,
    pub drs: Vec<molecule::Word>,
    pub prs: Vec<molecule::Word>,
    pub fprs: Vec<molecule::Word>,
    pub lrs: Vec<Coord>,
    pub data_stack: Vec<molecule::Word>,
    pub location_stack: Vec<Coord>,
    pub call_stack: Vec<RawCallFrame>,
    pub is_dead: bool,
    pub instruction_failed: bool,
    pub failure_reason: Option<FailureReason>,
    pub skip_ip_advance: bool,
    pub ip_before_fetch: Coord,
    pub dv_before_fetch: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCell {
    pub coord: Coord,
    pub owner: Option<OrganismId>,
    pub molecule_type: String,
    pub value: i32,
}

/// Per-tick emission record (§6). `cells` covers every non-empty cell.
/// `statuses` supplements §6's listed fields with the per-instruction
/// scheduler verdict §4.5 step 3 says must be emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTickState {
    pub tick_number: u64,
    pub cells: Vec<RawCell>,
    pub organisms: Vec<RawOrganismState>,
    pub statuses: Vec<(OrganismId, SchedulerStatus)>,
}

/// A host-provided sink for per-tick state (§6 "the sink may be null").
pub trait TickSink {
    fn emit(&mut self, state: &RawTickState);
}

fn raw_organism_state(o: &Organism) -> RawOrganismState {
    RawOrganismState {
        id: o.id,
        parent_id: o.parent_id,
        birth_tick: o.birth_tick,
        program_id: o.program_id.clone(),
        initial_position: o.initial_position.clone(),
        ip: o.ip.clone(),
        dv: o.dv.clone(),
        dps: o.dps.clone(),
        active_dp_index: o.active_dp_index,
        er: o.er,
        drs: o.drs().to_vec(),
        prs: o.prs().to_vec(),
        fprs: o.fprs(),
        lrs: o.lrs().to_vec(),
        data_stack: o.data_stack.clone(),
        location_stack: o.location_stack.clone(),
        call_stack: o
            .call_stack
            .iter()
            .map(|f| RawCallFrame {
                absolute_return_ip: f.absolute_return_ip.clone(),
                saved_dv: f.saved_dv.clone(),
                bindings: f.binding_vector.iter().map(|b| b.map(|r| r.encode())).collect(),
            })
            .collect(),
        is_dead: o.is_dead,
        instruction_failed: o.instruction_failed,
        failure_reason: o.failure_reason,
        skip_ip_advance: o.skip_ip_advance,
        ip_before_fetch: o.ip_before_fetch.clone(),
        dv_before_fetch: o.dv_before_fetch.clone(),
    }
}

fn raw_tick_state(
    tick: u64,
    world: &World,
    organisms: &[Organism],
    statuses: Vec<(OrganismId, SchedulerStatus)>,
) -> RawTickState {
    let cells = world
        .non_empty_cells()
        .into_iter()
        .map(|(coord, cell)| {
            let (ty, value) = molecule::unpack(cell.molecule);
            RawCell { coord, owner: cell.owner, molecule_type: ty.to_string(), value }
        })
        .collect();
    RawTickState {
        tick_number: tick,
        cells,
        organisms: organisms.iter().map(raw_organism_state).collect(),
        statuses,
    }
}

struct Planned {
    organism_id: OrganismId,
    intent: Intent,
}

/// Owns the world and organism roster; drives the tick pipeline and
/// exposes the control surface a host embeds (§5, §6).
pub struct Scheduler {
    world: World,
    organisms: Vec<Organism>,
    artifact: ProgramArtifact,
    isa: &'static Isa,
    counts: RegisterCounts,
    limits: StackLimits,
    next_id: OrganismId,
    tick: u64,
    running: bool,
    paused: bool,
    checkpoint_pause_ticks: Vec<u64>,
    sink: Option<Box<dyn TickSink>>,
}

impl Scheduler {
    /// `loadArtifact` (§6): instantiate the world from the artifact's
    /// code layout and initial objects, validating the artifact first.
    pub fn load_artifact(
        artifact: ProgramArtifact,
        env: EnvironmentProperties,
    ) -> Result<Scheduler, ArtifactError> {
        artifact.validate()?;
        if env.shape.len() != artifact.dims {
            return Err(ArtifactError::Incompatible(format!(
                "environment shape has {} dims, artifact expects {}",
                env.shape.len(),
                artifact.dims
            )));
        }

        let mut world = World::new(env.shape.clone(), env.toroidal);
        for (coord, word) in &artifact.machine_code_layout {
            world.set(coord, *word, None);
        }
        for (coord, word) in &artifact.initial_world_objects {
            world.set(coord, *word, None);
        }

        let counts = RegisterCounts {
            dr: env.dr_count,
            pr: env.pr_count,
            fpr: env.fpr_count,
            lr: env.lr_count,
        };
        let limits = StackLimits {
            data: env.data_stack_depth,
            location: env.location_stack_depth,
            call: env.call_stack_depth,
        };

        Ok(Scheduler {
            world,
            organisms: Vec::new(),
            artifact,
            counts,
            limits,
            isa: &*ISA,
            next_id: 0,
            tick: 0,
            running: false,
            paused: false,
            checkpoint_pause_ticks: env.checkpoint_pause_ticks.clone(),
            sink: None,
        })
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn TickSink>>) {
        self.sink = sink;
    }

    /// `place` (§6): instantiate organisms from boot-time placements.
    /// Ids are assigned from the monotonically increasing counter; they
    /// are never reused even if the organism later dies (§3).
    pub fn place(&mut self, placements: &[Placement]) {
        for p in placements {
            let organism = Organism::new(
                self.next_id,
                None,
                self.tick,
                p.program_id.clone(),
                p.position.clone(),
                p.direction.clone(),
                p.initial_energy,
                &self.counts,
                self.limits,
            );
            self.next_id += 1;
            self.organisms.push(organism);
        }
    }

    pub fn start(&mut self) {
        self.running = true;
        self.paused = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn shutdown(&mut self) {
        self.running = false;
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_checkpoint_pause_ticks(&mut self, ticks: Vec<u64>) {
        self.checkpoint_pause_ticks = ticks;
    }

    /// Advance up to `n` ticks, stopping early if paused/shutdown or a
    /// checkpoint tick is reached (§5 "suspension point").
    pub fn step(&mut self, n: u64) {
        for _ in 0..n {
            if !self.running || self.paused {
                break;
            }
            self.tick_once();
            if self.checkpoint_pause_ticks.contains(&self.tick) {
                self.paused = true;
            }
        }
    }

    fn tick_once(&mut self) {
        let living_ids: Vec<usize> =
            self.organisms.iter().enumerate().filter(|(_, o)| !o.is_dead).map(|(i, _)| i).collect();
        let living_count = living_ids.len();

        // Plan phase (§4.5 step 1): ascending id order.
        let mut planned = Vec::with_capacity(living_ids.len());
        for &idx in &living_ids {
            let organism = &mut self.organisms[idx];
            let intent = vm::step(organism, &self.world, &self.artifact, self.isa);
            planned.push(Planned { organism_id: organism.id, intent });
        }

        // Conflict resolution (§4.5 step 2).
        let mut groups: HashMap<Coord, Vec<usize>> = HashMap::new();
        for (i, p) in planned.iter().enumerate() {
            if let Some(coord) = p.intent.world_target() {
                if !p.intent.is_unresolved() {
                    groups.entry(coord.clone()).or_default().push(i);
                }
            }
        }

        let mut status = vec![SchedulerStatus::NotApplicable; planned.len()];
        let mut winners: Vec<usize> = Vec::new();

        for (_, idxs) in groups {
            if idxs.len() == 1 {
                status[idxs[0]] = SchedulerStatus::WonExecution;
                winners.push(idxs[0]);
            } else {
                let winner = *idxs
                    .iter()
                    .min_by_key(|&&i| planned[i].organism_id)
                    .expect("group is non-empty");
                for &i in &idxs {
                    status[i] = if i == winner {
                        SchedulerStatus::WonExecution
                    } else {
                        SchedulerStatus::LostLowerIdWon
                    };
                }
                winners.push(winner);
            }
        }

        for (i, p) in planned.iter().enumerate() {
            if p.intent.is_unresolved() {
                if living_count == 1 {
                    status[i] = SchedulerStatus::WonExecution;
                    winners.push(i);
                } else {
                    status[i] = SchedulerStatus::LostOtherReason;
                }
            }
        }

        winners.sort_by_key(|&i| planned[i].organism_id);

        // Commit phase (§4.5 step 3): ascending organism-id order.
        for i in winners {
            let p = &planned[i];
            match &p.intent {
                Intent::WorldWrite { coord, molecule } | Intent::WorldWriteUnresolved { coord, molecule } => {
                    self.world.set(coord, *molecule, Some(p.organism_id));
                    trace!(tick = self.tick, organism = p.organism_id, ?coord, "committed world write");
                }
                other => {
                    warn!(?other, "winner intent carried no world target");
                }
            }
        }

        // Birth phase (§4.5 step 4): deterministic order by parent id.
        let mut newborns = Vec::new();
        for p in &planned {
            if let Intent::Spawn { child } = &p.intent {
                let id = self.next_id;
                self.next_id += 1;
                let organism = Organism::new(
                    id,
                    Some(child.parent_id),
                    self.tick + 1,
                    child.program_id.clone(),
                    child.position.clone(),
                    child.direction.clone(),
                    child.initial_energy,
                    &self.counts,
                    self.limits,
                );
                debug!(tick = self.tick, parent = child.parent_id, child = id, "organism spawned");
                newborns.push(organism);
            }
        }
        self.organisms.extend(newborns);

        if let Some(sink) = self.sink.as_mut() {
            let statuses: Vec<(OrganismId, SchedulerStatus)> = planned
                .iter()
                .zip(status.iter())
                .map(|(p, s)| (p.organism_id, *s))
                .collect();
            let snapshot = raw_tick_state(self.tick, &self.world, &self.organisms, statuses);
            sink.emit(&snapshot);
        }

        // Clock advance (§4.5 step 5).
        self.tick += 1;
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn organisms(&self) -> &[Organism] {
        &self.organisms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Opcode, ISA};
    use crate::molecule::{pack, MoleculeType};
    use std::collections::HashMap as Map;

    fn place_opcode(world: &mut World, at: &Coord, op: Opcode) {
        let id = ISA.resolve_name(op.name()).unwrap();
        world.set(at, pack(MoleculeType::Code, id.0 as i32), None);
    }

    fn base_artifact(dims: usize) -> ProgramArtifact {
        ProgramArtifact {
            program_id: "p".into(),
            dims,
            source_files: Map::new(),
            linear_to_coord: vec![],
            coord_to_linear: Map::new(),
            machine_code_layout: Map::new(),
            initial_world_objects: Map::new(),
            label_address_to_name: Map::new(),
            register_alias_map: Map::new(),
            proc_name_to_params: Map::new(),
            call_site_bindings: Map::new(),
            call_site_procs: Map::new(),
            source_map: Map::new(),
            token_map: None,
        }
    }

    fn env(shape: Vec<i64>) -> EnvironmentProperties {
        EnvironmentProperties { shape, ..EnvironmentProperties::default() }
    }

    #[test]
    fn nop_loop_advances_ip_with_no_world_mutation() {
        let artifact = base_artifact(2);
        let mut sched = Scheduler::load_artifact(artifact, env(vec![10, 10])).unwrap();
        place_opcode(&mut sched.world, &[0, 0], Opcode::Nop);
        place_opcode(&mut sched.world, &[1, 0], Opcode::Nop);
        place_opcode(&mut sched.world, &[2, 0], Opcode::Nop);
        sched.place(&[Placement {
            program_id: "p".into(),
            position: vec![0, 0],
            direction: vec![1, 0],
            initial_energy: 0,
        }]);
        sched.start();
        sched.step(3);

        assert_eq!(sched.current_tick(), 3);
        let o = &sched.organisms()[0];
        assert_eq!(o.ip, vec![3, 0]);
        assert_eq!(o.er, 0);
    }

    #[test]
    fn conflicting_writes_resolve_to_lowest_id() {
        let artifact = base_artifact(2);
        let mut sched = Scheduler::load_artifact(artifact, env(vec![10, 10])).unwrap();

        // Organism 0 at (0,0): SETI %DR0 DATA:1; POKE %DR0 (-1|2) -> (2,2)
        place_opcode(&mut sched.world, &[0, 0], Opcode::Seti);
        sched.world.set(&[1, 0], pack(MoleculeType::Code, 0), None);
        sched.world.set(&[2, 0], pack(MoleculeType::Data, 1), None);
        place_opcode(&mut sched.world, &[3, 0], Opcode::Poke);
        sched.world.set(&[4, 0], pack(MoleculeType::Code, 0), None);
        sched.world.set(&[5, 0], pack(MoleculeType::Code, -1), None);
        sched.world.set(&[6, 0], pack(MoleculeType::Code, 2), None);

        // Organism 1 at (1,1): SETI %DR0 DATA:1; POKE %DR0 (-2|1) -> (2,2)
        place_opcode(&mut sched.world, &[1, 1], Opcode::Seti);
        sched.world.set(&[2, 1], pack(MoleculeType::Code, 0), None);
        sched.world.set(&[3, 1], pack(MoleculeType::Data, 1), None);
        place_opcode(&mut sched.world, &[4, 1], Opcode::Poke);
        sched.world.set(&[5, 1], pack(MoleculeType::Code, 0), None);
        sched.world.set(&[6, 1], pack(MoleculeType::Code, -2), None);
        sched.world.set(&[7, 1], pack(MoleculeType::Code, 1), None);

        sched.place(&[
            Placement { program_id: "p".into(), position: vec![0, 0], direction: vec![1, 0], initial_energy: 0 },
            Placement { program_id: "p".into(), position: vec![1, 1], direction: vec![1, 0], initial_energy: 0 },
        ]);
        sched.start();
        sched.step(2);

        let cell = sched.world().get(&[2, 2]);
        assert_eq!(cell.molecule, pack(MoleculeType::Data, 1));
        assert_eq!(cell.owner, Some(0));
    }

    #[test]
    fn checkpoint_pause_tick_stops_stepping() {
        let artifact = base_artifact(2);
        let mut sched = Scheduler::load_artifact(artifact, env(vec![10, 10])).unwrap();
        place_opcode(&mut sched.world, &[0, 0], Opcode::Nop);
        place_opcode(&mut sched.world, &[1, 0], Opcode::Nop);
        sched.place(&[Placement {
            program_id: "p".into(),
            position: vec![0, 0],
            direction: vec![1, 0],
            initial_energy: 0,
        }]);
        sched.set_checkpoint_pause_ticks(vec![1]);
        sched.start();
        sched.step(5);

        assert_eq!(sched.current_tick(), 1);
        assert!(sched.is_paused());
    }
}
