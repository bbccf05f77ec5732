// Whole-pipeline scenarios: source text -> `asm::compile` -> `ProgramArtifact`
// -> `Scheduler`. Unit tests elsewhere exercise individual opcodes and tick
// phases directly against a `World`; these exist to check that the
// assembler and scheduler agree once wired together end to end.

use std::cell::RefCell;
use std::rc::Rc;

use evochora_core::artifact::{EnvironmentProperties, Placement};
use evochora_core::asm::{self, preprocess::SourceSet};
use evochora_core::error::SchedulerStatus;
use evochora_core::molecule::{self, MoleculeType};
use evochora_core::scheduler::{RawTickState, Scheduler, TickSink};

fn env(shape: Vec<i64>) -> EnvironmentProperties {
    EnvironmentProperties { shape, toroidal: true, ..EnvironmentProperties::default() }
}

fn load(src: &str, dims: usize, shape: Vec<i64>) -> Scheduler {
    let mut sources = SourceSet::new();
    sources.insert("t.asm".into(), src);
    let artifact = asm::compile("p", "t.asm", &sources, dims).expect("compiles");
    Scheduler::load_artifact(artifact, env(shape)).expect("loads")
}

fn placement(position: Vec<i64>, direction: Vec<i64>) -> Placement {
    Placement { program_id: "p".into(), position, direction, initial_energy: 0 }
}

#[test]
fn nop_loop_leaves_world_and_energy_untouched() {
    let mut sched = load("NOP\nNOP\nNOP\n", 2, vec![10, 10]);
    sched.place(&[placement(vec![0, 0], vec![1, 0])]);
    sched.start();
    sched.step(3);

    let o = &sched.organisms()[0];
    assert_eq!(o.ip, vec![3, 0]);
    assert_eq!(o.er, 0);
    assert_eq!(sched.world().non_empty_cells().len(), 3);
}

#[test]
fn seek_wraps_around_toroidal_edge() {
    let mut sched = load(".ORG 4|0\nSEEK 1|0\n", 2, vec![5, 5]);
    sched.place(&[placement(vec![4, 0], vec![1, 0])]);
    sched.start();
    sched.step(1);

    assert_eq!(sched.organisms()[0].ip, vec![0, 0]);
}

#[test]
fn peek_consumes_energy_cell() {
    let mut sched = load(".PLACE ENERGY:100 5|0\nPEEK %DR0 5|0\n", 2, vec![10, 10]);
    sched.place(&[placement(vec![0, 0], vec![1, 0])]);
    sched.start();
    sched.step(1);

    let o = &sched.organisms()[0];
    assert_eq!(o.er, 100);
    assert_eq!(o.drs()[0], molecule::pack(MoleculeType::Energy, 100));
    assert!(sched.world().is_empty(&[5, 0]));
}

#[test]
fn conflicting_writes_resolve_to_lowest_organism_id() {
    struct Capture(Rc<RefCell<Vec<(u64, SchedulerStatus)>>>);
    impl TickSink for Capture {
        fn emit(&mut self, state: &RawTickState) {
            *self.0.borrow_mut() = state.statuses.clone();
        }
    }

    let statuses = Rc::new(RefCell::new(Vec::new()));
    let mut sched = load("SETI %DR0 DATA:1\nPOKE %DR0 2|2\n", 2, vec![10, 10]);
    sched.set_sink(Some(Box::new(Capture(statuses.clone()))));
    sched.place(&[placement(vec![0, 0], vec![1, 0]), placement(vec![0, 0], vec![1, 0])]);
    sched.start();
    sched.step(2);

    let cell = sched.world().get(&[5, 2]);
    assert_eq!(cell.molecule, molecule::pack(MoleculeType::Data, 1));
    assert_eq!(cell.owner, Some(0));

    let last_tick = statuses.borrow();
    assert!(last_tick.contains(&(0, SchedulerStatus::WonExecution)));
    assert!(last_tick.contains(&(1, SchedulerStatus::LostLowerIdWon)));
}

#[test]
fn call_ref_binding_is_visible_in_caller_after_return() {
    let src = "\
SETI %DR3 DATA:0
CALL P %DR3
NOP
.PROC P REF A
SETI A DATA:7
RET
.ENDP
";
    let mut sched = load(src, 2, vec![20, 20]);
    sched.place(&[placement(vec![0, 0], vec![1, 0])]);
    sched.start();
    sched.step(4);

    let o = &sched.organisms()[0];
    assert_eq!(o.drs()[3], molecule::pack(MoleculeType::Data, 7));
    assert!(o.call_stack.is_empty());
    assert_eq!(o.ip, vec![7, 0]);
}

#[test]
fn predicate_skip_never_lands_on_the_skipped_branch() {
    let src = "\
SETI %DR0 DATA:5
IFI %DR0 DATA:5
JMPI FAIL
JMPI OK
FAIL:
NOP
OK:
NOP
";
    let mut sched = load(src, 2, vec![20, 20]);
    sched.place(&[placement(vec![0, 0], vec![1, 0])]);
    sched.start();
    sched.step(3);

    assert_eq!(sched.organisms()[0].ip, vec![13, 0]);
}
