// Program artifact (C9): the immutable, self-contained bundle produced by
// the assembler (§3 "Program artifact", §4.8). Given this plus
// `EnvironmentProperties`, the runtime can instantiate the world and
// organisms without re-reading source.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::debug::{SourceMap, SourcePos, TokenMap};
use crate::world::Coord;

pub type ProgramId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Ref,
    Val,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcSignature {
    pub params: Vec<(String, ParamKind)>,
    pub exported: bool,
}

/// Every source line of every file that contributed to this artifact,
/// keyed by file name, used by tooling (§4.9) and by diagnostics that
/// need to re-render a line after the fact.
pub type SourceFiles = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramArtifact {
    pub program_id: ProgramId,
    pub dims: usize,

    pub source_files: SourceFiles,

    pub linear_to_coord: Vec<Coord>,
    pub coord_to_linear: HashMap<Coord, usize>,

    pub machine_code_layout: HashMap<Coord, crate::molecule::Word>,
    pub initial_world_objects: HashMap<Coord, crate::molecule::Word>,

    pub label_address_to_name: HashMap<usize, String>,
    pub register_alias_map: HashMap<String, usize>,

    pub proc_name_to_params: HashMap<String, ProcSignature>,
    /// Per CALL-site linear address, the ordered REF register ids bound
    /// at that call (§3 "binding vector", §4.7 "Link").
    pub call_site_bindings: HashMap<usize, Vec<usize>>,
    /// Per CALL-site linear address, the name of the proc it calls. Used
    /// to size a CALL's on-grid length from the proc's full parameter
    /// count (REF and VAL alike) — `call_site_bindings` alone can't do
    /// this since it only carries REF ids and is absent for VAL-only
    /// calls.
    pub call_site_procs: HashMap<usize, String>,

    pub source_map: SourceMap,
    pub token_map: Option<TokenMap>,
}

impl ProgramArtifact {
    /// Invariant check (§3): every coord in `machine_code_layout` has a
    /// `sourceMap` entry, `linear_to_coord`/`coord_to_linear` agree, and
    /// `callSiteBindings` exists iff the CALL at that address has at
    /// least one REF parameter.
    pub fn validate(&self) -> Result<(), crate::error::ArtifactError> {
        for coord in self.machine_code_layout.keys() {
            let linear = self
                .coord_to_linear
                .get(coord)
                .ok_or_else(|| crate::error::ArtifactError::Malformed(format!(
                    "code cell {:?} has no linear address", coord
                )))?;
            if !self.source_map.contains_key(linear) {
                return Err(crate::error::ArtifactError::Malformed(format!(
                    "code cell {:?} (addr {}) missing source map entry", coord, linear
                )));
            }
        }
        for (linear, coord) in self.linear_to_coord.iter().enumerate() {
            if self.coord_to_linear.get(coord) != Some(&linear) {
                return Err(crate::error::ArtifactError::Malformed(
                    "linear_to_coord/coord_to_linear disagree".into(),
                ));
            }
        }
        for linear in self.call_site_bindings.keys() {
            if !self.call_site_procs.contains_key(linear) {
                return Err(crate::error::ArtifactError::Malformed(format!(
                    "callSiteBindings entry at {} names no CALL site", linear
                )));
            }
        }
        for (linear, proc_name) in &self.call_site_procs {
            let sig = self.proc_name_to_params.get(proc_name).ok_or_else(|| {
                crate::error::ArtifactError::Malformed(format!(
                    "call site at {} calls undefined proc `{}`", linear, proc_name
                ))
            })?;
            let has_ref = sig.params.iter().any(|(_, kind)| *kind == ParamKind::Ref);
            if has_ref != self.call_site_bindings.contains_key(linear) {
                return Err(crate::error::ArtifactError::Malformed(format!(
                    "callSiteBindings at {} disagrees with `{}`'s REF parameters", linear, proc_name
                )));
            }
        }
        Ok(())
    }

    pub fn source_pos(&self, linear_addr: usize) -> Option<&SourcePos> {
        self.source_map.get(&linear_addr)
    }

    /// Recommended binary encoding (§6 "Recommended: a length-prefixed
    /// binary form with explicit versioning"). We use `bincode` for the
    /// payload and prefix it with a format version so that future
    /// incompatible layouts can be rejected cleanly rather than silently
    /// misread.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::error::ArtifactError> {
        const VERSION: u32 = 1;
        let mut out = VERSION.to_le_bytes().to_vec();
        let payload = bincode::serialize(self)
            .map_err(|e| crate::error::ArtifactError::Malformed(e.to_string()))?;
        out.extend(payload);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ProgramArtifact, crate::error::ArtifactError> {
        const VERSION: u32 = 1;
        if bytes.len() < 4 {
            return Err(crate::error::ArtifactError::Malformed("truncated artifact".into()));
        }
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version != VERSION {
            return Err(crate::error::ArtifactError::Incompatible(format!(
                "artifact version {} unsupported (expected {})", version, VERSION
            )));
        }
        bincode::deserialize(&bytes[4..])
            .map_err(|e| crate::error::ArtifactError::Malformed(e.to_string()))
    }
}

/// Environment needed to instantiate a world/roster from an artifact
/// (§4.8). Loading this from a file or CLI flags is the host's job; the
/// core only defines and consumes it (§1 non-goals: "config loaders").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentProperties {
    pub shape: Vec<i64>,
    pub toroidal: bool,
    pub seed: u64,
    pub checkpoint_pause_ticks: Vec<u64>,
    pub data_stack_depth: usize,
    pub location_stack_depth: usize,
    pub call_stack_depth: usize,
    pub dr_count: usize,
    pub pr_count: usize,
    pub fpr_count: usize,
    pub lr_count: usize,
}

impl Default for EnvironmentProperties {
    fn default() -> Self {
        use crate::organism::{
            DEFAULT_CALL_STACK_DEPTH, DEFAULT_DATA_STACK_DEPTH, DEFAULT_DR_COUNT,
            DEFAULT_FPR_COUNT, DEFAULT_LOCATION_STACK_DEPTH, DEFAULT_LR_COUNT, DEFAULT_PR_COUNT,
        };
        EnvironmentProperties {
            shape: vec![100, 100],
            toroidal: true,
            seed: 0,
            checkpoint_pause_ticks: Vec::new(),
            data_stack_depth: DEFAULT_DATA_STACK_DEPTH,
            location_stack_depth: DEFAULT_LOCATION_STACK_DEPTH,
            call_stack_depth: DEFAULT_CALL_STACK_DEPTH,
            dr_count: DEFAULT_DR_COUNT,
            pr_count: DEFAULT_PR_COUNT,
            fpr_count: DEFAULT_FPR_COUNT,
            lr_count: DEFAULT_LR_COUNT,
        }
    }
}

/// A placement directive: "put an organism running this program at this
/// position facing this direction" (§3 "boot-time placements").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub program_id: ProgramId,
    pub position: Coord,
    pub direction: Vec<i64>,
    pub initial_energy: i64,
}
