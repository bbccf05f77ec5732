// World: an n-dimensional toroidal grid of molecules plus weak owner tags.
//
// The world is a total function `position -> (molecule, ownerId?)`. It is
// sparse internally (only non-empty cells are stored) but behaves as if
// every coordinate were always addressable: reads of unset coordinates
// return the canonical empty molecule.

use std::collections::HashMap;

use crate::molecule::{self, Word};

/// A position in the n-dimensional grid. Dimensionality is fixed for the
/// lifetime of a `World` (it is `shape.len()`).
pub type Coord = Vec<i64>;

/// An organism id, as assigned by the scheduler (§3 "Organism").
pub type OrganismId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub molecule: Word,
    pub owner: Option<OrganismId>,
}

impl Default for Cell {
    fn default() -> Self {
        Cell { molecule: molecule::empty(), owner: None }
    }
}

/// The toroidal n-dimensional lattice. `shape[i]` is the size along axis
/// `i`; all axis sizes must be strictly positive.
#[derive(Debug, Clone)]
pub struct World {
    shape: Vec<i64>,
    toroidal: bool,
    cells: HashMap<Coord, Cell>,
}

impl World {
    /// Construct an empty world of the given shape. `toroidal` selects the
    /// wrap policy (§3); the core only ever ships with `toroidal = true`
    /// but the flag is threaded through so a host can assert it from
    /// `EnvironmentProperties` without the core silently ignoring it.
    pub fn new(shape: Vec<i64>, toroidal: bool) -> Self {
        assert!(!shape.is_empty(), "world must have at least one dimension");
        assert!(shape.iter().all(|&s| s > 0), "every axis size must be positive");
        World { shape, toroidal, cells: HashMap::new() }
    }

    pub fn dims(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn is_toroidal(&self) -> bool {
        self.toroidal
    }

    /// Wrap a coordinate into range. Pure integer arithmetic, per §4.2.
    pub fn wrap(&self, p: &[i64]) -> Coord {
        assert_eq!(p.len(), self.shape.len(), "coordinate dimensionality mismatch");
        p.iter()
            .zip(&self.shape)
            .map(|(&c, &s)| ((c % s) + s) % s)
            .collect()
    }

    /// The neighbor of `p` along direction vector `dv`, wrapped.
    pub fn neighbor(&self, p: &[i64], dv: &[i64]) -> Coord {
        assert_eq!(dv.len(), self.shape.len(), "direction vector dimensionality mismatch");
        let stepped: Vec<i64> = p.iter().zip(dv).map(|(&c, &d)| c + d).collect();
        self.wrap(&stepped)
    }

    /// Read the cell at `p` (after wrapping).
    pub fn get(&self, p: &[i64]) -> Cell {
        let key = self.wrap(p);
        self.cells.get(&key).copied().unwrap_or_default()
    }

    pub fn is_empty(&self, p: &[i64]) -> bool {
        molecule::is_empty(self.get(p).molecule)
    }

    /// Write a molecule at `p` (after wrapping), recording the writing
    /// organism's id as a weak owner tag when the molecule is non-empty.
    /// Writing the empty molecule clears the owner tag as well.
    pub fn set(&mut self, p: &[i64], molecule: Word, owner: Option<OrganismId>) {
        let key = self.wrap(p);
        if molecule::is_empty(molecule) {
            self.cells.remove(&key);
        } else {
            self.cells.insert(key, Cell { molecule, owner });
        }
    }

    /// Iterate over every non-empty cell, in a deterministic order (sorted
    /// by coordinate) — used by the tick-state emitter (§6) so that
    /// `RawTickState::cells` is reproducible across runs.
    pub fn non_empty_cells(&self) -> Vec<(Coord, Cell)> {
        let mut out: Vec<(Coord, Cell)> = self.cells.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::MoleculeType;

    fn w() -> World {
        World::new(vec![5, 5], true)
    }

    #[test]
    fn wrap_stays_in_bounds() {
        let world = w();
        for p in [vec![-1, 0], vec![5, 5], vec![123, -999]] {
            let wrapped = world.wrap(&p);
            for (c, &s) in wrapped.iter().zip(world.shape()) {
                assert!(*c >= 0 && *c < s);
            }
        }
    }

    #[test]
    fn neighbor_full_loop_returns_to_origin() {
        let world = w();
        let mut p = vec![0i64, 0];
        for _ in 0..world.shape()[0] {
            p = world.neighbor(&p, &[1, 0]);
        }
        assert_eq!(p, vec![0, 0]);
    }

    #[test]
    fn set_then_get_round_trips_and_tags_owner() {
        let mut world = w();
        let word = molecule::pack(MoleculeType::Data, 7);
        world.set(&[2, 2], word, Some(3));
        let cell = world.get(&[2, 2]);
        assert_eq!(cell.molecule, word);
        assert_eq!(cell.owner, Some(3));
    }

    #[test]
    fn writing_empty_clears_cell() {
        let mut world = w();
        world.set(&[1, 1], molecule::pack(MoleculeType::Data, 1), Some(0));
        world.set(&[1, 1], molecule::empty(), None);
        assert!(world.is_empty(&[1, 1]));
        assert_eq!(world.non_empty_cells().len(), 0);
    }

    #[test]
    fn non_empty_cells_are_sorted() {
        let mut world = w();
        world.set(&[3, 0], molecule::pack(MoleculeType::Data, 1), None);
        world.set(&[1, 0], molecule::pack(MoleculeType::Data, 2), None);
        let cells = world.non_empty_cells();
        assert!(cells[0].0 < cells[1].0);
    }
}
