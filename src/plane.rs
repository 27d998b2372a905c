// Copyright 2025 The Axvisor Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use axerrno::{ax_err, AxResult};
use spin::Mutex;

use crate::cell::{Cell, CellConfig, CellId, CpuSet, MAX_CELLS, ROOT_CELL};
use crate::hal::AxCellHal;
use crate::pcpu::{PhysicalCpu, MAX_CPUS};
use crate::power::PowerCoordinator;

/// A slot of the cell arena.
pub(crate) enum CellSlot {
    Free,
    /// Taken by a cell under construction. Invisible to lookups.
    Reserved,
    Live(Cell),
}

/// The architecture control plane of the hypervisor.
///
/// Owns the collaborator bundle, one slot per physical CPU and the cell arena. A single
/// instance is shared by all CPUs; every method is `&self`.
///
/// Once [`ControlPlane::reset`] has been issued for any CPU the instance must not move: the
/// reset entry finds it again through the per-CPU slot.
pub struct ControlPlane<H: AxCellHal> {
    pub(crate) hal: H,
    pub(crate) cpus: [PhysicalCpu; MAX_CPUS],
    /// CPUs present in the system. Fixed after boot.
    present: CpuSet,
    pub(crate) cells: Mutex<[CellSlot; MAX_CELLS]>,
    /// Serializes cell create and destroy.
    pub(crate) mgmt_lock: Mutex<()>,
}

impl<H: AxCellHal> ControlPlane<H> {
    /// Create the control plane with the root cell described by `root`.
    ///
    /// The root cell initially owns every present CPU, each with its physical id as virtual id.
    pub fn new(hal: H, root: &CellConfig) -> AxResult<Self> {
        if root.cpu_set.is_empty() {
            return ax_err!(InvalidInput, "root cell without CPUs");
        }
        let mut root_cell = Cell::new(ROOT_CELL, root)?;
        root_cell.set_last_virt_id(root.cpu_set.iter().last().unwrap_or(0));

        let mut cells = core::array::from_fn(|_| CellSlot::Free);
        cells[ROOT_CELL] = CellSlot::Live(root_cell);

        Ok(Self {
            hal,
            cpus: core::array::from_fn(PhysicalCpu::new),
            present: root.cpu_set,
            cells: Mutex::new(cells),
            mgmt_lock: Mutex::new(()),
        })
    }

    /// Get the collaborator bundle.
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Get the CPUs present in the system.
    pub fn present_cpus(&self) -> CpuSet {
        self.present
    }

    /// Get the slot of a present CPU.
    pub fn cpu(&self, cpu_id: usize) -> Option<&PhysicalCpu> {
        if self.present.contains(cpu_id) {
            Some(&self.cpus[cpu_id])
        } else {
            None
        }
    }

    pub(crate) fn pcpu(&self, cpu_id: usize) -> AxResult<&PhysicalCpu> {
        match self.cpu(cpu_id) {
            Some(cpu) => Ok(cpu),
            None => ax_err!(InvalidInput, "no such CPU"),
        }
    }

    /// Get a copy of a live cell.
    pub fn cell(&self, id: CellId) -> Option<Cell> {
        self.with_cell(id, Cell::clone).ok()
    }

    /// Run `f` on a live cell while holding the arena lock.
    pub(crate) fn with_cell<R>(&self, id: CellId, f: impl FnOnce(&Cell) -> R) -> AxResult<R> {
        match self.cells.lock().get(id) {
            Some(CellSlot::Live(cell)) => Ok(f(cell)),
            _ => ax_err!(NotFound, "no such cell"),
        }
    }

    /// Ids of all live cells, root cell first.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> {
        let cells = self.cells.lock();
        let mut live = [false; MAX_CELLS];
        for (id, slot) in cells.iter().enumerate() {
            live[id] = matches!(slot, CellSlot::Live(_));
        }
        (0..MAX_CELLS).filter(move |&id| live[id])
    }

    pub(crate) fn power(&self) -> PowerCoordinator<'_, H::Power> {
        PowerCoordinator::new(self.hal.power())
    }
}
