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

use crate::cell::{Cell, CellConfig, CellId, CpuSet, ROOT_CELL};
use crate::exit::GuestPhysAddr;
use crate::hal::{AddrTranslation, AxCellHal, IrqChip, PowerBridge};
use crate::pcpu::CpuState;
use crate::plane::{CellSlot, ControlPlane};

impl<H: AxCellHal> ControlPlane<H> {
    /// Set up the translation and interrupt contexts of the root cell.
    pub fn init_root(&self) -> AxResult {
        let root = self.with_cell(ROOT_CELL, Cell::clone)?;
        let paging = self.hal.paging();

        paging.cell_init(&root)?;
        if let Err(err) = self.hal.irqchip().cell_init(&root) {
            paging.cell_destroy(&root);
            return Err(err);
        }
        self.hal.power().register_cell(&root);
        Ok(())
    }

    /// Create a cell from CPUs of the root cell, called on root CPU `this_cpu`.
    ///
    /// The CPUs of the new cell are parked once this returns; [`ControlPlane::start_cell`]
    /// lets them run. On error nothing of the cell remains and its CPUs are back in the root
    /// cell. A CPU that never stopped is left `Stopping`; a later [`ControlPlane::suspend`]
    /// picks it up again once the firmware reports it idle.
    pub fn create_cell(&self, config: &CellConfig, this_cpu: usize) -> AxResult<CellId> {
        let _guard = self.mgmt_lock.lock();

        let cpu_set = config.cpu_set;
        let root_set = self.with_cell(ROOT_CELL, Cell::cpu_set)?;
        if cpu_set.is_empty() || !cpu_set.is_subset(&root_set) || cpu_set.contains(this_cpu) {
            return ax_err!(InvalidInput, "CPUs of a new cell must be taken from the root cell");
        }

        let id = self.reserve_cell_slot()?;
        let mut cell = match Cell::new(id, config) {
            Ok(cell) => cell,
            Err(err) => {
                self.release_cell_slot(id);
                return Err(err);
            }
        };

        if let Err(err) = self.suspend_cpus(cpu_set) {
            self.resume_cpus(cpu_set);
            self.release_cell_slot(id);
            return Err(err);
        }

        // Out of the root cell before their virtual ids change.
        self.update_root_cpus(cpu_set, CpuSet::remove);
        if let Err(err) = self.arch_cell_create(&mut cell) {
            self.update_root_cpus(cpu_set, CpuSet::insert);
            self.resume_cpus(cpu_set);
            self.release_cell_slot(id);
            return Err(err);
        }

        for cpu in cpu_set.iter() {
            // Failures are logged by `park`. A CPU left `Stopped` is still accepted by `reset`.
            let _ = self.park(cpu);
        }

        {
            let mut cells = self.cells.lock();
            for cpu in cpu_set.iter() {
                let pcpu = &self.cpus[cpu];
                pcpu.set_cell(id);
                pcpu.clear_stats();
            }
            cells[id] = CellSlot::Live(cell);
        }

        // The root cell lost the memory of the new cell.
        self.flush_cell_vcpu_caches(ROOT_CELL, this_cpu)?;

        info!("Created cell {} with CPUs {:?}", id, cpu_set);
        Ok(id)
    }

    /// Let the CPUs of a created cell enter its reset routine and wait for entry addresses.
    pub fn start_cell(&self, id: CellId) -> AxResult {
        let cpu_set = self.with_cell(id, Cell::cpu_set)?;
        let mut result = Ok(());
        for cpu in cpu_set.iter() {
            if let Err(err) = self.reset(cpu) {
                result = result.and(Err(err));
            }
        }
        result
    }

    /// Destroy a cell and hand its CPUs back to the root cell, called on root CPU `this_cpu`.
    pub fn destroy_cell(&self, id: CellId, this_cpu: usize) -> AxResult {
        if id == ROOT_CELL {
            return ax_err!(InvalidInput, "the root cell cannot be destroyed");
        }
        let _guard = self.mgmt_lock.lock();

        let cell = self.with_cell(id, Cell::clone)?;
        let cpu_set = cell.cpu_set();
        if cpu_set.contains(this_cpu) {
            return ax_err!(InvalidInput, "a cell cannot destroy itself");
        }

        for cpu in cpu_set.iter() {
            // Failures are logged; the reset below refuses CPUs that did not stop.
            if self.suspend(cpu).is_ok() {
                let _ = self.park(cpu);
            }
        }

        // Hidden from lookups while its CPUs change identity.
        self.cells.lock()[id] = CellSlot::Reserved;
        self.arch_cell_destroy(&cell);

        self.update_root_cpus(cpu_set, CpuSet::insert);
        self.release_cell_slot(id);

        // The root cell got the memory of the cell back.
        self.flush_cell_vcpu_caches(ROOT_CELL, this_cpu)?;

        info!("Destroyed cell {}", id);
        Ok(())
    }

    /// Invalidate the data caches of a cell whose image changes without a teardown.
    pub fn reset_cell(&self, id: CellId) -> AxResult {
        let cell = self.with_cell(id, Cell::clone)?;
        self.invalidate_cell_dcaches(&cell);
        Ok(())
    }

    /// Find the physical CPU of `cell` that has virtual id `virt_id`.
    ///
    /// `NotFound` must be treated as an error by the caller, never as a CPU id.
    pub fn virt_to_phys(&self, cell: CellId, virt_id: usize) -> AxResult<usize> {
        let cpu_set = self.with_cell(cell, Cell::cpu_set)?;
        match cpu_set.iter().find(|&cpu| self.cpus[cpu].virt_id() == virt_id) {
            Some(cpu) => Ok(cpu),
            None => ax_err!(NotFound, "no CPU with this virtual id"),
        }
    }

    /// Driver side of a PSCI CPU_ON: let the CPU with `virt_id` in `cell` start at `entry`.
    ///
    /// A parked CPU has not been started by [`ControlPlane::start_cell`] yet and is refused:
    /// its reset drops any entry posted before it.
    pub fn cpu_on_request(&self, cell: CellId, virt_id: usize, entry: GuestPhysAddr) -> AxResult {
        let cpu = &self.cpus[self.virt_to_phys(cell, virt_id)?];
        match cpu.state() {
            CpuState::Running => ax_err!(AlreadyExists, "CPU is already on"),
            CpuState::Parked => ax_err!(BadState, "CPU of a cell that was not started"),
            _ => {
                cpu.post_entry(entry);
                Ok(())
            }
        }
    }

    /// Destroy every non-root cell, called on root CPU `this_cpu`.
    pub fn shutdown(&self, this_cpu: usize) -> AxResult {
        let mut result = Ok(());
        for id in self.cell_ids().filter(|&id| id != ROOT_CELL) {
            if let Err(err) = self.destroy_cell(id, this_cpu) {
                result = result.and(Err(err));
            }
        }
        info!("Shut down, all CPUs are back in the root cell");
        result
    }

    fn arch_cell_create(&self, cell: &mut Cell) -> AxResult {
        let paging = self.hal.paging();
        paging.cell_init(cell)?;

        // Virtual ids follow the position of each CPU in the set.
        let mut virt_id = 0;
        for cpu in cell.cpu_set().iter() {
            self.cpus[cpu].set_virt_id(virt_id);
            virt_id += 1;
        }
        cell.set_last_virt_id(virt_id - 1);

        if let Err(err) = self.hal.irqchip().cell_init(cell) {
            for cpu in cell.cpu_set().iter() {
                self.cpus[cpu].set_virt_id(cpu);
            }
            paging.cell_destroy(cell);
            return Err(err);
        }

        self.hal.power().register_cell(cell);
        Ok(())
    }

    fn arch_cell_destroy(&self, cell: &Cell) {
        self.invalidate_cell_dcaches(cell);

        for cpu in cell.cpu_set().iter() {
            let pcpu = &self.cpus[cpu];
            // Back to the identity of the root cell.
            pcpu.set_virt_id(cpu);
            pcpu.set_cell(ROOT_CELL);
            let _ = self.reset(cpu);
        }

        self.hal.irqchip().cell_exit(cell);
        self.hal.paging().cell_destroy(cell);
    }

    fn suspend_cpus(&self, cpu_set: CpuSet) -> AxResult {
        for cpu in cpu_set.iter() {
            self.suspend(cpu)?;
        }
        Ok(())
    }

    fn resume_cpus(&self, cpu_set: CpuSet) {
        for cpu in cpu_set.iter() {
            if self.cpus[cpu].state() == CpuState::Stopping {
                error!("CPU{} did not stop and is left stopping", cpu);
                continue;
            }
            self.resume(cpu);
        }
    }

    fn update_root_cpus(&self, cpu_set: CpuSet, op: fn(&mut CpuSet, usize)) {
        if let CellSlot::Live(root) = &mut self.cells.lock()[ROOT_CELL] {
            for cpu in cpu_set.iter() {
                op(root.cpu_set_mut(), cpu);
            }
        }
    }

    fn reserve_cell_slot(&self) -> AxResult<CellId> {
        let mut cells = self.cells.lock();
        match cells.iter().position(|slot| matches!(slot, CellSlot::Free)) {
            Some(id) => {
                cells[id] = CellSlot::Reserved;
                Ok(id)
            }
            None => ax_err!(NoMemory, "no free cell slot"),
        }
    }

    fn release_cell_slot(&self, id: CellId) {
        self.cells.lock()[id] = CellSlot::Free;
    }
}
