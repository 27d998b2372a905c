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

//! Cache and TLB maintenance across the CPUs of a cell.
//!
//! The TLBs of another CPU cannot be invalidated from here. The committing CPU flushes its own
//! and marks every other CPU of the cell; those flush on their next wake-up from the firmware
//! idle loop. A CPU that never suspends again keeps stale entries until it does.

use axerrno::AxResult;

use crate::cell::{Cell, CellId};
use crate::hal::{AddrTranslation, AxCellHal};
use crate::pcpu::PhysicalCpu;
use crate::plane::ControlPlane;

impl<H: AxCellHal> ControlPlane<H> {
    /// Make a committed mapping change of `cell` effective, called on `this_cpu`.
    pub fn commit_config(&self, cell: CellId, this_cpu: usize) -> AxResult {
        self.flush_cell_vcpu_caches(cell, this_cpu)
    }

    /// Flush the guest TLBs of every CPU of `cell`: synchronously on `this_cpu`, deferred on
    /// all others.
    pub(crate) fn flush_cell_vcpu_caches(&self, cell: CellId, this_cpu: usize) -> AxResult {
        let cpu_set = self.with_cell(cell, Cell::cpu_set)?;
        for cpu in cpu_set.iter() {
            if cpu == this_cpu {
                self.hal.paging().flush_local_tlb();
            } else {
                self.cpus[cpu].request_flush();
            }
        }
        Ok(())
    }

    /// Perform a deferred flush owed by the calling CPU.
    ///
    /// The flag is cleared only once the flush completed.
    pub(crate) fn service_pending_flush(&self, cpu: &PhysicalCpu) {
        if cpu.flush_pending() {
            self.hal.paging().flush_local_tlb();
            cpu.flush_done();
        }
    }

    /// Invalidate every data-cache line covering the memory of `cell`.
    pub(crate) fn invalidate_cell_dcaches(&self, cell: &Cell) {
        let paging = self.hal.paging();
        for region in cell.mem_regions() {
            paging.invalidate_dcache(region);
        }
    }
}
