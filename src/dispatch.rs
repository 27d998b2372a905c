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

use crate::exit::{ExitContext, ExitReason};
use crate::hal::{ArchRegs, AxCellHal, DiagnosticSink, IrqChip, TrapEmulator, TrapOutcome};
use crate::pcpu::{CpuStat, PhysicalCpu};
use crate::plane::ControlPlane;

/// SGI asking a CPU to move queued virtual interrupts into its list registers.
pub const SGI_INJECT: u32 = 0;
/// SGI asking a CPU to stop and wait in the firmware idle loop.
pub const SGI_CPU_OFF: u32 = 1;
/// The GIC virtual interface maintenance interrupt.
pub const MAINTENANCE_IRQ: u32 = 25;

/// Inter-processor signals used for lifecycle coordination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagementSignal {
    Inject,
    CpuOff,
}

impl ManagementSignal {
    /// Decodes an SGI number. Returns `None` for SGIs this crate does not use.
    pub const fn from_id(id: u32) -> Option<Self> {
        match id {
            SGI_INJECT => Some(Self::Inject),
            SGI_CPU_OFF => Some(Self::CpuOff),
            _ => None,
        }
    }

    /// The SGI number carrying this signal.
    pub const fn id(self) -> u32 {
        match self {
            Self::Inject => SGI_INJECT,
            Self::CpuOff => SGI_CPU_OFF,
        }
    }
}

impl<H: AxCellHal> ControlPlane<H> {
    /// Handle one exit of the guest running on `cpu_id`, the calling CPU.
    ///
    /// Returns the context to restore. Exits that cannot be handled here never return: the
    /// snapshot is dumped and the calling CPU halts.
    ///
    /// The handlers in this module run on the trapping CPU and take its id from the trap
    /// entry, so `cpu_id` is always a present CPU. They panic if it is not below
    /// [`MAX_CPUS`](crate::MAX_CPUS).
    pub fn handle_exit<'a>(&self, cpu_id: usize, ctx: &'a mut ExitContext) -> &'a mut ExitContext {
        let cpu = &self.cpus[cpu_id];
        cpu.count(CpuStat::VmExitsTotal);

        match ctx.reason {
            ExitReason::Irq => self.hal.irqchip().handle_irq(cpu),
            ExitReason::Trap => {
                if self.hal.traps().handle_trap(cpu, ctx) == TrapOutcome::Unhandled {
                    self.fatal_exit(cpu, ctx)
                }
            }
            ExitReason::Undef
            | ExitReason::DataAbort
            | ExitReason::PrefetchAbort
            | ExitReason::Hvc
            | ExitReason::Fiq
            | ExitReason::Unknown(_) => self.fatal_exit(cpu, ctx),
        }

        ctx
    }

    /// Handle an SGI addressed to the calling CPU.
    ///
    /// Unknown SGIs are dropped with a warning: racing management operations can leave stale
    /// signals behind.
    pub fn handle_management_signal(&self, cpu_id: usize, sgi_id: u32) {
        let cpu = &self.cpus[cpu_id];
        cpu.count(CpuStat::VmExitsManagement);

        match ManagementSignal::from_id(sgi_id) {
            Some(ManagementSignal::Inject) => self.hal.irqchip().inject_pending(cpu),
            Some(ManagementSignal::CpuOff) => self.self_suspend(cpu),
            None => warn!("CPU{}: unknown SGI received {}", cpu_id, sgi_id),
        }
    }

    /// Handle a physical interrupt acknowledged on the calling CPU.
    ///
    /// Returns `true` if the hypervisor consumed the interrupt (maintenance interrupt) and
    /// `false` if it was queued for the cell.
    pub fn handle_phys_irq(&self, cpu_id: usize, irqn: u32) -> bool {
        let cpu = &self.cpus[cpu_id];
        let irqchip = self.hal.irqchip();

        if irqn == MAINTENANCE_IRQ {
            cpu.count(CpuStat::VmExitsMaintenance);
            irqchip.inject_pending(cpu);
            return true;
        }

        cpu.count(CpuStat::VmExitsVirq);
        irqchip.set_pending(cpu, irqn);
        false
    }

    /// Halt the calling CPU for good. Other CPUs are not touched.
    pub fn panic_stop(&self, cpu_id: usize) -> ! {
        self.hal
            .console()
            .panic_print(format_args!("Stopping CPU {}\n", cpu_id));
        self.hal.regs().halt()
    }

    fn fatal_exit(&self, cpu: &PhysicalCpu, ctx: &ExitContext) -> ! {
        let console = self.hal.console();
        ctx.dump(console);
        if matches!(ctx.reason, ExitReason::DataAbort | ExitReason::PrefetchAbort) {
            ctx.dump_abort(console);
        }
        self.panic_stop(cpu.id())
    }
}
