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

use core::fmt;

use axerrno::AxResult;

use crate::cell::{Cell, MemRegion};
use crate::exit::{ExitContext, GuestRegs};
use crate::pcpu::PhysicalCpu;
use crate::regs::{BankedReg, SysReg};

/// Power-on entry handed to the firmware. Runs on the target CPU with the opaque argument
/// given to [`PowerBridge::cpu_on`] and never returns.
pub type CpuEntry = fn(arg: usize) -> !;

/// The interfaces which the underlying software (kernel or hypervisor) must implement.
///
/// Each collaborator is a separate trait; this one only bundles them so the control plane can
/// be generic over a single parameter.
pub trait AxCellHal {
    type Power: PowerBridge;
    type IrqChip: IrqChip;
    type Paging: AddrTranslation;
    type Regs: ArchRegs;
    type Traps: TrapEmulator;
    type Console: DiagnosticSink;

    /// The PSCI firmware bridge.
    fn power(&self) -> &Self::Power;
    /// The interrupt controller virtualization layer.
    fn irqchip(&self) -> &Self::IrqChip;
    /// The stage-2 address translation subsystem.
    fn paging(&self) -> &Self::Paging;
    /// Register access on the current CPU.
    fn regs(&self) -> &Self::Regs;
    /// Emulation of HSR-classified traps.
    fn traps(&self) -> &Self::Traps;
    /// The panic console.
    fn console(&self) -> &Self::Console;
}

/// PSCI firmware power-state interface.
pub trait PowerBridge {
    /// Powers on `cpu_id` at `entry`, passing `arg` as its only argument.
    ///
    /// Returns `false` if the firmware refused, which means the CPU was not off.
    fn cpu_on(&self, cpu_id: usize, entry: CpuEntry, arg: usize) -> bool;

    /// Powers off the calling CPU. Only returns through a later `cpu_on` entry.
    fn cpu_off(&self, cpu: &PhysicalCpu) -> !;

    /// Suspends the calling CPU in the firmware idle loop until [`PowerBridge::resume`] or
    /// [`PowerBridge::cpu_on`] is issued for it.
    fn suspend(&self, cpu: &PhysicalCpu);

    /// Releases `cpu_id` from the firmware idle loop.
    fn resume(&self, cpu_id: usize);

    /// Whether `cpu_id` currently sits in the firmware idle loop.
    fn is_stopped(&self, cpu_id: usize) -> bool;

    /// Polls until `cpu_id` has entered the firmware idle loop.
    ///
    /// Returns `false` if the firmware state is inconsistent with that request.
    fn wait_stopped(&self, cpu_id: usize) -> bool;

    /// Routes PSCI calls of `cell`'s CPUs to this crate's entry points.
    fn register_cell(&self, cell: &Cell);

    /// Yields to the firmware idle primitive (`wfe`) once inside a polling loop.
    fn idle(&self) {
        core::hint::spin_loop();
    }
}

/// A software generated interrupt as sent by the interrupt controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sgi {
    /// `0` routes to the CPUs in `targets`.
    pub routing_mode: u8,
    pub aff1: u8,
    pub aff2: u8,
    pub aff3: u8,
    /// Bitmask of target CPUs.
    pub targets: u64,
    /// SGI number.
    pub id: u32,
}

/// Interrupt controller virtualization layer.
pub trait IrqChip {
    /// Sets up the virtual interrupt state of a new cell.
    fn cell_init(&self, cell: &Cell) -> AxResult;
    /// Releases the virtual interrupt state of a cell.
    fn cell_exit(&self, cell: &Cell);
    /// Resets the per-CPU interface of the calling CPU.
    fn cpu_reset(&self, cpu: &PhysicalCpu);
    /// Acknowledges and handles the pending physical interrupt of the calling CPU.
    fn handle_irq(&self, cpu: &PhysicalCpu);
    /// Moves queued virtual interrupts into the list registers.
    fn inject_pending(&self, cpu: &PhysicalCpu);
    /// Queues `irqn` for injection into the calling CPU's cell.
    fn set_pending(&self, cpu: &PhysicalCpu, irqn: u32);
    /// Sends a software generated interrupt.
    fn send_sgi(&self, sgi: Sgi);
    /// Signals end of interrupt for `irqn`, optionally deactivating it.
    fn eoi_irq(&self, irqn: u32, deactivate: bool);
}

/// Stage-2 address translation subsystem.
pub trait AddrTranslation {
    /// Builds the translation context of a new cell.
    fn cell_init(&self, cell: &Cell) -> AxResult;
    /// Tears down the translation context of a cell.
    fn cell_destroy(&self, cell: &Cell);
    /// Installs the owning cell's translation context on the calling CPU.
    fn vcpu_init(&self, cpu: &PhysicalCpu);
    /// Invalidates the guest TLB entries of the calling CPU.
    fn flush_local_tlb(&self);
    /// Invalidates all data-cache lines covering `region`.
    fn invalidate_dcache(&self, region: &MemRegion);
}

/// Raw register access on the calling CPU.
pub trait ArchRegs {
    fn write_banked(&self, reg: BankedReg, val: usize);
    fn read_sysreg(&self, reg: SysReg) -> u64;
    fn write_sysreg(&self, reg: SysReg, val: u64);

    /// Restores `regs` and returns to the guest through `eret`.
    fn vm_return(&self, regs: &GuestRegs) -> !;

    /// Stops the calling CPU for good (`wfi` loop).
    fn halt(&self) -> !;
}

/// Result of trap emulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrapOutcome {
    /// The trap was emulated and the guest can continue.
    Handled,
    /// Nothing knows how to emulate the trap.
    Unhandled,
}

/// Emulation of instruction and data accesses classified by the syndrome register.
pub trait TrapEmulator {
    fn handle_trap(&self, cpu: &PhysicalCpu, ctx: &mut ExitContext) -> TrapOutcome;
}

/// Output used while the system is going down.
pub trait DiagnosticSink {
    fn panic_print(&self, args: fmt::Arguments);
}
