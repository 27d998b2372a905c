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

use crate::hal::DiagnosticSink;

memory_addr::def_usize_addr! {
    /// Guest (intermediate) physical address.
    pub type GuestPhysAddr;
}

memory_addr::def_usize_addr_formatter! {
    GuestPhysAddr = "GPA:{}";
}

/// Number of user-mode general purpose registers saved on every exit (`r0`..`r12` and `lr`).
pub const NUM_USR_REGS: usize = 14;

const EXIT_REASON_UNDEF: u32 = 0x1;
const EXIT_REASON_HVC: u32 = 0x2;
const EXIT_REASON_PABT: u32 = 0x3;
const EXIT_REASON_DABT: u32 = 0x4;
const EXIT_REASON_TRAP: u32 = 0x5;
const EXIT_REASON_IRQ: u32 = 0x6;
const EXIT_REASON_FIQ: u32 = 0x7;

/// Why the guest left partition execution.
///
/// The trap entry stores a raw code which is decoded once by [`ExitReason::from_raw`]. Codes
/// the hardware entry does not define end up in [`ExitReason::Unknown`], which the dispatcher
/// treats as fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// A physical interrupt arrived while the guest was running.
    Irq,
    /// An instruction or data access the hypervisor emulates (HSR-classified trap).
    Trap,
    /// An undefined instruction reached HYP mode.
    Undef,
    /// A data abort taken to HYP mode.
    DataAbort,
    /// A prefetch abort taken to HYP mode.
    PrefetchAbort,
    /// A hypervisor call that was not routed as a trap.
    Hvc,
    /// A fast interrupt. The hypervisor never routes FIQs to itself.
    Fiq,
    /// Anything else, carrying the raw code.
    Unknown(u32),
}

impl ExitReason {
    /// Decodes the raw exit code written by the trap entry.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            EXIT_REASON_UNDEF => Self::Undef,
            EXIT_REASON_HVC => Self::Hvc,
            EXIT_REASON_PABT => Self::PrefetchAbort,
            EXIT_REASON_DABT => Self::DataAbort,
            EXIT_REASON_TRAP => Self::Trap,
            EXIT_REASON_IRQ => Self::Irq,
            EXIT_REASON_FIQ => Self::Fiq,
            other => Self::Unknown(other),
        }
    }

    /// Short name used in fatal dumps.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Irq => "irq",
            Self::Trap => "trap",
            Self::Undef => "undef",
            Self::DataAbort => "data abort",
            Self::PrefetchAbort => "prefetch abort",
            Self::Hvc => "hvc",
            Self::Fiq => "fiq",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// The guest's user-mode register file as saved by the trap entry.
#[repr(C)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuestRegs {
    /// `r0`..`r12` followed by `lr`.
    pub usr: [usize; NUM_USR_REGS],
}

/// Register snapshot of one exit.
///
/// Lives on the trapping CPU's stack for the duration of a single dispatch and is handed back
/// to the trap return path afterwards. Never stored across exits.
#[derive(Clone, Debug)]
pub struct ExitContext {
    /// Decoded exit reason.
    pub reason: ExitReason,
    /// Saved general purpose registers.
    pub regs: GuestRegs,
    /// Guest program counter at the time of the exit (`ELR_hyp`).
    pub pc: usize,
    /// Hyp syndrome register (`HSR`) captured at exit time.
    pub syndrome: u32,
    /// Faulting address (`HDFAR`/`HIFAR`), meaningful for aborts only.
    pub fault_addr: GuestPhysAddr,
}

impl ExitContext {
    /// Creates a snapshot for the given raw exit code with an empty register file.
    pub fn new(raw_reason: u32) -> Self {
        Self {
            reason: ExitReason::from_raw(raw_reason),
            regs: GuestRegs::default(),
            pc: 0,
            syndrome: 0,
            fault_addr: GuestPhysAddr::from(0),
        }
    }

    /// Prints the exit reason, the program counter and every general purpose register.
    pub fn dump<D: DiagnosticSink>(&self, sink: &D) {
        sink.panic_print(format_args!(
            "Unhandled HYP {} exit at {:#x}\n",
            self.reason.name(),
            self.pc
        ));
        if let ExitReason::Unknown(raw) = self.reason {
            sink.panic_print(format_args!("Exit code: {:#x}\n", raw));
        }
        for (n, val) in self.regs.usr.iter().enumerate() {
            sink.panic_print(format_args!(
                "r{}:{} {:#010x}{}",
                n,
                if n < 10 { " " } else { "" },
                val,
                if n % 4 == 3 { "\n" } else { "  " }
            ));
        }
        sink.panic_print(format_args!("\n"));
    }

    /// Prints the fault address and syndrome of an abort.
    pub fn dump_abort<D: DiagnosticSink>(&self, sink: &D) {
        sink.panic_print(format_args!(
            "Physical address: {:#010x} ESR: {:#010x}\n",
            self.fault_addr.as_usize(),
            self.syndrome
        ));
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(raw) => write!(f, "unknown ({:#x})", raw),
            other => f.write_str(other.name()),
        }
    }
}
