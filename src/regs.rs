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

//! Architectural registers a CPU reset must return to power-on values.
//!
//! Every register a guest can configure and that survives a HYP-mode transition is listed
//! here. A register missing from these lists keeps the previous occupant's value across a
//! cell change.

use bitflags::bitflags;

use crate::hal::ArchRegs;

/// `VMPIDR` multiprocessing extensions bit.
pub const MPIDR_MP_BIT: u64 = 1 << 31;

/// Banked core registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankedReg {
    SpUsr,
    SpSvc,
    SpAbt,
    SpUnd,
    SpIrq,
    SpFiq,
    LrSvc,
    LrAbt,
    LrUnd,
    LrIrq,
    LrFiq,
    R8Fiq,
    R9Fiq,
    R10Fiq,
    R11Fiq,
    R12Fiq,
    SpsrSvc,
    SpsrAbt,
    SpsrUnd,
    SpsrIrq,
    SpsrFiq,
    /// Exception return address of HYP mode.
    ElrHyp,
    /// Saved program status of HYP mode.
    SpsrHyp,
}

/// Banked registers zeroed on reset, in write order.
pub const BANKED_RESET_LIST: [BankedReg; 21] = [
    BankedReg::SpUsr,
    BankedReg::SpSvc,
    BankedReg::SpAbt,
    BankedReg::SpUnd,
    BankedReg::SpIrq,
    BankedReg::SpFiq,
    BankedReg::LrSvc,
    BankedReg::LrAbt,
    BankedReg::LrUnd,
    BankedReg::LrIrq,
    BankedReg::LrFiq,
    BankedReg::R8Fiq,
    BankedReg::R9Fiq,
    BankedReg::R10Fiq,
    BankedReg::R11Fiq,
    BankedReg::R12Fiq,
    BankedReg::SpsrSvc,
    BankedReg::SpsrAbt,
    BankedReg::SpsrUnd,
    BankedReg::SpsrIrq,
    BankedReg::SpsrFiq,
];

/// Guest-visible system registers plus the HYP registers this crate writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysReg {
    Sctlr,
    Cpacr,
    Contextidr,
    Par,
    Ttbr0,
    Ttbr1,
    Csselr,
    Cntkctl,
    CntpCtl,
    CntpCval,
    CntvCtl,
    CntvCval,
    Ttbcr,
    Dacr,
    Vbar,
    Dfsr,
    Dfar,
    Ifsr,
    Ifar,
    Adfsr,
    Aifsr,
    Mair0,
    Mair1,
    Amair0,
    Amair1,
    Tpidrurw,
    Tpidruro,
    Tpidrprw,
    /// Virtualized multiprocessor affinity seen by the guest.
    Vmpidr,
}

/// System registers zeroed on reset. `SCTLR` is handled separately since only the bits in
/// [`Sctlr::RESET_MASK`] may be cleared.
pub const SYSREG_RESET_LIST: [SysReg; 27] = [
    SysReg::Cpacr,
    SysReg::Contextidr,
    SysReg::Par,
    SysReg::Ttbr0,
    SysReg::Ttbr1,
    SysReg::Csselr,
    SysReg::Cntkctl,
    SysReg::CntpCtl,
    SysReg::CntpCval,
    SysReg::CntvCtl,
    SysReg::CntvCval,
    // AArch32 only
    SysReg::Ttbcr,
    SysReg::Dacr,
    SysReg::Vbar,
    SysReg::Dfsr,
    SysReg::Dfar,
    SysReg::Ifsr,
    SysReg::Ifar,
    SysReg::Adfsr,
    SysReg::Aifsr,
    SysReg::Mair0,
    SysReg::Mair1,
    SysReg::Amair0,
    SysReg::Amair1,
    SysReg::Tpidrurw,
    SysReg::Tpidruro,
    SysReg::Tpidrprw,
];

bitflags! {
    /// System control register bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Sctlr: u32 {
        const M = 1 << 0;
        const A = 1 << 1;
        const C = 1 << 2;
        const I = 1 << 12;
        const V = 1 << 13;
        const WXN = 1 << 19;
        const UWXN = 1 << 20;
        const FI = 1 << 21;
        const EE = 1 << 25;
        const TRE = 1 << 28;
        const AFE = 1 << 29;
        const TE = 1 << 30;
    }
}

impl Sctlr {
    /// Bits a guest may have set that must be off after reset.
    pub const RESET_MASK: Self = Self::all();
}

bitflags! {
    /// Program status register bits used when entering a freshly reset guest.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Psr: u32 {
        const MODE_SVC = 0x13;
        const F = 1 << 6;
        const I = 1 << 7;
        const A = 1 << 8;
    }
}

impl Psr {
    /// Supervisor mode with asynchronous aborts, IRQs and FIQs masked.
    pub const RESET: Self = Self::MODE_SVC.union(Self::F).union(Self::I).union(Self::A);
}

/// Returns every banked and guest system register to its power-on value.
pub(crate) fn reset_el1<R: ArchRegs>(regs: &R) {
    for reg in BANKED_RESET_LIST {
        regs.write_banked(reg, 0);
    }

    let sctlr = Sctlr::from_bits_retain(regs.read_sysreg(SysReg::Sctlr) as u32)
        .difference(Sctlr::RESET_MASK);
    regs.write_sysreg(SysReg::Sctlr, sctlr.bits() as u64);
    for reg in SYSREG_RESET_LIST {
        regs.write_sysreg(reg, 0);
    }
}
