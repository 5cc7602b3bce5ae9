//! STM8 addresses used by the default SWIM sequences (UM0470).

use crate::constants::swim;
use crate::swim::{Step, TargetProfile};

pub const SWIM_CSR: u32 = 0x00_7f80;

pub mod swim_csr {
    pub const SAFE_MASK: u8 = 1 << 7;
    pub const NO_ACCESS: u8 = 1 << 6;
    pub const SWIM_DM: u8 = 1 << 5;
    pub const HS: u8 = 1 << 4;
    pub const OSCOFF: u8 = 1 << 3;
    pub const RST: u8 = 1 << 2;
    pub const HSIT: u8 = 1 << 1;
    pub const PRI: u8 = 1 << 0;
}

pub const DM_CSR2: u32 = 0x00_7f99;

pub mod dm_csr2 {
    pub const SWBKE: u8 = 1 << 5;
    pub const SWBKF: u8 = 1 << 4;
    pub const STALL: u8 = 1 << 3;
    pub const FLUSH: u8 = 1 << 0;
}

/// Start of program memory on every STM8.
pub const FLASH_START: u32 = 0x00_8000;
/// Flash size of the STM8S105 medium density line.
pub const STM8S105_FLASH_SIZE: u32 = 0x8000;

/// Halts the core under SWIM control with the high-speed link enabled.
pub fn prologue() -> Vec<Step> {
    vec![
        Step::command("assert reset", swim::ASSERT_RESET),
        Step::command("entry sequence", swim::ENTER_SEQ),
        Step::write(
            "SWIM_CSR debug mode",
            SWIM_CSR,
            swim_csr::SAFE_MASK | swim_csr::SWIM_DM,
        ),
        Step::command("generate reset", swim::GEN_RST),
        Step::write(
            "SWIM_CSR high speed",
            SWIM_CSR,
            swim_csr::SAFE_MASK | swim_csr::SWIM_DM | swim_csr::HS,
        ),
        Step::command_with_arg("high speed", swim::SPEED, 1),
        Step::write("DM_CSR2 stall", DM_CSR2, dm_csr2::STALL),
        Step::command("deassert reset", swim::DEASSERT_RESET),
        Step::read("SWIM_CSR", SWIM_CSR),
        Step::read_capabilities("capabilities"),
    ]
}

/// Releases the core and resets it so it starts running again.
pub fn epilogue() -> Vec<Step> {
    vec![
        Step::write("DM_CSR2 release", DM_CSR2, 0),
        Step::write(
            "SWIM_CSR reset on exit",
            SWIM_CSR,
            swim_csr::SAFE_MASK | swim_csr::SWIM_DM | swim_csr::RST,
        ),
        Step::command("generate reset", swim::GEN_RST),
        Step::command("deassert reset", swim::DEASSERT_RESET),
    ]
}

pub fn profile() -> TargetProfile {
    TargetProfile {
        name: "stm8",
        prologue: prologue(),
        epilogue: epilogue(),
    }
}
