//! Options controlling how the protocol talks to an application

use yubikit_core::processor::INS_SEND_REMAINING;

/// Instruction the YKOATH application uses to fetch remaining response data
pub const YKOATH_INS_SEND_REMAINING: u8 = 0xA5;

/// Per-application protocol options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// Never switch to extended APDUs, even when the device supports them
    pub force_short_apdus: bool,
    /// Instruction used to fetch the rest of a chained response
    pub ins_send_remaining: u8,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            force_short_apdus: false,
            ins_send_remaining: INS_SEND_REMAINING,
        }
    }
}

impl ProtocolOptions {
    /// Set whether extended APDUs are disabled
    pub const fn with_force_short_apdus(mut self, force_short_apdus: bool) -> Self {
        self.force_short_apdus = force_short_apdus;
        self
    }

    /// Set the instruction used to fetch remaining response data
    pub const fn with_ins_send_remaining(mut self, ins: u8) -> Self {
        self.ins_send_remaining = ins;
        self
    }

    /// Options for the YKOATH application
    pub const fn ykoath() -> Self {
        Self {
            force_short_apdus: false,
            ins_send_remaining: YKOATH_INS_SEND_REMAINING,
        }
    }
}
