//! Constants of the secure channel handshake commands

/// Command classes
pub mod cla {
    /// GlobalPlatform command class
    pub const GP: u8 = 0x80;
    /// Secure messaging bit, OR'ed into the class of every protected command
    pub const SECURE_MESSAGING: u8 = 0x04;
    /// GlobalPlatform command class with secure messaging
    pub const GP_SECURE: u8 = GP | SECURE_MESSAGING;
}

/// Instruction codes
pub mod ins {
    /// INITIALIZE UPDATE (SCP03)
    pub const INITIALIZE_UPDATE: u8 = 0x50;
    /// EXTERNAL AUTHENTICATE (SCP03, SCP11a/c)
    pub const EXTERNAL_AUTHENTICATE: u8 = 0x82;
    /// INTERNAL AUTHENTICATE (SCP11b)
    pub const INTERNAL_AUTHENTICATE: u8 = 0x88;
    /// PERFORM SECURITY OPERATION, used to upload the OCE certificate chain
    pub const PERFORM_SECURITY_OPERATION: u8 = 0x2A;
}

/// Security level negotiated in EXTERNAL AUTHENTICATE (P1)
pub mod security_level {
    /// Command MAC
    pub const CMAC: u8 = 0x01;
    /// Command decryption
    pub const CDEC: u8 = 0x02;
    /// Response MAC
    pub const RMAC: u8 = 0x10;
    /// Response encryption
    pub const RENC: u8 = 0x20;
    /// Everything on
    pub const CDEC_RENC_CMAC_RMAC: u8 = CMAC | CDEC | RMAC | RENC;
}

/// Tags of the SCP11 authenticate payload
pub mod tags {
    /// Control reference template for key agreement
    pub const CONTROL_REFERENCE: u16 = 0xA6;
    /// SCP identifier and parameters
    pub const SCP_IDENTIFIER: u16 = 0x90;
    /// Key usage qualifier
    pub const KEY_USAGE: u16 = 0x95;
    /// Key type
    pub const KEY_TYPE: u16 = 0x80;
    /// Key length
    pub const KEY_LENGTH: u16 = 0x81;
    /// Ephemeral public key
    pub const EPHEMERAL_KEY: u16 = 0x5F49;
    /// Receipt
    pub const RECEIPT: u16 = 0x86;
}

/// SCP11 identifier as sent in the control reference template
pub const SCP11_IDENTIFIER: u8 = 0x11;

/// Bit in P2 of PERFORM SECURITY OPERATION marking that more certificates follow
pub const PSO_MORE_CERTIFICATES: u8 = 0x80;
