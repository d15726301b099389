//! Touch timeout workaround for YubiKey 4.2.0 to 4.2.6 over USB
//!
//! On those firmware versions a long response shortly followed by another
//! command makes the device wait for the touch timeout. Sending a throwaway
//! APDU first avoids the stall.

use std::time::{Duration, Instant};

use tracing::debug;

use super::chaining::ChainingProcessor;
use super::CommandProcessor;
use crate::command::Apdu;
use crate::formatter::ApduFormatter;
use crate::response::ApduResponse;
use crate::transport::SmartCardConnection;
use crate::Result;

/// Response data longer than this arms the workaround
pub const LONG_RESPONSE_THRESHOLD: usize = 54;

/// How long an armed workaround stays armed
pub const TOUCH_WORKAROUND_WINDOW: Duration = Duration::from_millis(2000);

const DUMMY_APDU: Apdu = Apdu::new(0x00, 0x00, 0x00, 0x00);

/// Sends a dummy APDU ahead of a command that closely follows a long response
#[derive(Debug, Clone)]
pub struct TouchWorkaroundProcessor {
    inner: ChainingProcessor,
    last_long_response: Option<Instant>,
}

impl TouchWorkaroundProcessor {
    /// Create the workaround over short APDU chaining
    pub fn new(ins_send_remaining: u8) -> Self {
        Self {
            inner: ChainingProcessor::new(ApduFormatter::Short, ins_send_remaining),
            last_long_response: None,
        }
    }

    /// Whether the next command would be preceded by the dummy APDU
    pub fn is_armed(&self) -> bool {
        self.last_long_response
            .is_some_and(|at| at.elapsed() < TOUCH_WORKAROUND_WINDOW)
    }
}

impl CommandProcessor for TouchWorkaroundProcessor {
    fn do_process_command(
        &mut self,
        apdu: &Apdu,
        connection: &mut dyn SmartCardConnection,
    ) -> Result<ApduResponse> {
        if self.is_armed() {
            debug!("Sending dummy APDU ahead of command following a long response");
            // The card rejects the dummy; only a broken connection matters
            if let Err(e) = self.inner.process_command(&DUMMY_APDU, connection) {
                if e.is_transport() {
                    return Err(e);
                }
            }
        }
        self.last_long_response = None;

        let response = self.inner.process_command(apdu, connection)?;
        if response.data().len() > LONG_RESPONSE_THRESHOLD {
            self.last_long_response = Some(Instant::now());
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnection;
    use hex_literal::hex;

    fn long_response() -> Vec<u8> {
        let mut response = vec![0x5A; 60];
        response.extend_from_slice(&hex!("9000"));
        response
    }

    #[test]
    fn test_dummy_sent_after_long_response() {
        let mut connection = MockConnection::new([
            long_response(),
            hex!("6D00").to_vec(),
            hex!("9000").to_vec(),
        ]);
        let mut processor = TouchWorkaroundProcessor::new(0xC0);
        let apdu = Apdu::new(0x00, 0xFD, 0x00, 0x00);

        let first = processor.process_command(&apdu, &mut connection).unwrap();
        assert_eq!(first.data().len(), 60);
        assert!(processor.is_armed());

        let second = processor.process_command(&apdu, &mut connection).unwrap();
        assert!(second.is_success());

        let frames = connection.commands();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].as_ref(), &hex!("00000000 00"));
        assert_eq!(frames[2].as_ref(), &hex!("00FD0000 00"));
        assert!(!processor.is_armed());
    }

    #[test]
    fn test_no_dummy_after_window_expires() {
        let mut connection = MockConnection::new([hex!("9000")]);
        let mut processor = TouchWorkaroundProcessor::new(0xC0);
        processor.last_long_response = Instant::now().checked_sub(Duration::from_millis(2500));

        processor
            .process_command(&Apdu::new(0x00, 0xFD, 0x00, 0x00), &mut connection)
            .unwrap();

        assert_eq!(connection.commands().len(), 1);
    }

    #[test]
    fn test_short_response_does_not_arm() {
        let mut short = vec![0x5A; LONG_RESPONSE_THRESHOLD];
        short.extend_from_slice(&hex!("9000"));
        let mut connection = MockConnection::new([short, hex!("9000").to_vec()]);
        let mut processor = TouchWorkaroundProcessor::new(0xC0);
        let apdu = Apdu::new(0x00, 0xFD, 0x00, 0x00);

        processor.process_command(&apdu, &mut connection).unwrap();
        assert!(!processor.is_armed());
        processor.process_command(&apdu, &mut connection).unwrap();

        assert_eq!(connection.commands().len(), 2);
    }

    #[test]
    fn test_dummy_transport_failure_propagates() {
        let mut connection = MockConnection::new([long_response()]);
        let mut processor = TouchWorkaroundProcessor::new(0xC0);
        let apdu = Apdu::new(0x00, 0xFD, 0x00, 0x00);

        processor.process_command(&apdu, &mut connection).unwrap();
        let err = processor.process_command(&apdu, &mut connection).unwrap_err();
        assert!(err.is_transport());
    }
}
