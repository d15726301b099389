//! Scripted connection for exercising processors without hardware

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

use super::{SmartCardConnection, Transport, TransportError};

type Responder = Box<dyn FnMut(&[u8]) -> Bytes + Send>;

/// Connection returning queued responses, or the output of a responder closure,
/// while recording every frame it was asked to transmit
pub struct MockConnection {
    responses: VecDeque<Bytes>,
    responder: Option<Responder>,
    commands: Vec<Bytes>,
    transport: Transport,
    extended_length: bool,
    atr: Bytes,
    closed: bool,
}

impl MockConnection {
    /// Create a USB connection answering with the given responses in order
    pub fn new<I, B>(responses: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        Self {
            responses: responses
                .into_iter()
                .map(|r| Bytes::copy_from_slice(r.as_ref()))
                .collect(),
            responder: None,
            commands: Vec::new(),
            transport: Transport::Usb,
            extended_length: true,
            atr: Bytes::from_static(&[0x3B, 0x8C, 0x80, 0x01]),
            closed: false,
        }
    }

    /// Create a connection computing each response from the command frame
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Bytes + Send + 'static,
    {
        let mut connection = Self::new(Vec::<Bytes>::new());
        connection.responder = Some(Box::new(responder));
        connection
    }

    /// Set the reported transport
    pub const fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Set whether extended length APDUs are reported as supported
    pub const fn with_extended_length(mut self, supported: bool) -> Self {
        self.extended_length = supported;
        self
    }

    /// Queue another response
    pub fn push_response(&mut self, response: impl AsRef<[u8]>) {
        self.responses
            .push_back(Bytes::copy_from_slice(response.as_ref()));
    }

    /// Frames transmitted so far
    pub fn commands(&self) -> &[Bytes] {
        &self.commands
    }

    /// Forget the recorded frames
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Whether close has been called
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("responses", &self.responses.len())
            .field("responder", &self.responder.is_some())
            .field("commands", &self.commands.len())
            .field("transport", &self.transport)
            .field("closed", &self.closed)
            .finish()
    }
}

impl SmartCardConnection for MockConnection {
    fn do_send_and_receive(&mut self, apdu: &[u8]) -> Result<Bytes, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        self.commands.push(Bytes::copy_from_slice(apdu));

        if let Some(responder) = self.responder.as_mut() {
            return Ok(responder(apdu));
        }
        self.responses.pop_front().ok_or(TransportError::Transmission)
    }

    fn transport(&self) -> Transport {
        self.transport
    }

    fn is_extended_length_supported(&self) -> bool {
        self.extended_length
    }

    fn atr(&self) -> Bytes {
        self.atr.clone()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}
