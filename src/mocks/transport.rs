use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::errors::Error;
use crate::errors::ProtocolError::IoException;
use crate::transports::Transport;

/// In-memory transport double. Clones share the same buffers, so tests can
/// keep a handle to feed reads and inspect writes while a client owns
/// another clone.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default)]
pub struct MockTransport {
    #[cfg_attr(feature = "serde", serde(skip))]
    inner: Arc<Mutex<MockBuffers>>,
}

#[derive(Debug, Default)]
struct MockBuffers {
    connected: bool,
    read_buf: VecDeque<u8>,
    write_buf: Vec<u8>,
}

impl MockTransport {
    /// A mock preloaded with bytes the client will read.
    pub fn with_data(data: &[u8]) -> Self {
        let mock = Self::default();
        mock.feed(data);
        mock
    }

    /// Appends bytes to the read side.
    pub fn feed(&self, data: &[u8]) {
        self.inner.lock().read_buf.extend(data);
    }

    /// Everything written by the client so far, in order.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().write_buf.clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().connected
    }
}

impl Display for MockTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockTransport")
    }
}

#[cfg_attr(feature = "serde", typetag::serde)]
impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), Error> {
        self.inner.lock().connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.inner.lock().connected = false;
        Ok(())
    }

    fn set_timeout(&mut self, _: Duration) -> Result<(), Error> {
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.inner.lock().write_buf.extend_from_slice(buf);
        Ok(())
    }

    /// Serves the preloaded bytes; once they run out the mock behaves like a
    /// dead line and errors instead of blocking.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let mut lock = self.inner.lock();
        if lock.read_buf.len() < buf.len() {
            return Err(Error::from(IoException {
                info: String::from("mock stream exhausted"),
            }));
        }
        for slot in buf.iter_mut() {
            *slot = lock.read_buf.pop_front().unwrap();
        }
        Ok(())
    }
}
