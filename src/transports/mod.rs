use crate::errors::Error;
use crate::transports::private::TraitToAny;
use dyn_clone::DynClone;
use std::fmt::{Debug, Display};
use std::time::Duration;

pub mod serial;

pub(crate) mod private {
    use std::any::Any;

    pub trait TraitToAny: 'static {
        fn as_any(&self) -> &dyn Any;
    }

    impl<T: 'static> TraitToAny for T {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
}

dyn_clone::clone_trait_object!(Transport);

/// A full-duplex byte channel to the board. No assumption is made about
/// packet boundaries.
#[cfg_attr(feature = "serde", typetag::serde(tag = "type"))]
pub trait Transport: Debug + Display + DynClone + Send + Sync + TraitToAny {
    /// Opens communication (in a blocking way) over the transport.
    fn open(&mut self) -> Result<(), Error>;

    /// Gracefully shuts down the transport.
    fn close(&mut self) -> Result<(), Error>;

    /// Sets the read timeout for the transport.
    ///
    /// # Notes
    /// This function is optional and may not be supported by all transports.
    fn set_timeout(&mut self, duration: Duration) -> Result<(), Error>;

    /// Writes a whole buffer to the connection.
    ///
    /// # Notes
    /// This function blocks until the write operation is complete. A single
    /// call is never interleaved with another writer's bytes.
    fn write(&mut self, buf: &[u8]) -> Result<(), Error>;

    /// Fills the whole buffer from the connection.
    ///
    /// # Notes
    /// This function blocks until the buffer is filled or the transport
    /// errors. Transports whose reads can return zero bytes must retry
    /// rather than surface that as an error.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error>;
}
