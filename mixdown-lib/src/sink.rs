//! Output sink interface.

use crate::error::Result;

/// Final destination for rendered bytes in the engine's output format.
///
/// Called from producer threads (direct and solo paths) and from the mix
/// thread, so implementations must be thread-safe and must not block
/// indefinitely.
pub trait AudioSink: Send + Sync {
    fn write(&self, data: &[u8]) -> Result<()>;
}

impl<F> AudioSink for F
where
    F: Fn(&[u8]) -> Result<()> + Send + Sync,
{
    fn write(&self, data: &[u8]) -> Result<()> {
        self(data)
    }
}
