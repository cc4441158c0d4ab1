//! In-process channels for tests.

use std::sync::mpsc;

use crate::transport::Channel;
use crate::transport::Error;
use crate::transport::Result;

/// One end of an in-memory duplex channel.
///
/// Writes stay local until `sync`, like a real transport's send buffer, so a
/// test that forgets to sync will hang exactly as it would over a socket.
pub struct MemoryChannel {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    staged: Vec<u8>,
    pending: Vec<u8>,
    cursor: usize,
}

impl MemoryChannel {
    /// Two connected ends. Bytes synced on one are read on the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }

    fn new(tx: mpsc::Sender<Vec<u8>>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { tx, rx, staged: Vec::new(), pending: Vec::new(), cursor: 0 }
    }
}

impl Channel for MemoryChannel {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn accept(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.cursor == self.pending.len() {
                self.pending = self
                    .rx
                    .recv()
                    .map_err(|_| Error::ConnectionLost("peer dropped".into()))?;
                self.cursor = 0;
            }
            let n = (self.pending.len() - self.cursor).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[self.cursor..self.cursor + n]);
            self.cursor += n;
            filled += n;
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.staged.extend_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.staged);
        self.tx
            .send(chunk)
            .map_err(|_| Error::ConnectionLost("peer dropped".into()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
