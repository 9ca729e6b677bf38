//! Packets owned by the diversion queue and packets handed to consumers.

use bytes::Bytes;
use rust_divert_common::types::{Address, ChecksumFixup};
use rust_divert_common::{Error, Result};

/// A diverted packet waiting for a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    data: Vec<u8>,
    address: Address,
    fixup: ChecksumFixup,
    /// Aging tag, set from the queue's generation bit at enqueue.
    pub(crate) generation: bool,
}

impl QueuedPacket {
    /// Copy `bytes` into a new queue entry. The copy is made before the
    /// queue lock is taken, so allocation failure never happens under it.
    pub fn copy_from(bytes: &[u8], address: Address, fixup: ChecksumFixup) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes.len()).map_err(|e| {
            Error::ResourceExhausted(format!("queued packet of {} bytes: {}", bytes.len(), e))
        })?;
        data.extend_from_slice(bytes);
        Ok(Self {
            data,
            address,
            fixup,
            generation: false,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn fixup(&self) -> ChecksumFixup {
        self.fixup
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, Address, ChecksumFixup, bool) {
        (self.data, self.address, self.fixup, self.generation)
    }

    /// Rebuild an entry handed back by a delivery that found no reader.
    pub(crate) fn from_parts(
        data: Vec<u8>,
        address: Address,
        fixup: ChecksumFixup,
        generation: bool,
    ) -> Self {
        Self {
            data,
            address,
            fixup,
            generation,
        }
    }
}

/// A packet as handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Packet bytes, truncated to the reader's buffer size.
    pub data: Bytes,
    /// Capture metadata.
    pub address: Address,
    /// Length of the packet before truncation.
    pub original_len: usize,
}

impl Delivered {
    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.original_len
    }
}
