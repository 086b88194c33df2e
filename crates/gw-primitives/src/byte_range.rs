use async_trait::async_trait;
use thiserror::Error;

/// Random-access byte reader abstraction (spec §2 "byte-range source"):
/// `read(offset, size) -> bytes`. Implemented by local-file, HTTP-range,
/// and on-chain backends in `gw-data-source`; consumed here (rather than
/// there) so `gw-bundles` can walk a bundle envelope without depending on
/// the crate that assembles transaction byte streams — see DESIGN.md.
#[async_trait]
pub trait ByteRangeSource: Send + Sync {
    async fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, ByteRangeError>;

    /// Total size of the underlying range, if known up front.
    async fn size(&self) -> Result<u64, ByteRangeError>;
}

#[derive(Debug, Error)]
pub enum ByteRangeError {
    #[error("I/O error reading byte range: {0}")]
    Io(String),
    #[error("requested range [{offset}, {offset}+{size}) exceeds source size {source_size}")]
    OutOfRange { offset: u64, size: u64, source_size: u64 },
}

/// Test/in-memory implementation backed by a `Vec<u8>`.
pub struct InMemoryByteRangeSource {
    data: Vec<u8>,
}

impl InMemoryByteRangeSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ByteRangeSource for InMemoryByteRangeSource {
    async fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, ByteRangeError> {
        let source_size = self.data.len() as u64;
        let end = offset.checked_add(size).unwrap_or(u64::MAX);
        if end > source_size {
            return Err(ByteRangeError::OutOfRange { offset, size, source_size });
        }
        Ok(self.data[offset as usize..end as usize].to_vec())
    }

    async fn size(&self) -> Result<u64, ByteRangeError> {
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_slice() {
        let source = InMemoryByteRangeSource::new(b"hello world".to_vec());
        let slice = source.read(6, 5).await.unwrap();
        assert_eq!(slice, b"world");
    }

    #[tokio::test]
    async fn out_of_range_read_is_an_error() {
        let source = InMemoryByteRangeSource::new(b"short".to_vec());
        assert!(matches!(source.read(0, 100).await, Err(ByteRangeError::OutOfRange { .. })));
    }
}
