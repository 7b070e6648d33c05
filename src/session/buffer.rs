use bytes::BytesMut;

/// Accumulates raw bytes from the device between transaction drains.
///
/// Decoding happens at drain time, not append time, so a multi-byte
/// UTF-8 sequence split across serial reads is reassembled before it
/// is decoded. Undecodable bytes become replacement characters.
#[derive(Debug, Default)]
pub struct LineBuffer {
    data: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Takes everything accumulated so far and resets the buffer.
    pub fn snapshot_and_clear(&mut self) -> String {
        let taken = self.data.split();
        String::from_utf8_lossy(&taken).into_owned()
    }

    /// Decodes without consuming. Used by the prompt polling loop.
    pub fn peek_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
