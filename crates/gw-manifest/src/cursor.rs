//! A pull-based byte cursor over a [`gw_data_source::ByteStream`], so the
//! JSON scanner in [`crate::scan`] never has to hold more of the
//! manifest in memory than one pending chunk at a time.

use std::collections::VecDeque;

use futures::StreamExt;
use gw_data_source::ByteStream;

pub struct ByteCursor {
    stream: ByteStream,
    buf: VecDeque<u8>,
    exhausted: bool,
}

impl ByteCursor {
    pub fn new(stream: ByteStream) -> Self {
        Self { stream, buf: VecDeque::new(), exhausted: false }
    }

    async fn fill(&mut self) -> std::io::Result<()> {
        if !self.buf.is_empty() || self.exhausted {
            return Ok(());
        }
        match self.stream.next().await {
            Some(Ok(chunk)) => self.buf.extend(chunk.iter().copied()),
            Some(Err(e)) => return Err(std::io::Error::other(e.to_string())),
            None => self.exhausted = true,
        }
        Ok(())
    }

    pub async fn peek(&mut self) -> std::io::Result<Option<u8>> {
        self.fill().await?;
        Ok(self.buf.front().copied())
    }

    pub async fn next(&mut self) -> std::io::Result<Option<u8>> {
        self.fill().await?;
        Ok(self.buf.pop_front())
    }

    pub async fn skip_whitespace(&mut self) -> std::io::Result<()> {
        while let Some(b) = self.peek().await? {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.next().await?;
            } else {
                break;
            }
        }
        Ok(())
    }
}
