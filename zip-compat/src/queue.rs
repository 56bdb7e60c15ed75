//! Asynchronous byte reservoir between the upload producer and the
//! streaming ZIP reader.
//!
//! The producer side hands over [`Bytes`] chunks through a bounded channel,
//! so a slow parser pauses the upload instead of buffering it. The consumer
//! side implements [`AsyncBufRead`] and additionally supports bounded
//! lookahead ([`ByteQueue::peek_u32_le`]) and exact reads for header
//! parsing. All consumption advances a monotonic offset counter that the
//! stream reader uses as the local header offset of the entry being parsed.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, ReadBuf, Take};
use tokio::sync::mpsc;

use crate::Error;

/// In-flight chunks between producer and reader. Small on purpose; the
/// spool tee is the party that paces the upload.
const CHUNK_BACKLOG: usize = 4;

/// Producer half of a [`ByteQueue`].
pub struct QueueWriter {
    tx: mpsc::Sender<Bytes>,
}

impl QueueWriter {
    /// Hands a chunk to the reader, waiting while the backlog is full.
    /// Returns `false` once the reader has stopped consuming; the producer
    /// is expected to keep going and simply stop forwarding.
    pub async fn push(&self, chunk: Bytes) -> bool {
        self.tx.send(chunk).await.is_ok()
    }
}

/// Consumer half: a buffered, byte-oriented view over the producer's
/// chunks.
pub struct ByteQueue {
    rx: mpsc::Receiver<Bytes>,
    chunks: VecDeque<Bytes>,
    buffered: usize,
    consumed: u64,
}

impl ByteQueue {
    /// Creates a connected producer/consumer pair.
    pub fn pair() -> (QueueWriter, ByteQueue) {
        let (tx, rx) = mpsc::channel(CHUNK_BACKLOG);
        (
            QueueWriter { tx },
            ByteQueue {
                rx,
                chunks: VecDeque::new(),
                buffered: 0,
                consumed: 0,
            },
        )
    }

    /// Total bytes consumed so far; equals the stream offset of the next
    /// unread byte.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Waits until at least `n` bytes are buffered. Fails with
    /// [`Error::Truncated`] if the producer finishes first.
    pub async fn ensure(&mut self, n: usize) -> Result<(), Error> {
        while self.buffered < n {
            match self.rx.recv().await {
                Some(chunk) => {
                    self.buffered += chunk.len();
                    self.chunks.push_back(chunk);
                }
                None => return Err(Error::Truncated),
            }
        }
        Ok(())
    }

    /// Consumes and returns exactly `n` bytes.
    pub async fn read_bytes(&mut self, n: usize) -> Result<Bytes, Error> {
        self.ensure(n).await?;

        let single_chunk = self.chunks.front().is_some_and(|front| front.len() >= n);
        let out = if single_chunk {
            let Some(front) = self.chunks.front_mut() else {
                return Err(Error::Truncated);
            };
            front.split_to(n)
        } else {
            let mut buf = BytesMut::with_capacity(n);
            let mut remaining = n;
            while remaining > 0 {
                let Some(front) = self.chunks.front_mut() else {
                    return Err(Error::Truncated);
                };
                let take = remaining.min(front.len());
                buf.extend_from_slice(&front.split_to(take));
                remaining -= take;
                if front.is_empty() {
                    self.chunks.pop_front();
                }
            }
            buf.freeze()
        };
        if self.chunks.front().is_some_and(Bytes::is_empty) {
            self.chunks.pop_front();
        }
        self.buffered -= n;
        self.consumed += n as u64;
        Ok(out)
    }

    /// Reads the next four bytes as a little-endian u32 without consuming
    /// them or moving the offset counter.
    pub async fn peek_u32_le(&mut self) -> Result<u32, Error> {
        self.ensure(4).await?;
        let mut word = [0u8; 4];
        for (slot, byte) in word
            .iter_mut()
            .zip(self.chunks.iter().flat_map(|c| c.iter()))
        {
            *slot = *byte;
        }
        Ok(u32::from_le_bytes(word))
    }

    /// A reader over exactly the next `limit` bytes of the queue.
    pub fn take_exact(&mut self, limit: u64) -> Take<&mut ByteQueue> {
        AsyncReadExt::take(self, limit)
    }

    /// Drops everything buffered and silently absorbs whatever the
    /// producer still sends. Reads return EOF from now on.
    pub fn discard_rest(&mut self) {
        self.chunks.clear();
        self.buffered = 0;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl AsyncRead for ByteQueue {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let chunk = match Pin::new(&mut *this).poll_fill_buf(cx) {
            Poll::Ready(Ok(chunk)) => chunk,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        };
        if chunk.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let n = chunk.len().min(buf.remaining());
        buf.put_slice(&chunk[..n]);
        Pin::new(this).consume(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncBufRead for ByteQueue {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();
        loop {
            match this.chunks.front() {
                Some(front) if !front.is_empty() => break,
                Some(_) => {
                    this.chunks.pop_front();
                }
                None => match this.rx.poll_recv(cx) {
                    Poll::Ready(Some(chunk)) => {
                        this.buffered += chunk.len();
                        this.chunks.push_back(chunk);
                    }
                    Poll::Ready(None) => return Poll::Ready(Ok(&[])),
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
        Poll::Ready(Ok(this.chunks.front().map(|c| &c[..]).unwrap_or(&[])))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        if amt == 0 {
            return;
        }
        let this = self.get_mut();
        if let Some(front) = this.chunks.front_mut() {
            front.advance(amt);
            if front.is_empty() {
                this.chunks.pop_front();
            }
        }
        this.buffered -= amt;
        this.consumed += amt as u64;
    }
}
