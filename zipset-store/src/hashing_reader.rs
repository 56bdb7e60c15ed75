use pin_project_lite::pin_project;
use tokio::io::AsyncRead;

pin_project! {
    /// Wraps an existing AsyncRead and accounts for all data read
    /// "through" it: a configurable content digest, the ZIP CRC-32, and
    /// the byte count.
    pub struct HashingReader<R, H>
    where
        R: AsyncRead,
        H: digest::Digest,
    {
        #[pin]
        inner: R,
        hasher: H,
        crc: crc32fast::Hasher,
        count: u64,
    }
}

impl<R, H> HashingReader<R, H>
where
    R: AsyncRead,
    H: digest::Digest,
{
    pub fn from(r: R) -> Self {
        Self {
            inner: r,
            hasher: H::new(),
            crc: crc32fast::Hasher::new(),
            count: 0,
        }
    }

    /// Bytes read so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Return the digest, the CRC-32 and the total length.
    pub fn finalize(self) -> (digest::Output<H>, u32, u64) {
        (self.hasher.finalize(), self.crc.finalize(), self.count)
    }
}

impl<R, H> tokio::io::AsyncRead for HashingReader<R, H>
where
    R: AsyncRead,
    H: digest::Digest,
{
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let filled_before = buf.filled().len();

        let this = self.project();
        let ret = this.inner.poll_read(cx, buf);

        // account for everything newly filled
        let newly_filled = &buf.filled()[filled_before..];
        this.hasher.update(newly_filled);
        this.crc.update(newly_filled);
        *this.count += newly_filled.len() as u64;

        ret
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use hex_literal::hex;
    use rstest::rstest;
    use sha2::Sha256;

    use super::HashingReader;

    #[rstest]
    #[case::hello(
        b"hello\n".as_slice(),
        hex!("5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"),
        0x363a3020
    )]
    #[case::empty(
        b"".as_slice(),
        hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"),
        0
    )]
    #[tokio::test]
    async fn accounts_for_all_bytes(
        #[case] data: &[u8],
        #[case] sha256: [u8; 32],
        #[case] crc32: u32,
    ) {
        let mut reader = HashingReader::<_, Sha256>::from(Cursor::new(data));
        tokio::io::copy(&mut reader, &mut tokio::io::sink())
            .await
            .expect("read must succeed");

        let (digest, crc, count) = reader.finalize();
        assert_eq!(digest.as_slice(), &sha256);
        assert_eq!(crc, crc32);
        assert_eq!(count, data.len() as u64);
    }
}
