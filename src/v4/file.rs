use crate::{
    containers::CompressableBytes,
    derive,
    io::Source,
    v4::{CompressionCodec, Error, Result, Version},
};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use lzzzz::lz4f::{self, AutoFlush, PreferencesBuilder};
use std::io::Write;

/// Common parameters to configure how files are compressed/decompressed.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct CompressionOptions {
    /// The version to compress/decompress the file for.
    pub version: Version,

    /// The codec to use.
    pub compression_codec: CompressionCodec,
}

/// Represents a file within the archive.
#[derive(Default)]
pub struct File<'bytes> {
    pub(crate) container: CompressableBytes<'bytes>,
}

type ReadResult<T> = T;
derive::compressable_bytes!(File => ReadResult);

impl<'bytes> File<'bytes> {
    /// Compresses the contents into a new file.
    ///
    /// The result carries the decompressed size needed to reverse the
    /// operation later.
    pub fn compress(&self, options: &CompressionOptions) -> Result<File<'static>> {
        let mut out = vec![0u8; self.compress_bound(options)?];
        let len = self.compress_into(&mut out, options)?;
        out.truncate(len);
        out.shrink_to_fit();
        Ok(File {
            container: CompressableBytes::from_owned(out, Some(self.len())),
        })
    }

    /// An upper bound on the size `compress_into` may produce for the
    /// current contents.
    pub fn compress_bound(&self, options: &CompressionOptions) -> Result<usize> {
        if self.is_compressed() {
            return Err(Error::AlreadyCompressed);
        }

        match options.compression_codec {
            CompressionCodec::Normal => match options.version {
                Version::v103 | Version::v104 => Ok(Self::zlib_bound(self.len())),
                Version::v105 => Ok(lz4f::max_compressed_size(
                    self.len(),
                    &Self::lz4f_preferences(),
                )),
            },
            CompressionCodec::Xmem => Err(Error::NotImplemented),
        }
    }

    /// Compresses the contents into the given buffer, returning the number
    /// of bytes written.
    pub fn compress_into(&self, out: &mut [u8], options: &CompressionOptions) -> Result<usize> {
        if self.is_compressed() {
            Err(Error::AlreadyCompressed)
        } else {
            match options.compression_codec {
                CompressionCodec::Normal => match options.version {
                    Version::v103 | Version::v104 => self.compress_into_zlib(out),
                    Version::v105 => self.compress_into_lz4(out),
                },
                CompressionCodec::Xmem => Err(Error::NotImplemented),
            }
        }
    }

    /// Decompresses the contents into a new file.
    pub fn decompress(&self, options: &CompressionOptions) -> Result<File<'static>> {
        let Some(decompressed_len) = self.decompressed_len() else {
            return Err(Error::AlreadyDecompressed);
        };

        let mut out = vec![0u8; decompressed_len];
        self.decompress_into(&mut out, options)?;
        Ok(File {
            container: CompressableBytes::from_owned(out, None),
        })
    }

    /// Decompresses the contents into the given buffer, returning the
    /// number of bytes written.
    pub fn decompress_into(&self, out: &mut [u8], options: &CompressionOptions) -> Result<usize> {
        let Some(decompressed_len) = self.decompressed_len() else {
            return Err(Error::AlreadyDecompressed);
        };

        if out.len() < decompressed_len {
            return Err(Error::BufferTooSmall {
                needed: decompressed_len,
                got: out.len(),
            });
        }

        let out_len = match options.compression_codec {
            CompressionCodec::Normal => match options.version {
                Version::v103 | Version::v104 => self.decompress_into_zlib(out),
                Version::v105 => self.decompress_into_lz4(out),
            },
            CompressionCodec::Xmem => Err(Error::NotImplemented),
        }?;

        if out_len == decompressed_len {
            Ok(out_len)
        } else {
            Err(Error::DecompressionSizeMismatch {
                expected: decompressed_len,
                actual: out_len,
            })
        }
    }

    /// Writes the contents of the file into the given stream, decompressing
    /// them first when necessary.
    pub fn write<Out>(&self, stream: &mut Out, options: &CompressionOptions) -> Result<()>
    where
        Out: ?Sized + Write,
    {
        if self.is_compressed() {
            let decompressed = self.decompress(options)?;
            stream.write_all(decompressed.as_bytes())?;
        } else {
            stream.write_all(self.as_bytes())?;
        }

        Ok(())
    }

    #[allow(clippy::unnecessary_wraps)]
    fn do_read<In>(stream: &mut In) -> Result<ReadResult<Self>>
    where
        In: ?Sized + Source<'bytes>,
    {
        Ok(Self {
            container: stream.read_bytes_to_end().into_compressable(None),
        })
    }

    fn lz4f_preferences() -> lz4f::Preferences {
        PreferencesBuilder::new()
            .compression_level(9)
            .auto_flush(AutoFlush::Enabled)
            .build()
    }

    // mirrors zlib's compressBound for the default parameters
    fn zlib_bound(len: usize) -> usize {
        len + (len >> 12) + (len >> 14) + (len >> 25) + 13
    }

    fn compress_into_lz4(&self, out: &mut [u8]) -> Result<usize> {
        let prefs = Self::lz4f_preferences();
        let needed = lz4f::max_compressed_size(self.len(), &prefs);
        if out.len() < needed {
            return Err(Error::BufferTooSmall {
                needed,
                got: out.len(),
            });
        }

        let len = lz4f::compress(self.as_bytes(), out, &prefs)?;
        Ok(len)
    }

    fn compress_into_zlib(&self, out: &mut [u8]) -> Result<usize> {
        let mut compressor = Compress::new(Compression::default(), true);
        let status = compressor.compress(self.as_bytes(), out, FlushCompress::Finish)?;
        match status {
            Status::StreamEnd => Ok(compressor.total_out().try_into()?),
            _ => Err(Error::BufferTooSmall {
                needed: Self::zlib_bound(self.len()),
                got: out.len(),
            }),
        }
    }

    fn decompress_into_lz4(&self, out: &mut [u8]) -> Result<usize> {
        let mut buffer = Vec::new();
        let len = lz4f::decompress_to_vec(self.as_bytes(), &mut buffer)?;
        match out.get_mut(..len) {
            Some(dst) => {
                dst.copy_from_slice(&buffer);
                Ok(len)
            }
            None => Err(Error::DecompressionSizeMismatch {
                expected: out.len(),
                actual: len,
            }),
        }
    }

    fn decompress_into_zlib(&self, out: &mut [u8]) -> Result<usize> {
        let mut decompressor = Decompress::new(true);
        let status = decompressor.decompress(self.as_bytes(), out, FlushDecompress::Finish)?;
        match status {
            Status::StreamEnd => Ok(decompressor.total_out().try_into()?),
            _ => Err(Error::Truncated),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        prelude::*,
        v4::{CompressionCodec, CompressionOptions, Error, File, Version},
    };

    const PAYLOAD: &[u8] = b"The quick brown fox jumps over the lazy dog. \
        The quick brown fox jumps over the lazy dog. \
        The quick brown fox jumps over the lazy dog.";

    #[test]
    fn default_state() {
        let f = File::new();
        assert!(!f.is_compressed());
        assert!(f.is_empty());
        assert_eq!(f.len(), 0);
        assert_eq!(f.as_bytes().len(), 0);
    }

    #[test]
    fn assign_state() {
        let payload = [0u8; 64];
        let f = File::from_decompressed(&payload[..]);
        assert_eq!(f.len(), payload.len());
        assert_eq!(f.as_ptr(), payload.as_ptr());
        assert_eq!(f.as_bytes().len(), payload.len());
        assert_eq!(f.as_bytes().as_ptr(), payload.as_ptr());
    }

    #[test]
    fn zlib_round_trip() -> anyhow::Result<()> {
        for version in [Version::v103, Version::v104] {
            let options = CompressionOptions {
                version,
                ..Default::default()
            };

            let original = File::from_decompressed(PAYLOAD);
            let compressed = original.compress(&options)?;
            assert!(compressed.is_compressed());
            assert_eq!(compressed.decompressed_len(), Some(PAYLOAD.len()));
            assert!(compressed.len() < PAYLOAD.len());

            let decompressed = compressed.decompress(&options)?;
            assert!(decompressed.is_decompressed());
            assert_eq!(decompressed.as_bytes(), PAYLOAD);
        }

        Ok(())
    }

    #[test]
    fn lz4_round_trip() -> anyhow::Result<()> {
        let options = CompressionOptions {
            version: Version::v105,
            ..Default::default()
        };

        let original = File::from_decompressed(PAYLOAD);
        let compressed = original.compress(&options)?;
        assert!(compressed.is_compressed());
        assert_eq!(compressed.decompressed_len(), Some(PAYLOAD.len()));

        let decompressed = compressed.decompress(&options)?;
        assert_eq!(decompressed.as_bytes(), PAYLOAD);

        Ok(())
    }

    #[test]
    fn compression_state_is_a_precondition() {
        let options = CompressionOptions::default();

        let decompressed = File::from_decompressed(PAYLOAD);
        assert!(matches!(
            decompressed.decompress(&options),
            Err(Error::AlreadyDecompressed)
        ));

        let compressed = decompressed.compress(&options).unwrap();
        assert!(matches!(
            compressed.compress(&options),
            Err(Error::AlreadyCompressed)
        ));
    }

    #[test]
    fn into_buffers_respect_their_bounds() -> anyhow::Result<()> {
        let options = CompressionOptions {
            version: Version::v104,
            ..Default::default()
        };

        let original = File::from_decompressed(PAYLOAD);
        let bound = original.compress_bound(&options)?;
        assert!(bound >= PAYLOAD.len());

        let mut tiny = [0u8; 4];
        assert!(matches!(
            original.compress_into(&mut tiny, &options),
            Err(Error::BufferTooSmall { .. })
        ));

        let compressed = original.compress(&options)?;
        assert!(matches!(
            compressed.decompress_into(&mut tiny, &options),
            Err(Error::BufferTooSmall { .. })
        ));

        let mut exact = vec![0u8; PAYLOAD.len()];
        let len = compressed.decompress_into(&mut exact, &options)?;
        assert_eq!(len, PAYLOAD.len());
        assert_eq!(exact, PAYLOAD);

        Ok(())
    }

    #[test]
    fn xmem_is_not_implemented() {
        let options = CompressionOptions {
            version: Version::v104,
            compression_codec: CompressionCodec::Xmem,
        };

        let file = File::from_decompressed(PAYLOAD);
        assert!(matches!(
            file.compress_bound(&options),
            Err(Error::NotImplemented)
        ));
        assert!(matches!(
            file.compress(&options),
            Err(Error::NotImplemented)
        ));

        let compressed = File::from_compressed(PAYLOAD, 1024);
        assert!(matches!(
            compressed.decompress(&options),
            Err(Error::NotImplemented)
        ));
    }
}
