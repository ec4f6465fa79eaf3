//! Frame codec: snappy block compression around a protobuf `WriteBatch`.

use std::sync::Arc;

use prost::Message;

use crate::error::{DecodeStage, Error, Result};
use crate::pool::BufferPool;
use crate::proto::WriteBatch;

/// Default cap on the decompressed size of one frame (64 MiB).
pub const DEFAULT_MAX_DECODED_BYTES: usize = 64 * 1024 * 1024;

/// Upper bound on snappy's expansion: a 3-byte copy emits at most 64 bytes.
const MAX_EXPANSION_RATIO: usize = 22;

/// Decodes compressed remote-write frames into [`WriteBatch`]es.
///
/// Decompression goes through a pooled scratch buffer. A frame whose
/// snappy header declares more than `max_decoded_bytes` is refused before
/// anything is allocated.
pub struct FrameDecoder {
    pool: Arc<BufferPool>,
    max_decoded_bytes: usize,
}

impl FrameDecoder {
    pub fn new(pool: Arc<BufferPool>, max_decoded_bytes: usize) -> Self {
        Self {
            pool,
            max_decoded_bytes,
        }
    }

    /// Decompresses and deserializes one frame.
    ///
    /// Fails with a [`DecodeStage::Decompress`] or
    /// [`DecodeStage::Deserialize`] error. No shared state is touched on
    /// failure.
    pub fn decode(&self, compressed: &[u8]) -> Result<WriteBatch> {
        let decoded_len = snap::raw::decompress_len(compressed)
            .map_err(|e| Error::decode(DecodeStage::Decompress, e))?;
        if decoded_len > self.max_decoded_bytes {
            return Err(Error::decode(
                DecodeStage::Decompress,
                format!(
                    "decoded length {} exceeds limit of {} bytes",
                    decoded_len, self.max_decoded_bytes
                ),
            ));
        }
        let max_possible = compressed.len().saturating_mul(MAX_EXPANSION_RATIO);
        if decoded_len > max_possible {
            return Err(Error::decode(
                DecodeStage::Decompress,
                format!(
                    "decoded length {} cannot come from {} compressed bytes",
                    decoded_len,
                    compressed.len()
                ),
            ));
        }

        let mut scratch = self.pool.acquire(decoded_len);
        scratch.resize(decoded_len, 0);
        let written = snap::raw::Decoder::new()
            .decompress(compressed, scratch.as_mut_slice())
            .map_err(|e| Error::decode(DecodeStage::Decompress, e))?;

        WriteBatch::decode(&scratch[..written])
            .map_err(|e| Error::decode(DecodeStage::Deserialize, e))
    }
}

/// Serializes and compresses a batch into a frame [`FrameDecoder`] accepts.
pub fn encode_frame(batch: &WriteBatch) -> Result<Vec<u8>> {
    let raw = batch.encode_to_vec();
    snap::raw::Encoder::new()
        .compress_vec(&raw)
        .map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Label, Sample, TimeSeries};

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(Arc::new(BufferPool::default()), DEFAULT_MAX_DECODED_BYTES)
    }

    fn batch() -> WriteBatch {
        WriteBatch {
            timeseries: vec![
                TimeSeries {
                    labels: vec![
                        Label::new("__name__", "ahfu_metric_1"),
                        Label::new("job", "job1"),
                        Label::new("instance", "container111"),
                    ],
                    samples: vec![Sample::new(1000, 123.456), Sample::new(2000, 124.0)],
                },
                TimeSeries {
                    labels: vec![Label::new("__name__", "up")],
                    samples: vec![Sample::new(1500, 1.0)],
                },
            ],
        }
    }

    #[test]
    fn should_decode_encoded_frame() {
        // given
        let original = batch();
        let frame = encode_frame(&original).unwrap();

        // when
        let decoded = decoder().decode(&frame).unwrap();

        // then
        assert_eq!(decoded, original);
        assert_eq!(decoded.sample_count(), 3);
    }

    #[test]
    fn should_decode_empty_batch() {
        // given
        let frame = encode_frame(&WriteBatch::default()).unwrap();

        // when
        let decoded = decoder().decode(&frame).unwrap();

        // then
        assert!(decoded.timeseries.is_empty());
    }

    #[test]
    fn should_fail_decompress_on_garbage() {
        // given
        let garbage = [0xffu8; 8];

        // when
        let err = decoder().decode(&garbage).unwrap_err();

        // then
        assert!(matches!(
            err,
            Error::Decode {
                stage: DecodeStage::Decompress,
                ..
            }
        ));
    }

    #[test]
    fn should_fail_deserialize_on_invalid_protobuf() {
        // given
        let frame = snap::raw::Encoder::new()
            .compress_vec(&[0xff, 0xff, 0xff])
            .unwrap();

        // when
        let err = decoder().decode(&frame).unwrap_err();

        // then
        assert!(matches!(
            err,
            Error::Decode {
                stage: DecodeStage::Deserialize,
                ..
            }
        ));
    }

    #[test]
    fn should_refuse_frame_larger_than_limit() {
        // given
        let decoder = FrameDecoder::new(Arc::new(BufferPool::default()), 16);
        let frame = encode_frame(&batch()).unwrap();

        // when
        let err = decoder.decode(&frame).unwrap_err();

        // then
        assert!(err.to_string().contains("exceeds limit of 16 bytes"));
    }

    #[test]
    fn should_refuse_length_header_the_payload_cannot_fill() {
        // given
        let pool = Arc::new(BufferPool::default());
        assert!(pool.release(Vec::with_capacity(pool.buffer_size())));
        let decoder = FrameDecoder::new(pool.clone(), DEFAULT_MAX_DECODED_BYTES);
        let mut frame = Vec::new();
        let mut declared = 60 * 1024 * 1024u64;
        while declared >= 0x80 {
            frame.push(declared as u8 | 0x80);
            declared >>= 7;
        }
        frame.push(declared as u8);
        frame.push(0xff);

        // when
        let err = decoder.decode(&frame).unwrap_err();

        // then
        assert!(matches!(
            err,
            Error::Decode {
                stage: DecodeStage::Decompress,
                ..
            }
        ));
        assert!(err.to_string().contains("cannot come from 5 compressed bytes"));
        // the pooled buffer was never checked out and grown
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn should_decode_highly_compressible_frame() {
        // given
        let batch = WriteBatch {
            timeseries: vec![TimeSeries {
                labels: vec![Label::new("__name__", "a".repeat(64 * 1024))],
                samples: vec![Sample::new(0, 0.0)],
            }],
        };
        let frame = encode_frame(&batch).unwrap();

        // when
        let decoded = decoder().decode(&frame).unwrap();

        // then
        assert_eq!(decoded, batch);
    }

    #[test]
    fn should_return_scratch_buffer_to_pool() {
        // given
        let pool = Arc::new(BufferPool::default());
        let decoder = FrameDecoder::new(pool.clone(), DEFAULT_MAX_DECODED_BYTES);
        let frame = encode_frame(&batch()).unwrap();

        // when
        decoder.decode(&frame).unwrap();
        let _ = decoder.decode(&[0xffu8; 8]);

        // then
        assert_eq!(pool.idle(), 1);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_series() -> impl Strategy<Value = TimeSeries> {
            (
                prop::collection::vec(("[a-z_]{1,12}", "\\PC{0,24}"), 0..6),
                any::<i32>(),
                prop::collection::vec((1i64..60_000, -1e12f64..1e12), 0..20),
            )
                .prop_map(|(labels, start, steps)| {
                    let mut timestamp = i64::from(start);
                    let samples = steps
                        .into_iter()
                        .map(|(step, value)| {
                            timestamp += step;
                            Sample::new(timestamp, value)
                        })
                        .collect();
                    TimeSeries {
                        labels: labels
                            .into_iter()
                            .map(|(name, value)| Label::new(name, value))
                            .collect(),
                        samples,
                    }
                })
        }

        proptest! {
            #[test]
            fn should_reproduce_batch_after_encode_and_decode(
                timeseries in prop::collection::vec(arb_series(), 0..8),
            ) {
                let batch = WriteBatch { timeseries };

                let frame = encode_frame(&batch).unwrap();
                let decoded = decoder().decode(&frame).unwrap();

                prop_assert_eq!(decoded, batch);
            }
        }
    }
}
