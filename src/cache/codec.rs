use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};

use crate::utils::{CacheError, CacheResult};

const FORMAT_RAW: u8 = 0;
const FORMAT_LZ4: u8 = 1;

/// Encodes cached values: JSON payload behind a one-byte format header,
/// lz4-compressed once it grows past the threshold.
///
/// JSON keeps self-describing shapes (`serde_json::Value`, skipped fields,
/// untagged and flattened enums) decodable.
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    compression: bool,
    threshold: usize,
}

impl ValueCodec {
    pub fn new(compression: bool, threshold: usize) -> Self {
        Self {
            compression,
            threshold,
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<Bytes> {
        let serialized = serde_json::to_vec(value)?;

        if self.compression && serialized.len() > self.threshold {
            // prepend_size = true so decode doesn't need the original length
            let compressed = lz4::block::compress(&serialized, None, true)?;
            if compressed.len() < serialized.len() {
                return Ok(frame(FORMAT_LZ4, &compressed));
            }
        }

        Ok(frame(FORMAT_RAW, &serialized))
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        let (format, body) = bytes
            .split_first()
            .ok_or_else(|| CacheError::Codec("empty payload".to_string()))?;

        match *format {
            FORMAT_RAW => Ok(serde_json::from_slice(body)?),
            FORMAT_LZ4 => {
                let decompressed = lz4::block::decompress(body, None)
                    .map_err(|e| CacheError::Codec(e.to_string()))?;
                Ok(serde_json::from_slice(&decompressed)?)
            }
            other => Err(CacheError::Codec(format!("unknown payload format {}", other))),
        }
    }
}

fn frame(format: u8, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_u8(format);
    buf.put_slice(body);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::{json, Value};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Prediction {
        algorithm: String,
        numbers: Vec<u8>,
        confidence: f64,
    }

    fn sample() -> Prediction {
        Prediction {
            algorithm: "frequency".to_string(),
            numbers: vec![3, 11, 19, 27, 35, 42],
            confidence: 0.31,
        }
    }

    #[test]
    fn test_small_values_stay_raw() {
        let codec = ValueCodec::new(true, 512);
        let bytes = codec.encode(&sample()).unwrap();
        assert_eq!(bytes[0], FORMAT_RAW);
        assert_eq!(codec.decode::<Prediction>(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_large_values_are_compressed() {
        let codec = ValueCodec::new(true, 64);
        let history: Vec<u32> = vec![7; 4096];
        let bytes = codec.encode(&history).unwrap();

        assert_eq!(bytes[0], FORMAT_LZ4);
        assert!(bytes.len() < 4096);
        assert_eq!(codec.decode::<Vec<u32>>(&bytes).unwrap(), history);
    }

    #[test]
    fn test_compression_disabled() {
        let codec = ValueCodec::new(false, 0);
        let history: Vec<u32> = vec![7; 4096];
        let bytes = codec.encode(&history).unwrap();
        assert_eq!(bytes[0], FORMAT_RAW);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ticket {
        numbers: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bonus: Option<u8>,
        #[serde(flatten)]
        meta: Meta,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    enum Meta {
        Draw { draw_id: u32 },
        Label { label: String },
    }

    #[test]
    fn test_json_values_roundtrip() {
        let codec = ValueCodec::new(true, 512);
        let value = json!({"numbers": [1, 2, 3], "algo": "frequency", "weights": {"hot": 0.7}});
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode::<Value>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_skipped_and_flattened_fields_roundtrip() {
        let codec = ValueCodec::new(true, 512);
        let tickets = vec![
            Ticket {
                numbers: vec![5, 9, 13],
                bonus: None,
                meta: Meta::Draw { draw_id: 1204 },
            },
            Ticket {
                numbers: vec![2, 4, 6],
                bonus: Some(8),
                meta: Meta::Label {
                    label: "lucky".to_string(),
                },
            },
        ];
        let bytes = codec.encode(&tickets).unwrap();
        assert_eq!(codec.decode::<Vec<Ticket>>(&bytes).unwrap(), tickets);
    }

    #[test]
    fn test_compressed_json_roundtrip() {
        let codec = ValueCodec::new(true, 64);
        let draws: Vec<Value> = (0..200)
            .map(|draw| json!({"draw": draw, "numbers": [1, 2, 3, 4, 5, 6]}))
            .collect();
        let value = json!({ "history": draws });
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(bytes[0], FORMAT_LZ4);
        assert_eq!(codec.decode::<Value>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        let codec = ValueCodec::new(true, 64);
        assert!(matches!(codec.decode::<Prediction>(&[]), Err(CacheError::Codec(_))));
        assert!(matches!(codec.decode::<Prediction>(&[9, 1, 2]), Err(CacheError::Codec(_))));
        assert!(matches!(
            codec.decode::<Prediction>(&[FORMAT_RAW, b'{']),
            Err(CacheError::Codec(_))
        ));
    }
}
