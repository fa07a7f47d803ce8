//! The four fixture formats and their content builders.
//!
//! Content is fully deterministic: every call to [`FixtureFormat::build`]
//! returns the same bytes.

use std::fmt;

use crate::pickle::{self, PickleError, Value};

/// HDF5 superblock signature (`\x89HDF\r\n\x1a\n`).
pub const HDF5_SIGNATURE: [u8; 8] = [0x89, 0x48, 0x44, 0x46, 0x0d, 0x0a, 0x1a, 0x0a];
/// Tag written at the start of the ONNX-like fixture.
pub const ONNX_HEADER: [u8; 8] = *b"onnx\0\0\0\0";

const KERAS_PADDING: usize = 10_000;
const KERAS_LAYERS: u32 = 5;
const ONNX_PADDING: usize = 5_000;
const ONNX_GRAPH: [&str; 6] = [
    "ir_version: 8\n",
    "graph {\n",
    "  node { op_type: \"Conv\" }\n",
    "  node { op_type: \"Relu\" }\n",
    "  node { op_type: \"MaxPool\" }\n",
    "}\n",
];

/// Protocol pinned for the PyTorch fixture so output is reproducible.
pub const PYTORCH_PROTOCOL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixtureFormat {
    Keras,
    PyTorch,
    Onnx,
    Pickle,
}

impl FixtureFormat {
    /// Generation order.
    pub const ALL: [FixtureFormat; 4] = [
        FixtureFormat::Keras,
        FixtureFormat::PyTorch,
        FixtureFormat::Onnx,
        FixtureFormat::Pickle,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Keras => "sample_model.h5",
            Self::PyTorch => "sample_model.pt",
            Self::Onnx => "sample_model.onnx",
            Self::Pickle => "sample_model.pkl",
        }
    }

    /// Real-world framework the fixture stands in for.
    pub fn framework(self) -> &'static str {
        match self {
            Self::Keras => "TensorFlow/Keras",
            Self::PyTorch => "PyTorch",
            Self::Onnx => "ONNX",
            Self::Pickle => "Pickle",
        }
    }

    pub fn signature(self) -> Signature {
        match self {
            Self::Keras => Signature::Hdf5,
            Self::Onnx => Signature::OnnxTag,
            Self::PyTorch => Signature::Pickle {
                protocol: PYTORCH_PROTOCOL,
            },
            Self::Pickle => Signature::Pickle {
                protocol: pickle::DEFAULT_PROTOCOL,
            },
        }
    }

    /// Exact size for raw fixtures; pickles have no fixed size.
    pub fn expected_len(self) -> Option<usize> {
        match self {
            Self::Keras => Some(HDF5_SIGNATURE.len() + KERAS_PADDING + keras_layer_tags().len()),
            Self::Onnx => Some(ONNX_HEADER.len() + onnx_graph_text().len() + ONNX_PADDING),
            Self::PyTorch | Self::Pickle => None,
        }
    }

    /// Value encoded by the pickle-backed fixtures.
    pub fn pickle_value(self) -> Option<Value> {
        match self {
            Self::PyTorch => Some(pytorch_checkpoint()),
            Self::Pickle => Some(classifier_metadata()),
            Self::Keras | Self::Onnx => None,
        }
    }

    pub fn build(self) -> Result<Vec<u8>, PickleError> {
        match self {
            Self::Keras => Ok(keras_bytes()),
            Self::PyTorch => pickle::to_vec(&pytorch_checkpoint(), PYTORCH_PROTOCOL),
            Self::Onnx => Ok(onnx_bytes()),
            Self::Pickle => pickle::to_vec(&classifier_metadata(), pickle::DEFAULT_PROTOCOL),
        }
    }
}

impl fmt::Display for FixtureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keras => write!(f, "Keras"),
            Self::PyTorch => write!(f, "PyTorch"),
            Self::Onnx => write!(f, "ONNX"),
            Self::Pickle => write!(f, "Pickle"),
        }
    }
}

/// Leading bytes that identify a fixture on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Hdf5,
    OnnxTag,
    Pickle { protocol: u8 },
}

impl Signature {
    /// Identify a signature from the first bytes of a file.
    pub fn sniff(data: &[u8]) -> Option<Signature> {
        if data.starts_with(&HDF5_SIGNATURE) {
            return Some(Signature::Hdf5);
        }
        if data.starts_with(&ONNX_HEADER) {
            return Some(Signature::OnnxTag);
        }
        match data {
            [0x80, protocol, ..] if (2..=5).contains(protocol) => Some(Signature::Pickle {
                protocol: *protocol,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hdf5 => write!(f, "HDF5 signature"),
            Self::OnnxTag => write!(f, "ONNX tag"),
            Self::Pickle { protocol } => write!(f, "pickle protocol {protocol}"),
        }
    }
}

fn keras_layer_tags() -> Vec<u8> {
    let mut tags = Vec::new();
    for i in 0..KERAS_LAYERS {
        tags.extend_from_slice(format!("layer_{i}").as_bytes());
        tags.extend_from_slice(&(1000 * (i + 1)).to_le_bytes());
    }
    tags
}

fn keras_bytes() -> Vec<u8> {
    let mut out = Vec::with_capacity(HDF5_SIGNATURE.len() + KERAS_PADDING + 64);
    out.extend_from_slice(&HDF5_SIGNATURE);
    out.resize(out.len() + KERAS_PADDING, 0);
    out.extend_from_slice(&keras_layer_tags());
    out
}

fn onnx_graph_text() -> String {
    ONNX_GRAPH.concat()
}

fn onnx_bytes() -> Vec<u8> {
    let mut out = Vec::with_capacity(ONNX_HEADER.len() + 128 + ONNX_PADDING);
    out.extend_from_slice(&ONNX_HEADER);
    out.extend_from_slice(onnx_graph_text().as_bytes());
    out.resize(out.len() + ONNX_PADDING, 0);
    out
}

fn int_range(n: i64) -> Value {
    Value::from((0..n).collect::<Vec<i64>>())
}

/// Fake `torch.save`-style checkpoint: a state dict plus model info.
pub fn pytorch_checkpoint() -> Value {
    Value::dict([
        (
            "state_dict",
            Value::dict([
                ("layer1.weight", int_range(1000)),
                ("layer1.bias", int_range(100)),
                ("layer2.weight", int_range(2000)),
                ("layer2.bias", int_range(200)),
            ]),
        ),
        (
            "model_info",
            Value::dict([
                ("architecture", Value::from("Sequential")),
                ("layers", Value::from(vec!["Linear", "ReLU", "Linear"])),
            ]),
        ),
    ])
}

/// Fake scikit-learn random forest metadata.
pub fn classifier_metadata() -> Value {
    Value::dict([
        ("model_type", Value::from("RandomForestClassifier")),
        ("n_estimators", Value::from(100_i64)),
        ("max_depth", Value::from(10_i64)),
        (
            "features",
            Value::from((0..20).map(|i| format!("feature_{i}")).collect::<Vec<_>>()),
        ),
        ("classes", Value::from(vec!["class_0", "class_1"])),
        ("feature_importances", Value::from(vec![0.05_f64; 20])),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn keras_layout() {
        let bytes = FixtureFormat::Keras.build().unwrap();
        assert_eq!(bytes.len(), 10_063);
        assert_eq!(Some(bytes.len()), FixtureFormat::Keras.expected_len());
        assert_eq!(&bytes[..8], &HDF5_SIGNATURE);
        assert!(bytes[8..8 + KERAS_PADDING].iter().all(|&b| b == 0));

        let tags = &bytes[8 + KERAS_PADDING..];
        assert_eq!(&tags[..7], b"layer_0");
        assert_eq!(u32::from_le_bytes(tags[7..11].try_into().unwrap()), 1000);
        assert_eq!(&tags[44..51], b"layer_4");
        assert_eq!(u32::from_le_bytes(tags[51..55].try_into().unwrap()), 5000);
    }

    #[test]
    fn onnx_layout() {
        let bytes = FixtureFormat::Onnx.build().unwrap();
        assert_eq!(bytes.len(), 5_116);
        assert_eq!(Some(bytes.len()), FixtureFormat::Onnx.expected_len());
        assert_eq!(&bytes[..8], b"onnx\0\0\0\0");

        let text = std::str::from_utf8(&bytes[8..116]).unwrap();
        assert!(text.starts_with("ir_version: 8\ngraph {\n"));
        assert!(text.contains("  node { op_type: \"MaxPool\" }\n"));
        assert!(text.ends_with("}\n"));
        assert!(bytes[116..].iter().all(|&b| b == 0));
    }

    #[test]
    fn pickle_fixtures_start_with_framed_protocol_4() {
        for format in [FixtureFormat::PyTorch, FixtureFormat::Pickle] {
            let bytes = format.build().unwrap();
            assert_eq!(&bytes[..3], &[0x80u8, 0x04, 0x95], "{format}");
            assert_eq!(Signature::sniff(&bytes), Some(format.signature()));
        }
    }

    #[test]
    fn pickle_fixtures_match_cpython_bytes() {
        // len() and sha256 of pickle.dumps(...) for the same values under CPython 3.
        let cases = [
            (
                FixtureFormat::PyTorch,
                9_275,
                "32f6b3bcd0b98ba21cf8a4ef4c1ca9edd959d73986cc4ce663034ce57494f18c",
            ),
            (
                FixtureFormat::Pickle,
                590,
                "d75b7c3d4be8e17284aceab4738b119d0d5dcb7b8eccdb66dfddf5ffad92940f",
            ),
        ];
        for (format, len, digest) in cases {
            let bytes = format.build().unwrap();
            assert_eq!(bytes.len(), len, "{format}");
            let hex: String = Sha256::digest(&bytes)
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect();
            assert_eq!(hex, digest, "{format}");
        }
    }

    #[test]
    fn pytorch_checkpoint_shape() {
        let value = pytorch_checkpoint();
        let state = value.get("state_dict").unwrap();
        let lens: Vec<usize> = ["layer1.weight", "layer1.bias", "layer2.weight", "layer2.bias"]
            .iter()
            .map(|k| state.get(k).and_then(Value::as_list).map_or(0, |l| l.len()))
            .collect();
        assert_eq!(lens, vec![1000, 100, 2000, 200]);

        let weights = state.get("layer2.weight").and_then(Value::as_list).unwrap();
        assert_eq!(weights[0], Value::Int(0));
        assert_eq!(weights[1999], Value::Int(1999));

        let info = value.get("model_info").unwrap();
        assert_eq!(
            info.get("architecture").and_then(Value::as_str),
            Some("Sequential")
        );
    }

    #[test]
    fn classifier_metadata_fields() {
        let value = classifier_metadata();
        assert_eq!(value.get("n_estimators").and_then(Value::as_i64), Some(100));
        assert_eq!(value.get("max_depth").and_then(Value::as_i64), Some(10));
        let features = value.get("features").and_then(Value::as_list).unwrap();
        assert_eq!(features.len(), 20);
        assert_eq!(features[19].as_str(), Some("feature_19"));
    }

    #[test]
    fn builds_are_deterministic() {
        for format in FixtureFormat::ALL {
            assert_eq!(format.build().unwrap(), format.build().unwrap(), "{format}");
        }
    }

    #[test]
    fn sniff_recognizes_each_signature() {
        assert_eq!(Signature::sniff(&HDF5_SIGNATURE), Some(Signature::Hdf5));
        assert_eq!(Signature::sniff(b"onnx\0\0\0\0rest"), Some(Signature::OnnxTag));
        assert_eq!(
            Signature::sniff(&[0x80, 0x03, b']']),
            Some(Signature::Pickle { protocol: 3 })
        );
        assert_eq!(Signature::sniff(b"onnx"), None);
        assert_eq!(Signature::sniff(&[]), None);
    }
}
