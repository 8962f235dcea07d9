use bincode::{config, Decode, Encode};

/// One key/value entry inside a leaf or branch slot. The serialized form
/// length-prefixes both byte strings, so a pair can be recovered without
/// ambiguity from its slot payload.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Pair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Pair {
    pub fn new(key: &[u8], value: &[u8]) -> Pair {
        Pair {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::encode_to_vec(self, config::standard()).expect("pair encoding cannot fail")
    }

    /// Panics on malformed input: slot payloads are written exclusively by
    /// `to_bytes`, so a decode failure means a corrupt page image.
    pub fn from_bytes(buf: &[u8]) -> Pair {
        let (pair, _) =
            bincode::decode_from_slice(buf, config::standard()).expect("corrupt pair payload");
        pair
    }
}
