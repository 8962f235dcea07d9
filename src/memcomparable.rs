//! Order-preserving byte-string encoding.
//!
//! An element is written in 8-byte chunks, each followed by one tag byte:
//! `9` when another chunk follows, otherwise the number of significant
//! bytes in the final (zero-padded) chunk. Comparing two encoded elements
//! with `memcmp` therefore matches their logical comparison, with a
//! shorter element ordering before any strict extension of itself, and
//! concatenated encodings compare like the element sequences they came
//! from.

const ESCAPE_LENGTH: usize = 9;

/// Size of the encoding of a `length`-byte element. An empty element still
/// takes one full block.
pub fn encoded_size(length: usize) -> usize {
    (length + (ESCAPE_LENGTH - 1)) / (ESCAPE_LENGTH - 1) * ESCAPE_LENGTH
}

pub fn encode(src: &[u8], dst: &mut Vec<u8>) {
    let mut rest = src;
    loop {
        let copy_len = (ESCAPE_LENGTH - 1).min(rest.len());
        dst.extend_from_slice(&rest[..copy_len]);
        rest = &rest[copy_len..];
        if rest.is_empty() {
            let pad_size = ESCAPE_LENGTH - 1 - copy_len;
            dst.resize(dst.len() + pad_size, 0);
            dst.push(copy_len as u8);
            break;
        }
        dst.push(ESCAPE_LENGTH as u8);
    }
}

/// Decodes one element from the front of `src` into `dst` and returns the
/// remainder of `src`.
pub fn decode<'a>(src: &'a [u8], dst: &mut Vec<u8>) -> &'a [u8] {
    let mut rest = src;
    loop {
        let extra = rest[ESCAPE_LENGTH - 1];
        let length = (ESCAPE_LENGTH - 1).min(extra as usize);
        dst.extend_from_slice(&rest[..length]);
        rest = &rest[ESCAPE_LENGTH..];
        if (extra as usize) < ESCAPE_LENGTH {
            break;
        }
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(src: &[u8]) -> Vec<u8> {
        let mut dst = Vec::with_capacity(encoded_size(src.len()));
        encode(src, &mut dst);
        dst
    }

    #[test]
    fn test_round_trip() {
        let org1 = b"helloworld!memcomparable".as_slice();
        let org2 = b"foobarbazhogehuga".as_slice();

        let mut enc = Vec::with_capacity(encoded_size(org1.len()) + encoded_size(org2.len()));
        encode(org1, &mut enc);
        encode(org2, &mut enc);

        let mut dec1 = Vec::new();
        let rest = decode(&enc, &mut dec1);
        assert_eq!(org1, dec1.as_slice());
        let mut dec2 = Vec::new();
        let rest = decode(rest, &mut dec2);
        assert_eq!(org2, dec2.as_slice());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_empty_element() {
        let enc = encode_one(b"");
        assert_eq!(ESCAPE_LENGTH, enc.len());
        let mut dec = Vec::new();
        let rest = decode(&enc, &mut dec);
        assert!(dec.is_empty());
        assert!(rest.is_empty());
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(9, encoded_size(0));
        assert_eq!(9, encoded_size(8));
        assert_eq!(18, encoded_size(9));
        assert_eq!(27, encoded_size(20));
        assert_eq!(encoded_size(21), encode_one(&[0xAA; 21]).len());
    }

    #[test]
    fn test_order_preserved() {
        // Each adjacent pair is ascending in plain byte order; the
        // encodings must compare the same way. Covers the tricky cases:
        // prefixes, zero bytes and block boundaries.
        let ordered: [&[u8]; 8] = [
            b"",
            b"\x00",
            b"\x00\x00",
            b"a",
            b"aaaaaaaa",
            b"aaaaaaaaa",
            b"ab",
            b"b",
        ];
        for pair in ordered.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(
                encode_one(a) < encode_one(b),
                "enc({:?}) must order before enc({:?})",
                a,
                b
            );
        }
    }
}
