//! Binary/JSON encodings shared by the row-mapping code in this crate.

pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for x in v {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_round_trips() {
        let v = vec![0.1f32, -0.2, 3.5, 0.0];
        let bytes = encode_embedding(&v);
        let back = decode_embedding(&bytes);
        assert_eq!(v, back);
    }
}
