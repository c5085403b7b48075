//! Dense matrix blob codec: `u32 rows | u32 cols | rows*cols f32`, little endian.

use ndarray::Array2;

use crate::error::EngineError;

const HEADER_LEN: usize = 8;

pub fn encode_matrix(m: &Array2<f32>) -> Vec<u8> {
    let (rows, cols) = m.dim();
    let mut out = Vec::with_capacity(HEADER_LEN + rows * cols * 4);
    out.extend_from_slice(&(rows as u32).to_le_bytes());
    out.extend_from_slice(&(cols as u32).to_le_bytes());
    for x in m.iter() {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn decode_matrix(key: &str, bytes: &[u8]) -> Result<Array2<f32>, EngineError> {
    let invalid = |why: String| EngineError::ArtifactInvalid(format!("{key}: {why}"));

    if bytes.len() < HEADER_LEN {
        return Err(invalid(format!("{} bytes is shorter than the header", bytes.len())));
    }
    let rows = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let cols = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let body = &bytes[HEADER_LEN..];

    let Some(needed) = rows.checked_mul(cols).and_then(|n| n.checked_mul(4)) else {
        return Err(invalid(format!("{rows}x{cols} header overflows")));
    };
    if body.len() != needed {
        return Err(invalid(format!(
            "{rows}x{cols} needs {needed} body bytes, found {}",
            body.len()
        )));
    }

    let data: Vec<f32> = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Array2::from_shape_vec((rows, cols), data).map_err(|e| invalid(e.to_string()))
}
