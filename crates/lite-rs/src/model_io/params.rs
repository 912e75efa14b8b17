//! Binary parameter file.
//!
//! Layout, all integers little-endian:
//! `magic[8] | version u32 | count u32 | record* | blake3[32]`, where a record
//! is `name_len u32 | name | dtype_tag u32 | rank u32 | dims u64* | payload`.
//! The digest covers every byte before it.

use super::ModelIoError;
use crate::tensor::{DType, Tensor, TensorData};
use half::f16;

pub const PARAMS_MAGIC: &[u8; 8] = b"LITERSPM";
pub const PARAMS_VERSION: u32 = 1;

const DIGEST_LEN: usize = 32;

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_payload(out: &mut Vec<u8>, data: &TensorData) {
    match data {
        TensorData::F32(values) => values.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        TensorData::F16(values) => values.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        TensorData::I8(values) => values.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        TensorData::I32(values) => values.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        TensorData::I64(values) => values.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        TensorData::Bool(values) => values.iter().for_each(|v| out.push(u8::from(*v))),
    }
}

/// Serializes named tensors into the parameter file format.
pub fn encode_params<'a, I>(params: I) -> Result<Vec<u8>, ModelIoError>
where
    I: IntoIterator<Item = (&'a str, &'a Tensor)>,
{
    let params: Vec<(&str, &Tensor)> = params.into_iter().collect();
    let mut out = Vec::new();
    out.extend_from_slice(PARAMS_MAGIC);
    put_u32(&mut out, PARAMS_VERSION);
    put_u32(&mut out, len_u32(params.len(), "tensor count")?);
    for (name, tensor) in params {
        if !tensor.is_initialized() {
            return Err(ModelIoError::MalformedTensor(format!(
                "parameter `{name}` has no value"
            )));
        }
        put_u32(&mut out, len_u32(name.len(), "name length")?);
        out.extend_from_slice(name.as_bytes());
        put_u32(&mut out, tensor.dtype().tag());
        put_u32(&mut out, len_u32(tensor.dims().len(), "rank")?);
        for &dim in tensor.dims() {
            put_u64(&mut out, dim as u64);
        }
        put_payload(&mut out, tensor.data());
    }
    let digest = blake3::hash(&out);
    out.extend_from_slice(digest.as_bytes());
    Ok(out)
}

fn len_u32(len: usize, what: &str) -> Result<u32, ModelIoError> {
    u32::try_from(len).map_err(|_| ModelIoError::MalformedTensor(format!("{what} {len} overflows u32")))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], ModelIoError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| ModelIoError::MalformedTensor(format!("truncated {what}")))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &str) -> Result<u32, ModelIoError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self, what: &str) -> Result<u64, ModelIoError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, what)?);
        Ok(u64::from_le_bytes(buf))
    }
}

fn read_payload(cursor: &mut Cursor<'_>, dtype: DType, len: usize) -> Result<TensorData, ModelIoError> {
    let byte_len = len
        .checked_mul(dtype.size_in_bytes())
        .ok_or_else(|| ModelIoError::MalformedTensor("payload size overflows".to_string()))?;
    let raw = cursor.take(byte_len, "tensor payload")?;
    let data = match dtype {
        DType::F32 => TensorData::F32(
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::F16 => TensorData::F16(
            raw.chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        DType::I8 => TensorData::I8(raw.iter().map(|&b| b as i8).collect()),
        DType::I32 => TensorData::I32(
            raw.chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        DType::I64 => TensorData::I64(
            raw.chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
        DType::Bool => TensorData::Bool(raw.iter().map(|&b| b != 0).collect()),
    };
    Ok(data)
}

/// Parses a parameter file, verifying the header and the trailing digest.
pub fn decode_params(bytes: &[u8]) -> Result<Vec<(String, Tensor)>, ModelIoError> {
    if bytes.len() < PARAMS_MAGIC.len() || &bytes[..PARAMS_MAGIC.len()] != PARAMS_MAGIC {
        return Err(ModelIoError::BadMagic);
    }
    if bytes.len() < PARAMS_MAGIC.len() + 4 + DIGEST_LEN {
        return Err(ModelIoError::MalformedTensor("file is truncated".to_string()));
    }
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if blake3::hash(body).as_bytes() != digest {
        return Err(ModelIoError::DigestMismatch);
    }

    let mut cursor = Cursor {
        bytes: body,
        pos: PARAMS_MAGIC.len(),
    };
    let version = cursor.u32("version")?;
    if version != PARAMS_VERSION {
        return Err(ModelIoError::UnsupportedVersion(version));
    }
    let count = cursor.u32("tensor count")? as usize;
    let mut params = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let name_len = cursor.u32("name length")? as usize;
        let name = std::str::from_utf8(cursor.take(name_len, "name")?)
            .map_err(|_| ModelIoError::MalformedTensor("name is not utf-8".to_string()))?
            .to_string();
        let tag = cursor.u32("dtype")?;
        let dtype = DType::from_tag(tag).ok_or_else(|| {
            ModelIoError::MalformedTensor(format!("`{name}` has unknown dtype tag {tag}"))
        })?;
        let rank = cursor.u32("rank")? as usize;
        let mut dims = Vec::with_capacity(rank.min(16));
        for _ in 0..rank {
            let dim = cursor.u64("dim")?;
            dims.push(usize::try_from(dim).map_err(|_| {
                ModelIoError::MalformedTensor(format!("`{name}` dim {dim} overflows"))
            })?);
        }
        let len = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| ModelIoError::MalformedTensor(format!("`{name}` is too large")))?;
        let data = read_payload(&mut cursor, dtype, len)?;
        let tensor = Tensor::from_data(dims, data)
            .map_err(|err| ModelIoError::MalformedTensor(format!("`{name}`: {err}")))?;
        params.push((name, tensor));
    }
    if cursor.pos != body.len() {
        return Err(ModelIoError::MalformedTensor(
            "trailing bytes after the last record".to_string(),
        ));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(String, Tensor)> {
        vec![
            ("w".to_string(), Tensor::from_f32([2, 2], vec![1.0, -2.0, 3.5, 0.25]).unwrap()),
            ("idx".to_string(), Tensor::from_i64([3], vec![7, -1, 42]).unwrap()),
        ]
    }

    #[test]
    fn decodes_what_it_encodes() {
        let params = sample();
        let bytes = encode_params(params.iter().map(|(n, t)| (n.as_str(), t))).unwrap();
        assert_eq!(&bytes[..8], PARAMS_MAGIC);
        assert_eq!(decode_params(&bytes).unwrap(), params);
    }

    #[test]
    fn corrupted_payload_fails_the_digest() {
        let params = sample();
        let mut bytes = encode_params(params.iter().map(|(n, t)| (n.as_str(), t))).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(matches!(decode_params(&bytes), Err(ModelIoError::DigestMismatch)));
    }

    #[test]
    fn foreign_files_are_rejected() {
        assert!(matches!(decode_params(b"NOTPARAM\0\0\0\0"), Err(ModelIoError::BadMagic)));
        assert!(matches!(decode_params(b""), Err(ModelIoError::BadMagic)));
    }
}
