//! Minimal NumPy `.npy` codec for `int8` tensors.
//!
//! Files use format version 1.0: the magic string, a little-endian `u16`
//! header length and a Python dict literal describing dtype, order and
//! shape, padded with spaces and a trailing newline to a 64-byte boundary.
//! The data follows in C order.

use std::io::{Read, Write};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const PREAMBLE_LEN: usize = MAGIC.len() + 2 + 2;
const ALIGNMENT: usize = 64;
const DESCR: &str = "|i1";

/// Errors raised by the codec.
#[derive(Debug, thiserror::Error)]
pub enum NpyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not an npy file")]
    BadMagic,
    #[error("unsupported npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),
    #[error("malformed header: {0}")]
    BadHeader(String),
    #[error("unsupported dtype {0}, expected |i1")]
    UnsupportedDtype(String),
    #[error("header too large: {0} bytes")]
    HeaderTooLarge(usize),
    #[error("data length {actual} does not match shape ({expected} elements)")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Render the header dict, padded and newline-terminated.
fn header(shape: &[usize]) -> String {
    let dims = match shape {
        [single] => format!("({single},)"),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };

    let mut text = format!("{{'descr': '{DESCR}', 'fortran_order': False, 'shape': {dims}, }}");
    let unpadded = PREAMBLE_LEN + text.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    text.extend(std::iter::repeat(' ').take(padding));
    text.push('\n');
    text
}

/// Write an `int8` tensor.
pub fn write_i8<W: Write>(writer: &mut W, shape: &[usize], data: &[i8]) -> Result<(), NpyError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        return Err(NpyError::LengthMismatch {
            expected,
            actual: data.len(),
        });
    }

    let header = header(shape);
    let header_len =
        u16::try_from(header.len()).map_err(|_| NpyError::HeaderTooLarge(header.len()))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;

    let bytes: Vec<u8> = data.iter().map(|&v| v as u8).collect();
    writer.write_all(&bytes)?;
    Ok(())
}

/// A decoded `int8` tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<i8>,
}

/// Pull the value that follows `'key':` in a header dict.
fn field<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let pattern = format!("'{key}':");
    let start = header
        .find(&pattern)
        .ok_or_else(|| NpyError::BadHeader(format!("missing '{key}'")))?;
    Ok(header[start + pattern.len()..].trim_start())
}

fn parse_shape(header: &str) -> Result<Vec<usize>, NpyError> {
    let rest = field(header, "shape")?;
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.split_once(')'))
        .map(|(inner, _)| inner)
        .ok_or_else(|| NpyError::BadHeader("shape is not a tuple".to_string()))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| {
            d.parse::<usize>()
                .map_err(|e| NpyError::BadHeader(format!("bad dimension '{d}': {e}")))
        })
        .collect()
}

/// Read an `int8` tensor written in C order.
pub fn read_i8<R: Read>(reader: &mut R) -> Result<NpyArray, NpyError> {
    let mut preamble = [0u8; PREAMBLE_LEN];
    reader.read_exact(&mut preamble)?;
    if &preamble[..MAGIC.len()] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let (major, minor) = (preamble[6], preamble[7]);
    if major != 1 {
        return Err(NpyError::UnsupportedVersion(major, minor));
    }

    let header_len = u16::from_le_bytes([preamble[8], preamble[9]]) as usize;
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8(header)
        .map_err(|_| NpyError::BadHeader("header is not text".to_string()))?;

    let descr = field(&header, "descr")?;
    let descr = descr
        .trim_start_matches('\'')
        .split('\'')
        .next()
        .unwrap_or_default();
    if descr != DESCR && descr != "<i1" {
        return Err(NpyError::UnsupportedDtype(descr.to_string()));
    }
    if !field(&header, "fortran_order")?.starts_with("False") {
        return Err(NpyError::BadHeader("fortran order is not supported".to_string()));
    }

    let shape = parse_shape(&header)?;
    let expected: usize = shape.iter().product();

    let mut bytes = Vec::with_capacity(expected);
    reader.read_to_end(&mut bytes)?;
    if bytes.len() != expected {
        return Err(NpyError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }

    Ok(NpyArray {
        shape,
        data: bytes.into_iter().map(|b| b as i8).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut out = Vec::new();
        write_i8(&mut out, &[2, 1, 3, 2], &[0; 12]).unwrap();

        assert_eq!(&out[..8], b"\x93NUMPY\x01\x00");
        let header_len = u16::from_le_bytes([out[8], out[9]]) as usize;
        assert_eq!((PREAMBLE_LEN + header_len) % ALIGNMENT, 0);
        assert_eq!(out.len(), PREAMBLE_LEN + header_len + 12);

        let text = std::str::from_utf8(&out[PREAMBLE_LEN..PREAMBLE_LEN + header_len]).unwrap();
        assert!(text.starts_with("{'descr': '|i1', 'fortran_order': False, 'shape': (2, 1, 3, 2), }"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_read_back_values() {
        let data = vec![-1, 0, 1, 1, 0, -1];
        let mut out = Vec::new();
        write_i8(&mut out, &[1, 1, 2, 3], &data).unwrap();

        let array = read_i8(&mut out.as_slice()).unwrap();
        assert_eq!(array.shape, vec![1, 1, 2, 3]);
        assert_eq!(array.data, data);
    }

    #[test]
    fn test_one_dimensional_shape_has_trailing_comma() {
        assert!(header(&[5]).contains("'shape': (5,)"));
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut out = Vec::new();
        assert!(matches!(
            write_i8(&mut out, &[2, 2], &[0; 3]),
            Err(NpyError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_rejects_other_dtypes() {
        let mut out = Vec::new();
        write_i8(&mut out, &[1], &[0]).unwrap();
        let at = out.windows(3).position(|w| w == b"|i1").unwrap();
        out[at..at + 3].copy_from_slice(b"<f4");

        assert!(matches!(
            read_i8(&mut out.as_slice()),
            Err(NpyError::UnsupportedDtype(_))
        ));
        assert!(matches!(
            read_i8(&mut &b"PK\x03\x04zipfile"[..]),
            Err(NpyError::BadMagic)
        ));
    }
}
