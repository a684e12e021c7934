use thiserror::Error;

use super::Decode;

#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("ran out of bytes while reading {0}")]
    Truncated(&'static str),

    #[error("bad length marker {0} while reading {1}")]
    BadLength(u8, &'static str),

    #[error("integer {0} out of range for target type")]
    IntRange(u64),

    #[error("text is not valid utf8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("unrecognised variant byte {0}")]
    UnknownVariant(u8),
}

fn split_off<'a>(
    bytes: &mut &'a [u8],
    count: usize,
    what: &'static str,
) -> Result<&'a [u8], CodecError> {
    let (head, tail) = bytes
        .split_at_checked(count)
        .ok_or(CodecError::Truncated(what))?;

    *bytes = tail;
    Ok(head)
}

pub(super) fn take_uint(bytes: &mut &[u8], what: &'static str) -> Result<u64, CodecError> {
    let count = split_off(bytes, 1, what)?[0];

    if count > 8 {
        return Err(CodecError::BadLength(count, what));
    }

    let mut value = 0u64;
    for byte in split_off(bytes, count as usize, what)? {
        value = value << 8 | u64::from(*byte);
    }

    Ok(value)
}

impl Decode for u8 {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(split_off(bytes, 1, "u8")?[0])
    }
}

impl Decode for u32 {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let value = take_uint(bytes, "u32")?;
        u32::try_from(value).map_err(|_| CodecError::IntRange(value))
    }
}

impl Decode for u64 {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        take_uint(bytes, "u64")
    }
}

impl Decode for usize {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let value = take_uint(bytes, "usize")?;
        usize::try_from(value).map_err(|_| CodecError::IntRange(value))
    }
}

impl Decode for f64 {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let raw = split_off(bytes, 8, "f64")?;
        Ok(f64::from_bits(u64::from_be_bytes(
            raw.try_into().expect("split to exact width"),
        )))
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let raw = split_off(bytes, N, "byte array")?;
        Ok(raw.try_into().expect("split to exact width"))
    }
}

impl Decode for String {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let len = usize::take(bytes)?;
        let raw = split_off(bytes, len, "string")?;

        Ok(String::from_utf8(raw.to_vec())?)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        match u8::take(bytes)? {
            0 => Ok(None),
            1 => Ok(Some(T::take(bytes)?)),
            other => Err(CodecError::UnknownVariant(other)),
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn take(bytes: &mut &[u8]) -> Result<Self, CodecError> {
        let len = usize::take(bytes)?;

        let mut items = Vec::new();
        for _ in 0..len {
            items.push(T::take(bytes)?);
        }

        Ok(items)
    }
}

impl Decode for () {
    fn take(_bytes: &mut &[u8]) -> Result<Self, CodecError> {
        Ok(())
    }
}
