use super::Encode;

/// Unsigned integers encode as a count of meaningful big-endian bytes
/// followed by those bytes. Small values stay small, and the count byte
/// makes shorter encodings sort below longer ones, preserving numeric
/// order across widths.
pub(super) fn put_uint(out: &mut Vec<u8>, value: u64) {
    let skip = (value.leading_zeros() / 8) as usize;

    out.push((8 - skip) as u8);
    out.extend_from_slice(&value.to_be_bytes()[skip..]);
}

impl Encode for u8 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl Encode for u32 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        put_uint(out, u64::from(*self));
    }
}

impl Encode for u64 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        put_uint(out, *self);
    }
}

impl Encode for usize {
    fn encode_into(&self, out: &mut Vec<u8>) {
        put_uint(out, *self as u64);
    }
}

// Fixed-width IEEE-754 bit pattern. Byte order matches numeric order for
// non-negative finite values, which is all the queue ever stores.
impl Encode for f64 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_bits().to_be_bytes());
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Encode for String {
    fn encode_into(&self, out: &mut Vec<u8>) {
        put_uint(out, self.len() as u64);
        out.extend_from_slice(self.as_bytes());
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(inner) => {
                out.push(1);
                inner.encode_into(out);
            }
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode_into(&self, out: &mut Vec<u8>) {
        put_uint(out, self.len() as u64);

        for item in self {
            item.encode_into(out);
        }
    }
}

impl Encode for () {
    fn encode_into(&self, _out: &mut Vec<u8>) {}
}
