//! 256-bit machine word arithmetic with EVM semantics.
//!
//! Every operation wraps modulo 2^256. Signed operations interpret words as two's
//! complement numbers. Operand order follows the EVM stack order: the first
//! argument is the value that was on top of the stack.

use alloy_primitives::{keccak256, U256};

pub type Word = U256;

const SIGN_BIT: usize = 255;

pub fn from_bool(b: bool) -> Word {
    if b {
        Word::from(1_u64)
    } else {
        Word::ZERO
    }
}

/// Returns the word as `u64` if it fits.
pub fn to_u64(w: &Word) -> Option<u64> {
    let limbs = w.as_limbs();

    if limbs[1..].iter().all(|l| *l == 0) {
        Some(limbs[0])
    } else {
        None
    }
}

fn is_negative(w: &Word) -> bool {
    w.bit(SIGN_BIT)
}

fn abs(w: Word) -> Word {
    if is_negative(&w) {
        w.wrapping_neg()
    } else {
        w
    }
}

pub fn div(a: Word, b: Word) -> Word {
    a.checked_div(b).unwrap_or(Word::ZERO)
}

pub fn rem(a: Word, b: Word) -> Word {
    a.checked_rem(b).unwrap_or(Word::ZERO)
}

pub fn sdiv(a: Word, b: Word) -> Word {
    if b.is_zero() {
        return Word::ZERO;
    }

    let quotient = abs(a) / abs(b);

    if is_negative(&a) != is_negative(&b) {
        quotient.wrapping_neg()
    } else {
        quotient
    }
}

pub fn smod(a: Word, b: Word) -> Word {
    if b.is_zero() {
        return Word::ZERO;
    }

    let remainder = abs(a) % abs(b);

    if is_negative(&a) {
        remainder.wrapping_neg()
    } else {
        remainder
    }
}

pub fn add_mod(a: Word, b: Word, n: Word) -> Word {
    if n.is_zero() {
        Word::ZERO
    } else {
        a.add_mod(b, n)
    }
}

pub fn mul_mod(a: Word, b: Word, n: Word) -> Word {
    if n.is_zero() {
        Word::ZERO
    } else {
        a.mul_mod(b, n)
    }
}

pub fn exp(base: Word, exponent: Word) -> Word {
    base.wrapping_pow(exponent)
}

pub fn slt(a: Word, b: Word) -> bool {
    let sign = Word::from(1_u64) << SIGN_BIT;

    (a ^ sign) < (b ^ sign)
}

pub fn sgt(a: Word, b: Word) -> bool {
    slt(b, a)
}

pub fn shl(shift: Word, value: Word) -> Word {
    match to_u64(&shift) {
        Some(s) if s < 256 => value << (s as usize),
        _ => Word::ZERO,
    }
}

pub fn shr(shift: Word, value: Word) -> Word {
    match to_u64(&shift) {
        Some(s) if s < 256 => value >> (s as usize),
        _ => Word::ZERO,
    }
}

pub fn sar(shift: Word, value: Word) -> Word {
    let negative = is_negative(&value);

    match to_u64(&shift) {
        Some(s) if s < 256 => {
            if negative {
                !((!value) >> (s as usize))
            } else {
                value >> (s as usize)
            }
        }
        _ if negative => Word::MAX,
        _ => Word::ZERO,
    }
}

/// Extracts byte `index` counted from the most significant end.
pub fn byte(index: Word, value: Word) -> Word {
    match to_u64(&index) {
        Some(i) if i < 32 => Word::from(value.byte(31 - i as usize)),
        _ => Word::ZERO,
    }
}

pub fn sign_extend(size: Word, value: Word) -> Word {
    match to_u64(&size) {
        Some(b) if b < 31 => {
            let bit = (b as usize) * 8 + 7;
            let mask = (Word::from(1_u64) << (bit + 1)) - Word::from(1_u64);

            if value.bit(bit) {
                value | !mask
            } else {
                value & mask
            }
        }
        _ => value,
    }
}

/// Hashes the big-endian concatenation of `words`.
pub fn keccak(words: &[Word]) -> Word {
    keccak_prefix(words, words.len() * 32)
}

/// Hashes the first `len` bytes of the big-endian concatenation of `words`.
pub fn keccak_prefix(words: &[Word], len: usize) -> Word {
    let mut bytes = words
        .iter()
        .flat_map(|w| w.to_be_bytes::<32>())
        .collect::<Vec<u8>>();
    bytes.truncate(len);

    Word::from_be_bytes(keccak256(bytes).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(v: u64) -> Word {
        Word::from(v)
    }

    fn neg(v: u64) -> Word {
        w(v).wrapping_neg()
    }

    #[test]
    fn division_by_zero_yields_zero() {
        assert_eq!(div(w(7), w(0)), w(0));
        assert_eq!(rem(w(7), w(0)), w(0));
        assert_eq!(sdiv(neg(7), w(0)), w(0));
        assert_eq!(add_mod(w(1), w(2), w(0)), w(0));
    }

    #[test]
    fn signed_arithmetic_uses_twos_complement() {
        assert_eq!(sdiv(neg(8), w(2)), neg(4));
        assert_eq!(smod(neg(8), w(3)), neg(2));
        assert!(slt(neg(1), w(0)));
        assert!(sgt(w(0), neg(1)));
        assert_eq!(sar(w(4), neg(16)), neg(1));
        assert_eq!(sar(w(300), neg(16)), Word::MAX);
    }

    #[test]
    fn shifts_beyond_word_size_clear_the_value() {
        assert_eq!(shl(w(256), w(1)), w(0));
        assert_eq!(shr(w(1), w(4)), w(2));
        assert_eq!(shl(w(8), w(1)), w(256));
    }

    #[test]
    fn byte_and_sign_extension() {
        assert_eq!(byte(w(31), w(0xab)), w(0xab));
        assert_eq!(byte(w(30), w(0xab)), w(0));
        assert_eq!(sign_extend(w(0), w(0xff)), Word::MAX);
        assert_eq!(sign_extend(w(0), w(0x7f)), w(0x7f));
    }

    #[test]
    fn wraparound_and_keccak() {
        assert_eq!(Word::MAX.wrapping_add(w(1)), w(0));
        assert_eq!(exp(w(2), w(256)), w(0));
        assert_eq!(
            keccak(&[]),
            Word::from_be_bytes(keccak256(&[] as &[u8]).0),
            "hash of the empty input"
        );
        assert_eq!(
            keccak_prefix(&[Word::MAX], 1),
            Word::from_be_bytes(keccak256([0xff_u8]).0)
        );
    }
}
