//! Type conversions between descriptors.
//!
//! Conversions never allocate: string results come back as owned bytes and callers decide
//! whether the result needs a place in the string arena.

use iconx_image::CsetBits;

use crate::block::Block;
use crate::error::{Fault, runerr};
use crate::vm::Vm;
use crate::{Desc, Qual};

/// A numeric value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    pub(crate) fn into_desc(self) -> Desc {
        match self {
            Num::Int(i) => Desc::Int(i),
            Num::Real(r) => Desc::Real(r),
        }
    }

    pub(crate) fn as_real(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Real(r) => r,
        }
    }
}

impl Vm {
    /// The bytes of a string qualifier.
    pub(crate) fn qual_bytes(&self, q: Qual) -> &[u8] {
        match q {
            Qual::Image(s) => self.image.str_bytes(s),
            Qual::Heap(s) => self.heap.str_bytes(s),
        }
    }

    pub(crate) fn cset_bits(&self, d: Desc) -> Option<CsetBits> {
        match d {
            Desc::Cset(b) => match self.heap.get(b) {
                Some(Block::Cset(bits)) => Some(*bits),
                _ => None,
            },
            _ => None,
        }
    }

    /// Converts a dereferenced value to a string.
    pub(crate) fn cvstr(&self, d: Desc) -> Option<Vec<u8>> {
        match d {
            Desc::Str(q) => Some(self.qual_bytes(q).to_vec()),
            Desc::Int(i) => Some(i.to_string().into_bytes()),
            Desc::Real(r) => Some(format_real(r).into_bytes()),
            Desc::Cset(_) => self.cset_bits(d).map(|bits| bits.chars().collect()),
            _ => None,
        }
    }

    pub(crate) fn cvnum(&self, d: Desc) -> Option<Num> {
        match d {
            Desc::Int(i) => Some(Num::Int(i)),
            Desc::Real(r) => Some(Num::Real(r)),
            Desc::Str(q) => ston(self.qual_bytes(q)),
            Desc::Cset(_) => ston(&self.cvstr(d)?),
            _ => None,
        }
    }

    pub(crate) fn cvint(&self, d: Desc) -> Option<i64> {
        match self.cvnum(d)? {
            Num::Int(i) => Some(i),
            Num::Real(r) => {
                if r > i64::MAX as f64 || r < i64::MIN as f64 || r.is_nan() {
                    None
                } else {
                    Some(r as i64)
                }
            }
        }
    }

    pub(crate) fn cvreal(&self, d: Desc) -> Option<f64> {
        self.cvnum(d).map(Num::as_real)
    }

    pub(crate) fn cvcset(&self, d: Desc) -> Option<CsetBits> {
        match d {
            Desc::Cset(_) => self.cset_bits(d),
            _ => self.cvstr(d).map(|s| CsetBits::from_bytes(&s)),
        }
    }

    pub(crate) fn int_arg(&self, d: Desc) -> Result<i64, Fault> {
        match self.cvint(d) {
            Some(i) => Ok(i),
            None => runerr(101, d),
        }
    }

    pub(crate) fn num_arg(&self, d: Desc) -> Result<Num, Fault> {
        match self.cvnum(d) {
            Some(n) => Ok(n),
            None => runerr(102, d),
        }
    }

    pub(crate) fn str_arg(&self, d: Desc) -> Result<Vec<u8>, Fault> {
        match self.cvstr(d) {
            Some(s) => Ok(s),
            None => runerr(103, d),
        }
    }

    pub(crate) fn cset_arg(&self, d: Desc) -> Result<CsetBits, Fault> {
        match self.cvcset(d) {
            Some(c) => Ok(c),
            None => runerr(104, d),
        }
    }

    /// Makes a string descriptor for `d`, reusing its qualifier when it already is a string.
    pub(crate) fn tostr(&mut self, d: Desc) -> Result<Option<Desc>, Fault> {
        if let Desc::Str(_) = d {
            return Ok(Some(d));
        }
        match self.cvstr(d) {
            Some(bytes) => Ok(Some(self.mkstr(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Converts a 1-based or non-positive position to a strictly positive one for a string of
/// `len` characters; `None` when it is off either end.
pub(crate) fn cvpos(pos: i64, len: i64) -> Option<i64> {
    if pos < -len || pos > len + 1 {
        return None;
    }
    if pos > 0 { Some(pos) } else { Some(len + pos + 1) }
}

/// Parses a numeric literal: optional surrounding whitespace, a sign, digits with an optional
/// fraction and exponent, or a radix literal such as `16rFF`.
pub(crate) fn ston(s: &[u8]) -> Option<Num> {
    let s = s.trim_ascii();
    let (negative, body) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let int_len = body.iter().take_while(|c| c.is_ascii_digit()).count();
    if let Some(b'r' | b'R') = body.get(int_len) {
        if int_len == 0 {
            return None;
        }
        let radix: u32 = std::str::from_utf8(&body[..int_len]).ok()?.parse().ok()?;
        return radix_int(negative, radix, &body[int_len + 1..]);
    }

    let mut i = int_len;
    let mut digits = int_len;
    let mut real = false;
    if body.get(i) == Some(&b'.') {
        real = true;
        i += 1;
        let frac = body[i..].iter().take_while(|c| c.is_ascii_digit()).count();
        digits += frac;
        i += frac;
    }
    if digits == 0 {
        return None;
    }
    if let Some(b'e' | b'E') = body.get(i) {
        real = true;
        i += 1;
        if let Some(b'+' | b'-') = body.get(i) {
            i += 1;
        }
        let exp = body[i..].iter().take_while(|c| c.is_ascii_digit()).count();
        if exp == 0 {
            return None;
        }
        i += exp;
    }
    if i != body.len() {
        return None;
    }

    let text = std::str::from_utf8(body).ok()?;
    if !real {
        if let Ok(v) = text.parse::<i64>() {
            return Some(Num::Int(if negative { -v } else { v }));
        }
    }
    let v: f64 = text.parse().ok()?;
    if v.is_infinite() {
        return None;
    }
    Some(Num::Real(if negative { -v } else { v }))
}

fn radix_int(negative: bool, radix: u32, digits: &[u8]) -> Option<Num> {
    if !(2..=36).contains(&radix) || digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for &c in digits {
        let d = (c as char).to_digit(36)?;
        if d >= radix {
            return None;
        }
        n = n.checked_mul(radix as i64)?.checked_add(d as i64)?;
    }
    Some(Num::Int(if negative { -n } else { n }))
}

/// Formats a real with eight significant digits, switching to exponent form for very large or
/// very small magnitudes. The result always contains a decimal point.
pub(crate) fn format_real(r: f64) -> String {
    const NDIGIT: usize = 8;

    if r.is_nan() {
        return "nan".to_string();
    }
    if r.is_infinite() {
        return if r > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let mut out = String::new();
    if r.is_sign_negative() && r != 0.0 {
        out.push('-');
    }

    // `{:.7e}` rounds to eight significant digits and reports the exponent.
    let sci = format!("{:.*e}", NDIGIT - 1, r.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: Vec<u8> = mantissa.bytes().filter(u8::is_ascii_digit).collect();
    let mut decpt: i32 = exp.parse::<i32>().unwrap_or(0) + 1;
    if r == 0.0 {
        decpt = 1;
    }

    let mut ndigit = NDIGIT;
    while ndigit > 1 && digits[ndigit - 1] == b'0' {
        ndigit -= 1;
    }

    if (decpt >= 0 && decpt - ndigit as i32 > 4) || decpt < -3 {
        let e = decpt - 1;
        out.push(digits[0] as char);
        out.push('.');
        for &d in &digits[1..ndigit] {
            out.push(d as char);
        }
        out.push('e');
        if e < 0 {
            out.push('-');
        }
        out.push_str(&e.abs().to_string());
    } else {
        if decpt <= 0 {
            out.push_str("0.");
            for _ in decpt..0 {
                out.push('0');
            }
        }
        for (i, &d) in digits[..ndigit].iter().enumerate() {
            out.push(d as char);
            if i as i32 + 1 == decpt {
                out.push('.');
            }
        }
        if (ndigit as i32) < decpt {
            for _ in ndigit as i32..decpt {
                out.push('0');
            }
            out.push('.');
        }
    }
    if out.ends_with('.') {
        out.push('0');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reals_format_like_gcvt() {
        assert_eq!(format_real(0.0), "0.0");
        assert_eq!(format_real(1.0), "1.0");
        assert_eq!(format_real(2.5), "2.5");
        assert_eq!(format_real(-0.25), "-0.25");
        assert_eq!(format_real(100.0), "100.0");
        assert_eq!(format_real(1.0 / 3.0), "0.33333333");
        assert_eq!(format_real(123456789.0), "123456790.0");
        assert_eq!(format_real(1e20), "1.e20");
        assert_eq!(format_real(1.5e20), "1.5e20");
        assert_eq!(format_real(0.0001), "0.0001");
        assert_eq!(format_real(0.00001), "1.e-5");
    }

    #[test]
    fn numeric_strings_parse() {
        assert_eq!(ston(b"  42 "), Some(Num::Int(42)));
        assert_eq!(ston(b"-7"), Some(Num::Int(-7)));
        assert_eq!(ston(b"16rff"), Some(Num::Int(255)));
        assert_eq!(ston(b"2r102"), None);
        assert_eq!(ston(b"1.5"), Some(Num::Real(1.5)));
        assert_eq!(ston(b"1e3"), Some(Num::Real(1000.0)));
        assert_eq!(ston(b".5"), Some(Num::Real(0.5)));
        assert_eq!(ston(b"."), None);
        assert_eq!(ston(b"12abc"), None);
        assert_eq!(ston(b""), None);
        assert_eq!(ston(b"1e"), None);
    }

    #[test]
    fn positions_convert_from_either_end() {
        assert_eq!(cvpos(1, 5), Some(1));
        assert_eq!(cvpos(6, 5), Some(6));
        assert_eq!(cvpos(7, 5), None);
        assert_eq!(cvpos(0, 5), Some(6));
        assert_eq!(cvpos(-1, 5), Some(5));
        assert_eq!(cvpos(-5, 5), Some(1));
        assert_eq!(cvpos(-6, 5), None);
    }
}
