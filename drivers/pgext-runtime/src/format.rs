/*
 *  PgExt Runtime - Message Formatting
 *
 *  printf subset for errmsg and friends
 */

//! `errmsg(fmt, ...)` is C-variadic. The runtime defines it as a plain
//! function taking the format plus five pointer sized words, which is where
//! the integer and pointer arguments of a variadic call land on the SysV
//! x86-64, Windows x64 and AAPCS64 (Linux) conventions. Floating point
//! arguments travel in other registers and are printed as `?`.
//!
//! Apple arm64 passes variadic arguments on the stack, so there the words
//! are garbage and conversions are left in the message unexpanded.

use std::ffi::{c_char, CStr};

/// Number of argument words the formatting exports accept
pub const ARG_WORDS: usize = 5;

/// Whether variadic integer arguments arrive in the argument words
pub const VARIADIC_IN_REGISTERS: bool =
    !cfg!(all(target_vendor = "apple", target_arch = "aarch64"));

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    long: bool,
}

/// Expands `fmt` with `words` as its integer class arguments.
///
/// Conversions left without a word are copied through unchanged.
///
/// # Safety
/// Every word consumed by `%s` must be null or point at a string that is
/// NUL terminated (or at least as long as the conversion's precision).
pub unsafe fn expand(fmt: &CStr, words: &[usize]) -> String {
    let bytes = fmt.to_bytes();
    let mut words = words.iter().copied();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len() + 16);
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }

        let start = i;
        i += 1;
        let mut spec = Spec::default();

        while i < bytes.len() && matches!(bytes[i], b'-' | b'+' | b' ' | b'#' | b'0') {
            match bytes[i] {
                b'-' => spec.left = true,
                b'0' => spec.zero = true,
                _ => {}
            }
            i += 1;
        }

        if i < bytes.len() && bytes[i] == b'*' {
            spec.width = words.next().map(|w| w as u32 as i32).unwrap_or(0).unsigned_abs() as usize;
            i += 1;
        } else {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                spec.width = spec.width * 10 + (bytes[i] - b'0') as usize;
                i += 1;
            }
        }

        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            let mut precision = 0;
            if i < bytes.len() && bytes[i] == b'*' {
                precision = words.next().map(|w| (w as u32 as i32).max(0) as usize).unwrap_or(0);
                i += 1;
            } else {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    precision = precision * 10 + (bytes[i] - b'0') as usize;
                    i += 1;
                }
            }
            spec.precision = Some(precision);
        }

        while i < bytes.len() && matches!(bytes[i], b'h' | b'l' | b'z' | b'j' | b't' | b'q' | b'L') {
            if bytes[i] != b'h' {
                spec.long = true;
            }
            i += 1;
        }

        let Some(&conversion) = bytes.get(i) else {
            out.extend_from_slice(&bytes[start..]);
            break;
        };
        i += 1;
        let raw = &bytes[start..i];

        let (text, numeric) = match conversion {
            b'%' => (b"%".to_vec(), false),
            b'f' | b'F' | b'e' | b'E' | b'g' | b'G' | b'a' | b'A' => (b"?".to_vec(), false),
            b'm' => (std::io::Error::last_os_error().to_string().into_bytes(), false),
            b'd' | b'i' | b'u' | b'x' | b'X' | b'o' | b'c' | b's' | b'p' => match words.next() {
                Some(word) => (convert(conversion, &spec, word), matches!(conversion, b'd' | b'i' | b'u' | b'x' | b'X' | b'o')),
                None => (raw.to_vec(), false),
            },
            _ => (raw.to_vec(), false),
        };

        pad(&mut out, &text, &spec, numeric);
    }

    out.retain(|b| *b != 0);
    String::from_utf8_lossy(&out).into_owned()
}

unsafe fn convert(conversion: u8, spec: &Spec, word: usize) -> Vec<u8> {
    let text = match conversion {
        b'd' | b'i' if spec.long => (word as i64).to_string(),
        b'd' | b'i' => (word as u32 as i32).to_string(),
        b'u' if spec.long => (word as u64).to_string(),
        b'u' => (word as u32).to_string(),
        b'x' if spec.long => format!("{:x}", word as u64),
        b'x' => format!("{:x}", word as u32),
        b'X' if spec.long => format!("{:X}", word as u64),
        b'X' => format!("{:X}", word as u32),
        b'o' if spec.long => format!("{:o}", word as u64),
        b'o' => format!("{:o}", word as u32),
        b'p' => format!("{:#x}", word),
        b'c' => return vec![word as u8],
        b's' => return c_string_bytes(word as *const c_char, spec.precision),
        _ => String::new(),
    };
    text.into_bytes()
}

/// Bytes of a C string, reading no further than `limit`
unsafe fn c_string_bytes(ptr: *const c_char, limit: Option<usize>) -> Vec<u8> {
    if ptr.is_null() {
        return b"(null)".to_vec();
    }
    let limit = limit.unwrap_or(usize::MAX);
    let mut bytes = Vec::new();
    let mut p = ptr as *const u8;
    while bytes.len() < limit && *p != 0 {
        bytes.push(*p);
        p = p.add(1);
    }
    bytes
}

fn pad(out: &mut Vec<u8>, text: &[u8], spec: &Spec, numeric: bool) {
    let fill = spec.width.saturating_sub(text.len());
    if fill == 0 {
        out.extend_from_slice(text);
    } else if spec.left {
        out.extend_from_slice(text);
        out.extend(std::iter::repeat(b' ').take(fill));
    } else if spec.zero && numeric {
        let (sign, digits) = match text.first() {
            Some(b'-') => (&text[..1], &text[1..]),
            _ => (&text[..0], text),
        };
        out.extend_from_slice(sign);
        out.extend(std::iter::repeat(b'0').take(fill));
        out.extend_from_slice(digits);
    } else {
        out.extend(std::iter::repeat(b' ').take(fill));
        out.extend_from_slice(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fmt: &CStr, words: &[usize]) -> String {
        unsafe { expand(fmt, words) }
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(run(c"out of memory", &[]), "out of memory");
        assert_eq!(run(c"100%% done", &[]), "100% done");
    }

    #[test]
    fn test_integers() {
        let minus_seven = (-7i32) as u32 as usize;
        assert_eq!(run(c"%d and %u", &[minus_seven, 42]), "-7 and 42");
        assert_eq!(run(c"%ld", &[(-9i64) as usize]), "-9");
        assert_eq!(run(c"%x/%X/%o", &[255, 255, 8]), "ff/FF/10");
        assert_eq!(run(c"[%5d][%-5d][%05d]", &[42, 42, minus_seven]), "[   42][42   ][-0007]");
        assert_eq!(run(c"%zu bytes", &[4096]), "4096 bytes");
    }

    #[test]
    fn test_strings() {
        let name = c"uuid-ossp";
        let word = name.as_ptr() as usize;
        assert_eq!(run(c"extension \"%s\"", &[word]), "extension \"uuid-ossp\"");
        assert_eq!(run(c"%.4s", &[word]), "uuid");
        assert_eq!(run(c"%.*s", &[2, word]), "uu");
        assert_eq!(run(c"%s", &[0]), "(null)");
        assert_eq!(run(c"%c%c", &[b'o' as usize, b'k' as usize]), "ok");
    }

    #[test]
    fn test_floats_and_missing_words() {
        assert_eq!(run(c"ratio %f of %d", &[3]), "ratio ? of 3");
        assert_eq!(run(c"%d then %d", &[1]), "1 then %d");
        assert_eq!(run(c"trailing %", &[]), "trailing %");
        assert_eq!(run(c"%y", &[1]), "%y");
    }
}
