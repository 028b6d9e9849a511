//! JSON text in the exact shape Python's `json` module writes it.
//!
//! Strings are ASCII-only (`\uXXXX`, surrogate pairs above the BMP, DEL
//! included), integers keep every digit, and floats use Python's `repr`.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;

/// Write `fragment` with every non-ASCII character (and DEL) as lowercase `\uXXXX`.
pub fn write_ascii_escaped<W>(writer: &mut W, fragment: &str) -> io::Result<()>
where
    W: ?Sized + io::Write,
{
    if fragment.bytes().all(|b| b.is_ascii() && b != 0x7f) {
        return writer.write_all(fragment.as_bytes());
    }
    let mut units = [0u16; 2];
    for ch in fragment.chars() {
        if ch.is_ascii() && ch != '\u{7f}' {
            writer.write_all(&[ch as u8])?;
        } else {
            for unit in ch.encode_utf16(&mut units).iter() {
                write!(writer, "\\u{unit:04x}")?;
            }
        }
    }
    Ok(())
}

/// [`write_ascii_escaped`] into a new string.
///
/// Applied to serialized JSON this only touches string contents, since
/// everything outside strings is ASCII already.
pub fn escape_non_ascii(text: &str) -> String {
    let mut buf = Vec::with_capacity(text.len());
    // Writing into a Vec cannot fail.
    let _ = write_ascii_escaped(&mut buf, text);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Python's `repr(float)`: shortest round-trip digits, fixed notation for
/// decimal exponents in `-4..16`, otherwise `d.ddde+XX`.
pub fn python_float_repr(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let sci = format!("{:e}", value.abs());
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let sign = if value.is_sign_negative() { "-" } else { "" };
    // Position of the decimal point relative to the first digit.
    let decpt = exponent + 1;

    let body = if decpt <= -4 || decpt > 16 {
        let (first, rest) = digits.split_at(1);
        let mantissa =
            if rest.is_empty() { first.to_string() } else { format!("{first}.{rest}") };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{exp_sign}{:02}", exponent.abs())
    } else if decpt <= 0 {
        format!("0.{}{}", "0".repeat(decpt.unsigned_abs() as usize), digits)
    } else {
        let point = decpt as usize;
        if digits.len() <= point {
            format!("{}{}.0", digits, "0".repeat(point - digits.len()))
        } else {
            format!("{}.{}", &digits[..point], &digits[point..])
        }
    };
    format!("{sign}{body}")
}

/// Re-render a JSON number literal the way Python prints the parsed value.
fn python_number(literal: &str) -> String {
    if !literal.contains(['.', 'e', 'E']) {
        // Integers are arbitrary precision in Python; `-0` parses to `0`.
        if literal.trim_start_matches('-').bytes().all(|b| b == b'0') {
            return "0".to_string();
        }
        return literal.to_string();
    }
    match literal.parse::<f64>() {
        Ok(value) => python_float_repr(value),
        Err(_) => literal.to_string(),
    }
}

/// Compact output matching `json.dumps` defaults: `", "` and `": "` separators.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonCompactFormatter;

impl Formatter for PythonCompactFormatter {
    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(python_float_repr(value).as_bytes())
    }

    fn write_number_str<W>(&mut self, writer: &mut W, value: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(python_number(value).as_bytes())
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        write_ascii_escaped(writer, fragment)
    }
}

/// Serialize `value` with [`PythonCompactFormatter`].
pub fn to_compact_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PythonCompactFormatter);
    value.serialize(&mut ser)?;
    // Output is ASCII-only.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
