//! Parse the text of formatted (ASCII) ECLIPSE files.
use std::borrow::Cow;

use pest::Parser;
use pest::iterators::Pair;

use crate::arrays::{ElementKind, NAME_WIDTH};
use crate::codec::{RecordHeader, NAN_BITS_PREFIX};
use crate::ecl_error::{EclError, EclResult};

#[derive(Parser)]
#[grammar = "ecl.pest"]
pub(crate) struct EclParser;

/// Remove a trailing "\n" or "\r\n" from a line
pub(crate) fn strip_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn quoted_text<'i>(pair: Option<Pair<'i, Rule>>) -> &'i str {
    // An empty string between the quotes still yields a `text` pair, but be lenient anyway
    pair.and_then(|p| p.into_inner().next())
        .map(|p| p.as_str())
        .unwrap_or("")
}

/// Parse a header line such as ` 'PORO    ' 'REAL'           4`
pub(crate) fn parse_header(line: &str) -> EclResult<RecordHeader> {
    let line = strip_newline(line);
    let header = EclParser::parse(Rule::header, line)
        .map_err(|e| EclError::from_pest(e, line.to_owned(), "record header"))?
        .next()
        .ok_or_else(|| EclError::Parse { token: line.to_owned(), kind: "record header", reason: "empty line".to_owned() })?;

    let mut inner = header.into_inner();
    let name = quoted_text(inner.next());
    let tag = quoted_text(inner.next());
    let count_str = inner.next().map(|p| p.as_str()).unwrap_or("");

    if name.len() > NAME_WIDTH {
        return Err(EclError::Parse {
            token: name.to_owned(), kind: "record name", reason: format!("names are at most {NAME_WIDTH} characters")
        });
    }

    let kind = ElementKind::from_tag(tag.as_bytes())
        .ok_or_else(|| EclError::Parse { token: tag.to_owned(), kind: "array type", reason: "unknown array type".to_owned() })?;

    let count: i32 = count_str.parse()
        .map_err(|e: std::num::ParseIntError| EclError::Parse { token: count_str.to_owned(), kind: "element count", reason: e.to_string() })?;
    let count = usize::try_from(count)
        .map_err(|_| EclError::Parse { token: count_str.to_owned(), kind: "element count", reason: "count is negative".to_owned() })?;

    Ok(RecordHeader { name: name.trim_end().to_owned(), kind, count })
}

/// Parse a line of quoted CHAR values, appending them (right-trimmed) to `out`.
pub(crate) fn parse_char_line(line: &str, out: &mut Vec<String>) -> EclResult<usize> {
    let line = strip_newline(line);
    let pairs = EclParser::parse(Rule::char_line, line)
        .map_err(|e| EclError::from_pest(e, line.to_owned(), "CHAR"))?;

    let mut n = 0;
    for quoted in pairs.flat_map(|p| p.into_inner()).filter(|p| p.as_rule() == Rule::quoted) {
        let value = quoted_text(Some(quoted));
        if value.len() > NAME_WIDTH {
            return Err(EclError::Parse {
                token: value.to_owned(), kind: "CHAR", reason: format!("CHAR values are at most {NAME_WIDTH} characters")
            });
        }
        out.push(value.trim_end().to_owned());
        n += 1;
    }
    Ok(n)
}

pub(crate) fn parse_integer(s: &str) -> EclResult<i32> {
    s.parse().map_err(|e: std::num::ParseIntError| EclError::Parse { token: s.to_owned(), kind: "INTE", reason: e.to_string() })
}

pub(crate) fn parse_logical(s: &str) -> EclResult<bool> {
    match s {
        "T" => Ok(true),
        "F" => Ok(false),
        _ => Err(EclError::Parse { token: s.to_owned(), kind: "LOGI", reason: "logicals must be 'T' or 'F'".to_owned() })
    }
}

pub(crate) fn parse_real(s: &str) -> EclResult<f32> {
    if let Some(bits) = nan_bits(s, "REAL")? {
        return u32::try_from(bits).map(f32::from_bits)
            .map_err(|_| EclError::Parse { token: s.to_owned(), kind: "REAL", reason: "NaN bits do not fit in 32 bits".to_owned() });
    }
    normalize_exponent(s).parse()
        .map_err(|e: std::num::ParseFloatError| EclError::Parse { token: s.to_owned(), kind: "REAL", reason: e.to_string() })
}

pub(crate) fn parse_double(s: &str) -> EclResult<f64> {
    if let Some(bits) = nan_bits(s, "DOUB")? {
        return Ok(f64::from_bits(bits));
    }
    normalize_exponent(s).parse()
        .map_err(|e: std::num::ParseFloatError| EclError::Parse { token: s.to_owned(), kind: "DOUB", reason: e.to_string() })
}

/// Read the bit pattern out of a "NaN:0x..." token. Returns `None` for any other token.
fn nan_bits(s: &str, kind: &'static str) -> EclResult<Option<u64>> {
    let Some(hex) = s.strip_prefix(NAN_BITS_PREFIX) else {
        return Ok(None);
    };
    let bits = u64::from_str_radix(hex, 16)
        .map_err(|e| EclError::Parse { token: s.to_owned(), kind, reason: e.to_string() })?;

    let is_nan = match kind {
        "REAL" => u32::try_from(bits).map(|b| f32::from_bits(b).is_nan()).unwrap_or(true),
        _ => f64::from_bits(bits).is_nan(),
    };
    if !is_nan {
        return Err(EclError::Parse { token: s.to_owned(), kind, reason: "bit pattern is not a NaN".to_owned() });
    }
    Ok(Some(bits))
}

/// Rewrite Fortran exponent styles into one Rust can parse: "0.1D+00" and "0.1-100"
/// both become E-exponents.
fn normalize_exponent(s: &str) -> Cow<'_, str> {
    if s.contains(['D', 'd']) {
        return Cow::Owned(s.replace(['D', 'd'], "E"));
    }

    if s.contains(['E', 'e']) || s.len() < 2 {
        return Cow::Borrowed(s);
    }

    // Three digit exponents drop the letter entirely
    if let Some(p) = s[1..].find(['+', '-']) {
        let p = p + 1;
        Cow::Owned(format!("{}E{}", &s[..p], &s[p..]))
    } else {
        Cow::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header() -> EclResult<()> {
        let h = parse_header(" 'PORO    ' 'REAL'           4\n")?;
        assert_eq!(h, RecordHeader { name: "PORO".to_owned(), kind: ElementKind::Real, count: 4 });

        let h = parse_header(" 'STARTSOL' 'MESS'           0\r\n")?;
        assert_eq!(h, RecordHeader { name: "STARTSOL".to_owned(), kind: ElementKind::Mess, count: 0 });
        Ok(())
    }

    #[test]
    fn test_bad_headers() {
        assert!(parse_header(" 'PORO    ' 'R3AL'           4").unwrap_err().is_parse(), "Unknown type was accepted");
        assert!(parse_header(" 'PORO    ' 'REAL'          -4").unwrap_err().is_parse(), "Negative count was accepted");
        assert!(parse_header(" 'PORO     'REAL'            4").unwrap_err().is_parse(), "Unbalanced quotes were accepted");
        assert!(parse_header(" PORO REAL 4").unwrap_err().is_parse(), "Unquoted name was accepted");
        assert!(parse_header(" 'LONGERNAME' 'REAL' 4").unwrap_err().is_parse(), "Over-long name was accepted");
    }

    #[test]
    fn test_char_line() -> EclResult<()> {
        let mut out = vec![];
        let n = parse_char_line(" 'OP_1    ' '        ' 'A B     '\n", &mut out)?;
        assert_eq!(n, 3);
        assert_eq!(out, vec!["OP_1".to_owned(), "".to_owned(), "A B".to_owned()]);

        let e = parse_char_line(" 'OP_1    ' 'OP_2", &mut out);
        assert!(e.unwrap_err().is_parse(), "Missing closing quote was accepted");
        Ok(())
    }

    #[test]
    fn test_numbers() -> EclResult<()> {
        assert_eq!(parse_integer("-42")?, -42);
        assert!(parse_integer("4.2").unwrap_err().is_parse());

        assert_eq!(parse_real("0.1E+00")?, 0.1_f32);
        assert_eq!(parse_real("-0.25E+01")?, -2.5_f32);
        assert!(parse_real("abc").unwrap_err().is_parse());

        assert_eq!(parse_double("0.1D+00")?, 0.1);
        assert_eq!(parse_double("0.1-100")?, 0.1e-100);
        assert_eq!(parse_double("0.1+101")?, 0.1e101);
        assert!(parse_double("NaN")?.is_nan());
        assert_eq!(parse_double("-inf")?, f64::NEG_INFINITY);
        assert!(parse_double("1.0X+00").unwrap_err().is_parse());
        Ok(())
    }

    #[test]
    fn test_nan_bits() -> EclResult<()> {
        assert_eq!(parse_double("NaN:0xfff8000000000000")?.to_bits(), 0xfff8_0000_0000_0000);
        assert_eq!(parse_real("NaN:0xffc00000")?.to_bits(), 0xffc0_0000);
        assert!(parse_double("NaN:0x3ff0000000000000").unwrap_err().is_parse(), "Non-NaN bits were accepted");
        assert!(parse_real("NaN:0xfff8000000000000").unwrap_err().is_parse(), "64 bit pattern accepted as REAL");
        assert!(parse_double("NaN:0xzz").unwrap_err().is_parse());
        Ok(())
    }

    #[test]
    fn test_logical() -> EclResult<()> {
        assert!(parse_logical("T")?);
        assert!(!parse_logical("F")?);
        assert!(parse_logical("X").unwrap_err().is_parse());
        Ok(())
    }
}
