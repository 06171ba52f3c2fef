//! Delimiter-separated text codec and byte-level text encodings.
//!
//! Supports the dialect the input lists are exported in: a single-character
//! delimiter, `"`-quoted fields with `""` escapes, embedded delimiters and
//! newlines inside quotes, and `\n` or `\r\n` record terminators. Rows are
//! written with `\r\n`.

use enricher_shared::{EnricherError, Result, TextEncoding};

/// Record terminator used when writing.
const LINE_END: &str = "\r\n";

const UTF8_BOM: &str = "\u{feff}";

/// Decode raw file bytes into text.
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> Result<String> {
    match encoding {
        // Every byte maps to the code point of the same value.
        TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        TextEncoding::Utf8 => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| EnricherError::parse(format!("input is not valid UTF-8: {e}")))?;
            Ok(text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string())
        }
    }
}

/// Encoded bytes plus the number of characters the encoding could not hold.
#[derive(Debug, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub replaced: usize,
}

/// Encode text for writing. Characters outside Latin-1 become `?` and are
/// counted in [`Encoded::replaced`].
pub fn encode(text: &str, encoding: TextEncoding) -> Encoded {
    match encoding {
        TextEncoding::Latin1 => {
            let mut replaced = 0;
            let bytes = text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).unwrap_or_else(|_| {
                        replaced += 1;
                        b'?'
                    })
                })
                .collect();
            Encoded { bytes, replaced }
        }
        TextEncoding::Utf8 => Encoded {
            bytes: text.as_bytes().to_vec(),
            replaced: 0,
        },
    }
}

/// Split text into rows of fields.
///
/// Blank lines outside quotes are skipped.
pub fn parse_rows(text: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // Distinguishes `""` (one empty field) from an empty line.
    let mut row_started = false;
    let mut line = 1usize;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => {
                in_quotes = true;
                row_started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                if row_started || !field.is_empty() || !row.is_empty() {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                row_started = false;
                line += 1;
            }
            c if c == delimiter => {
                row.push(std::mem::take(&mut field));
                row_started = true;
            }
            _ => {
                field.push(c);
                row_started = true;
            }
        }
    }

    if in_quotes {
        return Err(EnricherError::parse(format!(
            "unterminated quoted field starting before line {line}"
        )));
    }
    if row_started || !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    Ok(rows)
}

/// Format one row, quoting fields that need it, terminated by `\r\n`.
pub fn format_row<S: AsRef<str>>(fields: &[S], delimiter: char) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(delimiter);
        }
        let field = field.as_ref();
        let needs_quotes = field
            .chars()
            .any(|c| c == delimiter || c == '"' || c == '\n' || c == '\r');
        if needs_quotes {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str(LINE_END);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_rows() {
        let rows = parse_rows("ID;NOM\n1;DUPONT\r\n2;MARTIN\n", ';').unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["ID", "NOM"],
                vec!["1", "DUPONT"],
                vec!["2", "MARTIN"],
            ]
        );
    }

    #[test]
    fn parses_quoted_fields() {
        let text = "1;\"12, rue \"\"Haute\"\"; Paris\";\"line1\nline2\"\n2;;\"\"\n";
        let rows = parse_rows(text, ';').unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], "12, rue \"Haute\"; Paris");
        assert_eq!(rows[0][2], "line1\nline2");
        assert_eq!(rows[1], vec!["2", "", ""]);
    }

    #[test]
    fn skips_blank_lines_and_keeps_missing_trailing_newline() {
        let rows = parse_rows("a;b\n\n\nc;d", ';').unwrap();
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = parse_rows("a;\"open\nb;c\n", ';').unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn format_quotes_only_when_needed() {
        let row = format_row(&["A1", "rue; 12", "say \"hi\"", ""], ';');
        assert_eq!(row, "A1;\"rue; 12\";\"say \"\"hi\"\"\";\r\n");
    }

    #[test]
    fn formatted_row_parses_back() {
        let fields = vec!["x;y".to_string(), "multi\nline".into(), "plain".into()];
        let text = format_row(&fields, ';');
        assert_eq!(parse_rows(&text, ';').unwrap(), vec![fields]);
    }

    #[test]
    fn latin1_decoding_maps_bytes_to_code_points() {
        // "Hélène" in ISO-8859-1.
        let bytes = [0x48, 0xE9, 0x6C, 0xE8, 0x6E, 0x65];
        assert_eq!(decode(&bytes, TextEncoding::Latin1).unwrap(), "Hélène");
        assert_eq!(
            encode("Hélène", TextEncoding::Latin1),
            Encoded {
                bytes: bytes.to_vec(),
                replaced: 0
            }
        );
    }

    #[test]
    fn latin1_encoding_counts_replacements() {
        let encoded = encode("€ 5 – Łódź", TextEncoding::Latin1);
        assert_eq!(encoded.bytes, b"? 5 ? ?\xf3d?");
        assert_eq!(encoded.replaced, 4);
        assert_eq!(encode("€", TextEncoding::Utf8).replaced, 0);
    }

    #[test]
    fn utf8_decoding_strips_bom_and_rejects_invalid() {
        let mut bytes = "\u{feff}ID;NOM".as_bytes().to_vec();
        assert_eq!(decode(&bytes, TextEncoding::Utf8).unwrap(), "ID;NOM");
        bytes.push(0xFF);
        assert!(decode(&bytes, TextEncoding::Utf8).is_err());
    }
}
