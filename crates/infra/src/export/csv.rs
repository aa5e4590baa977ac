//! Minimal RFC 4180 writer.

/// Builds a CSV document in memory. Rows end with CRLF; a field is quoted
/// when it contains a comma, a quote, CR or LF, with inner quotes doubled.
#[derive(Debug, Default)]
pub struct CsvWriter {
    buf: String,
    columns: Option<usize>,
}

impl CsvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(header: &[&str]) -> Self {
        let mut writer = Self::new();
        writer.write_row(header.iter().copied());
        writer
    }

    /// Appends one record. Every record after the first is padded or
    /// truncated to the first record's width.
    pub fn write_row<I, F>(&mut self, fields: I)
    where
        I: IntoIterator<Item = F>,
        F: AsRef<str>,
    {
        let fields: Vec<F> = fields.into_iter().collect();
        let width = *self.columns.get_or_insert(fields.len());
        for i in 0..width {
            if i > 0 {
                self.buf.push(',');
            }
            if let Some(field) = fields.get(i) {
                push_field(&mut self.buf, field.as_ref());
            }
        }
        self.buf.push_str("\r\n");
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

fn push_field(buf: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        buf.push('"');
        buf.push_str(&field.replace('"', "\"\""));
        buf.push('"');
    } else {
        buf.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_only_when_needed() {
        let mut w = CsvWriter::with_header(&["name", "note"]);
        w.write_row(["Kedai Ali", "plain"]);
        w.write_row(["Ali, Abu & Co", "said \"hi\""]);
        w.write_row(["multi", "line1\nline2"]);
        assert_eq!(
            w.finish(),
            "name,note\r\nKedai Ali,plain\r\n\"Ali, Abu & Co\",\"said \"\"hi\"\"\"\r\nmulti,\"line1\nline2\"\r\n"
        );
    }

    #[test]
    fn short_rows_are_padded_to_header_width() {
        let mut w = CsvWriter::with_header(&["a", "b", "c"]);
        w.write_row(["1"]);
        w.write_row(["1", "2", "3", "4"]);
        assert_eq!(w.finish(), "a,b,c\r\n1,,\r\n1,2,3\r\n");
    }

    #[test]
    fn empty_writer_is_empty() {
        assert_eq!(CsvWriter::new().finish(), "");
    }
}
