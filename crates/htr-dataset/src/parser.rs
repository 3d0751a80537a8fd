// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Parsers for the IAM ASCII annotation files.
//!
//! Two whitespace-delimited formats are supported:
//!
//! - `lines.txt`: `line_id status graylevel n_components x y w h transcription...`
//! - `forms.txt`: `form_id writer_id ...` (remaining tokens ignored)
//!
//! Both parsers are tolerant: comment lines (`#`), blank lines and rows that
//! do not carry enough well-formed fields are skipped without an error.
//!
//! # Example
//!
//! ```rust
//! use htr_dataset::parser::parse_lines_str;
//!
//! let text = "# comment\na01-000u-00 ok 154 19 408 746 1661 89 A|MOVE|to|stop\n";
//! let records = parse_lines_str(text, &["ok"]);
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].text, "A MOVE to stop");
//! assert_eq!(records[0].form_id(), "a01-000u");
//! ```

use std::{collections::HashMap, path::Path};

use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Status accepted when the caller does not provide any.
pub const DEFAULT_KEEP_STATUS: &[&str] = &["ok"];

/// Minimum number of tokens in a well-formed `lines.txt` row.
const LINE_FIELDS: usize = 9;

/// One transcribed handwriting line from `lines.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRecord {
    /// Line identifier, `{form_id}-{line_index}`.
    pub line_id: String,
    /// Segmentation status, `ok` or `err`.
    pub status: String,
    /// Graylevel used to binarize the line.
    pub graylevel: i64,
    /// Number of connected components.
    pub n_components: u32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Transcription with `|` decoded to spaces.
    pub text: String,
}

impl LineRecord {
    /// Form identifier, the first two hyphen-delimited segments of `line_id`.
    pub fn form_id(&self) -> String {
        form_id_of(&self.line_id)
    }
}

/// Derive the form identifier from a line identifier.
///
/// `a01-000u-00` becomes `a01-000u`. Identifiers with fewer than two
/// segments are returned unchanged.
pub fn form_id_of(line_id: &str) -> String {
    line_id.splitn(3, '-').take(2).collect::<Vec<_>>().join("-")
}

/// Parse a `lines.txt` file.
///
/// Records whose status is not in `keep_status` are dropped; an empty
/// `keep_status` falls back to [`DEFAULT_KEEP_STATUS`]. File order is
/// preserved. Invalid UTF-8 is replaced rather than rejected.
///
/// # Errors
///
/// Returns [`Error::IoError`] if the file cannot be read. Malformed rows
/// never produce an error.
pub fn parse_lines<P: AsRef<Path>, S: AsRef<str>>(
    path: P,
    keep_status: &[S],
) -> Result<Vec<LineRecord>, Error> {
    let bytes = std::fs::read(path.as_ref())?;
    Ok(parse_lines_str(&String::from_utf8_lossy(&bytes), keep_status))
}

/// Parse `lines.txt` content already held in memory.
pub fn parse_lines_str<S: AsRef<str>>(content: &str, keep_status: &[S]) -> Vec<LineRecord> {
    let keep: Vec<&str> = if keep_status.is_empty() {
        DEFAULT_KEEP_STATUS.to_vec()
    } else {
        keep_status.iter().map(|s| s.as_ref()).collect()
    };

    content
        .lines()
        .enumerate()
        .filter_map(|(lineno, raw)| {
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with('#') {
                return None;
            }
            let record = parse_line_row(raw, &keep);
            if record.is_none() {
                trace!("skipping lines row {}: {:?}", lineno + 1, raw);
            }
            record
        })
        .collect()
}

fn parse_line_row(raw: &str, keep: &[&str]) -> Option<LineRecord> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() < LINE_FIELDS {
        return None;
    }

    let status = parts[1];
    if !keep.contains(&status) {
        return None;
    }

    let graylevel = parts[2].parse().ok()?;
    let n_components = parts[3].parse().ok()?;
    let x = parts[4].parse().ok()?;
    let y = parts[5].parse().ok()?;
    let w = parts[6].parse().ok()?;
    let h = parts[7].parse().ok()?;

    let text = parts[8..].join(" ").replace('|', " ").trim().to_owned();

    Some(LineRecord {
        line_id: parts[0].to_owned(),
        status: status.to_owned(),
        graylevel,
        n_components,
        x,
        y,
        w,
        h,
        text,
    })
}

/// Parse a `forms.txt` file into a `form_id -> writer_id` map.
///
/// A missing file is not an error and yields an empty map, so manifests can
/// still be built without writer metadata.
pub fn parse_forms<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>, Error> {
    let path = path.as_ref();
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "forms file {} not found, writer ids will be empty",
                path.display()
            );
            return Ok(HashMap::new());
        }
        Err(err) => return Err(err.into()),
    };
    Ok(parse_forms_str(&String::from_utf8_lossy(&bytes)))
}

/// Parse `forms.txt` content already held in memory.
///
/// Later rows for the same form overwrite earlier ones.
pub fn parse_forms_str(content: &str) -> HashMap<String, String> {
    let mut mapping = HashMap::new();

    for raw in content.lines() {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let mut parts = raw.split_whitespace();
        if let (Some(form_id), Some(writer_id)) = (parts.next(), parts.next()) {
            mapping.insert(form_id.to_owned(), writer_id.to_owned());
        }
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const LINES: &str = "\
#--- lines.txt ---------------------------------------------------------------#
#
# format: a01-000u-00 ok 154 19 408 746 1663 91 A|MOVE|to|stop|Mr.|Gaitskell|from
#
a01-000u-00 ok 154 19 408 746 1661 89 A|MOVE|to|stop|Mr.|Gaitskell|from
a01-000u-01 ok 156 19 395 932 1850 105 nominating|any|more|Labour
a01-000u-02 err 157 16 408 1106 1986 87 ok|it|had|no

a01-000x-00 ok 182 29 375 708 1820 95 A|MOVE|to|stop|Mr.
";

    #[test]
    fn test_transcription_decoding() {
        let records = parse_lines_str("a01-000u-00 ok 154 1 408 768 1661 88 A|MOVE|to", &["ok"]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "A MOVE to");
        assert_eq!(records[0].graylevel, 154);
        assert_eq!(records[0].n_components, 1);
        assert_eq!(
            (records[0].x, records[0].y, records[0].w, records[0].h),
            (408, 768, 1661, 88)
        );
    }

    #[test]
    fn test_multi_token_transcription_joined() {
        let records = parse_lines_str("a01-000u-03 ok 150 4 1 2 3 4 said  the|man ", &["ok"]);
        assert_eq!(records[0].text, "said the man");
    }

    #[test]
    fn test_comments_blank_and_status_filter() {
        let records = parse_lines_str(LINES, &["ok"]);
        let ids: Vec<_> = records.iter().map(|r| r.line_id.as_str()).collect();
        assert_eq!(ids, vec!["a01-000u-00", "a01-000u-01", "a01-000x-00"]);
    }

    #[test]
    fn test_keep_multiple_statuses() {
        let records = parse_lines_str(LINES, &["ok", "err"]);
        assert_eq!(records.len(), 4);
        assert_eq!(records[2].status, "err");
    }

    #[test]
    fn test_empty_keep_status_defaults_to_ok() {
        let records = parse_lines_str::<&str>(LINES, &[]);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.status == "ok"));
    }

    #[test]
    fn test_malformed_row_tolerance() {
        let content = "a01-000u-00 ok 154 1 408 768 1661 88 A|MOVE\na01-000u-01 ok 154 1 408\n";
        let records = parse_lines_str(content, &["ok"]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line_id, "a01-000u-00");
    }

    #[test]
    fn test_non_numeric_fields_skipped() {
        let content = "a01-000u-00 ok xx 1 408 768 1661 88 A\na01-000u-01 ok 154 1 -1 768 1661 88 B\n";
        assert!(parse_lines_str(content, &["ok"]).is_empty());
    }

    #[test]
    fn test_form_id() {
        assert_eq!(form_id_of("a01-000u-00"), "a01-000u");
        assert_eq!(form_id_of("r06-137-05"), "r06-137");
        assert_eq!(form_id_of("zz-999"), "zz-999");
        assert_eq!(form_id_of("single"), "single");
    }

    #[test]
    fn test_parse_lines_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lines.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(LINES.as_bytes()).unwrap();
        // Stray invalid UTF-8 must not abort ingestion.
        file.write_all(b"a01-000x-01 ok 180 3 1 2 3 4 caf\xe9\n").unwrap();

        let records = parse_lines(&path, &["ok"]).unwrap();
        assert_eq!(records.len(), 4);
        assert!(records[3].text.starts_with("caf"));
    }

    #[test]
    fn test_parse_lines_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = parse_lines(temp_dir.path().join("nope.txt"), &["ok"]).unwrap_err();
        assert!(matches!(err, Error::IoError(_)));
    }

    #[test]
    fn test_parse_forms() {
        let content = "\
# forms.txt
a01-000u 000 2 prt 7 5 52 36
a01-000x 000 2 prt 7 5 52 36
a01-003u 001 5 prt 7 5 52 36
lonely

b01-000 002
";
        let forms = parse_forms_str(content);
        assert_eq!(forms.len(), 4);
        assert_eq!(forms["a01-000u"], "000");
        assert_eq!(forms["a01-003u"], "001");
        assert_eq!(forms["b01-000"], "002");
        assert!(!forms.contains_key("lonely"));
    }

    #[test]
    fn test_parse_forms_later_row_wins() {
        let forms = parse_forms_str("a01-000u 000\na01-000u 111\n");
        assert_eq!(forms["a01-000u"], "111");
    }

    #[test]
    fn test_parse_forms_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let forms = parse_forms(temp_dir.path().join("forms.txt")).unwrap();
        assert!(forms.is_empty());
    }
}
