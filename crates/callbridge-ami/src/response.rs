//! Response blocks and typed decoders
//!
//! Every reply from the manager interface is a block of `Key: Value` lines ended by
//! a blank line. Command replies carry the CLI output either as `Output: ` lines
//! (current Asterisk) or as raw lines closed by `--END COMMAND--` (older releases).
//! The decoders below search for the success markers the PBX prints and turn them
//! into a [`DbReply`]; a missing marker is a failure, never a panic.

use crate::constants::{
    DELTREE_MARKER, DEL_MARKER, END_COMMAND, OUTPUT_PREFIX, PUT_MARKER, SHOW_TRAILER,
    VALUE_MARKER,
};
use callbridge_core::models::DbEntry;
use std::fmt;

/// Header lines that frame a command reply rather than carry output
const FRAMING_PREFIXES: &[&str] = &["Response:", "Message:", "Privilege:", "ActionID:"];

/// One reply block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseBlock {
    lines: Vec<String>,
    terminated: bool,
}

impl ResponseBlock {
    /// A block closed by its blank line
    pub fn complete(lines: Vec<String>) -> Self {
        Self {
            lines,
            terminated: true,
        }
    }

    /// A block cut short by a read timeout or EOF
    pub fn truncated(lines: Vec<String>) -> Self {
        Self {
            lines,
            terminated: false,
        }
    }

    /// Parse a block from raw text (used by tests and fakes)
    pub fn from_text(text: &str) -> Self {
        Self::complete(
            text.lines()
                .map(|l| l.trim_end_matches('\r').to_string())
                .filter(|l| !l.is_empty())
                .collect(),
        )
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether the closing blank line was seen
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines joined with `\n`
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether any line contains `marker`
    pub fn contains(&self, marker: &str) -> bool {
        self.lines.iter().any(|l| l.contains(marker))
    }

    /// First value of header `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == name).then(|| value.trim())
        })
    }

    /// `Response: Success` or `Response: Follows`
    pub fn is_success(&self) -> bool {
        matches!(self.header("Response"), Some("Success") | Some("Follows"))
    }

    /// `Response: Error`
    pub fn is_error(&self) -> bool {
        self.header("Response") == Some("Error")
    }

    /// `Message:` header, if any
    pub fn message(&self) -> Option<&str> {
        self.header("Message")
    }

    /// CLI output lines with framing headers and `Output: ` prefixes removed
    pub fn output_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|l| !FRAMING_PREFIXES.iter().any(|p| l.starts_with(p)))
            .filter(|l| !l.contains(END_COMMAND))
            .map(|l| l.strip_prefix(OUTPUT_PREFIX).unwrap_or(l))
            .collect()
    }
}

impl fmt::Display for ResponseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResponseBlock {{ lines: {}, terminated: {} }}",
            self.lines.len(),
            self.terminated
        )
    }
}

/// Decoded reply of a database command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbReply {
    /// `database get` found a value
    Value(String),
    /// `database put` succeeded
    Updated,
    /// `database del` / `database deltree` succeeded
    Removed,
    /// `database show` listing
    Entries(Vec<DbEntry>),
    /// The success marker was absent
    Failed,
}

impl DbReply {
    pub fn is_success(&self) -> bool {
        !matches!(self, DbReply::Failed)
    }

    /// The value of a `Value` reply, empty otherwise
    pub fn into_value(self) -> String {
        match self {
            DbReply::Value(v) => v,
            _ => String::new(),
        }
    }

    /// The rows of an `Entries` reply, empty otherwise
    pub fn into_entries(self) -> Vec<DbEntry> {
        match self {
            DbReply::Entries(entries) => entries,
            _ => Vec::new(),
        }
    }
}

/// Decode a `database get` reply
pub fn decode_get(block: &ResponseBlock) -> DbReply {
    block
        .lines()
        .iter()
        .find_map(|line| {
            let start = line.find(VALUE_MARKER)?;
            Some(line[start + VALUE_MARKER.len()..].trim().to_string())
        })
        .map(DbReply::Value)
        .unwrap_or(DbReply::Failed)
}

/// Decode a `database put` reply
pub fn decode_put(block: &ResponseBlock) -> DbReply {
    marker_reply(block, PUT_MARKER, DbReply::Updated)
}

/// Decode a `database del` reply
pub fn decode_del(block: &ResponseBlock) -> DbReply {
    marker_reply(block, DEL_MARKER, DbReply::Removed)
}

/// Decode a `database deltree` reply
pub fn decode_deltree(block: &ResponseBlock) -> DbReply {
    marker_reply(block, DELTREE_MARKER, DbReply::Removed)
}

/// Decode a `database show <family>` listing
///
/// Keys are returned relative to `family`. Reading stops at the
/// `N results found.` trailer.
pub fn decode_show(block: &ResponseBlock, family: &str) -> DbReply {
    let prefix = format!("/{}/", family.trim_matches('/'));
    let mut entries = Vec::new();

    for line in block.output_lines() {
        if line.contains(SHOW_TRAILER) {
            break;
        }
        let row = line.trim();
        let row = row.strip_prefix(prefix.as_str()).unwrap_or(row);
        if let Some(entry) = DbEntry::parse(row) {
            entries.push(entry);
        }
    }

    DbReply::Entries(entries)
}

fn marker_reply(block: &ResponseBlock, marker: &str, ok: DbReply) -> DbReply {
    if block.contains(marker) {
        ok
    } else {
        DbReply::Failed
    }
}

/// Quote a CLI argument when it contains whitespace or quotes
pub fn cli_arg(value: &str) -> String {
    if value.is_empty() {
        return "\"\"".to_string();
    }
    if !value.chars().any(|c| c.is_whitespace() || c == '"') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_get() {
        let block = ResponseBlock::from_text(
            "Response: Success\r\nMessage: Command output follows\r\nOutput: Value: 201\r\n",
        );
        assert_eq!(decode_get(&block), DbReply::Value("201".into()));

        let missing = ResponseBlock::from_text(
            "Response: Success\r\nMessage: Command output follows\r\nOutput: Database entry not found.\r\n",
        );
        assert_eq!(decode_get(&missing), DbReply::Failed);
        assert_eq!(decode_get(&missing).into_value(), "");
    }

    #[test]
    fn test_decode_put_del() {
        let put = ResponseBlock::from_text("Response: Success\nOutput: Updated database successfully\n");
        assert_eq!(decode_put(&put), DbReply::Updated);
        assert_eq!(decode_del(&put), DbReply::Failed);

        let del = ResponseBlock::from_text("Response: Success\nOutput: Database entry removed.\n");
        assert_eq!(decode_del(&del), DbReply::Removed);

        let tree = ResponseBlock::from_text("Response: Success\nOutput: 7 database entries removed.\n");
        assert_eq!(decode_deltree(&tree), DbReply::Removed);
    }

    #[test]
    fn test_decode_show() {
        let block = ResponseBlock::from_text(
            "Response: Success\n\
             Message: Command output follows\n\
             Output: /ABS/EXT/201                                      : PJSIP/phone1\n\
             Output: /ABS/EXT/201/OGCID                                : 0312345678\n\
             Output: /ABS/EXT/G1                                       : G1\n\
             Output: 3 results found.\n",
        );
        let entries = decode_show(&block, "ABS/EXT").into_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, "201");
        assert_eq!(entries[0].value, "PJSIP/phone1");
        assert_eq!(entries[1].key, "201/OGCID");
    }

    #[test]
    fn test_decode_show_legacy_format() {
        let block = ResponseBlock::from_text(
            "Response: Follows\n\
             Privilege: Command\n\
             /ABS/TSSW/1                 : on\n\
             1 results found.\n\
             --END COMMAND--\n",
        );
        let entries = decode_show(&block, "ABS/TSSW").into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "1");
        assert_eq!(entries[0].value, "on");
    }

    #[test]
    fn test_header_lookup() {
        let block = ResponseBlock::from_text("Response: Error\nMessage: Permission denied\n");
        assert!(block.is_error());
        assert!(!block.is_success());
        assert_eq!(block.message(), Some("Permission denied"));
    }

    #[test]
    fn test_truncated_flag() {
        let block = ResponseBlock::truncated(vec!["Response: Success".into()]);
        assert!(!block.is_terminated());
        assert!(block.is_success());
    }

    #[test]
    fn test_cli_arg() {
        assert_eq!(cli_arg("201"), "201");
        assert_eq!(cli_arg("Front Desk"), "\"Front Desk\"");
        assert_eq!(cli_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(cli_arg(""), "\"\"");
    }
}
