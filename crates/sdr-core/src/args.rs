//! Device argument strings.
//!
//! A device argument string describes one or more boards:
//!
//! ```text
//! uhd,serial=30A1,nchan=2 rtl=0,buffers=32 file='/tmp/my capture.cfile',rate=2e6
//! ```
//!
//! Unescaped spaces separate boards, unescaped commas separate `key=value`
//! tokens within a board. Single or double quotes protect spaces, commas and
//! `=` inside a value and are removed from the result. A backslash escapes the
//! next character. Bracketed sub-arguments (`subdev=[A:0 B:0]`) are kept
//! verbatim, brackets included. A token without `=` is a key with an empty
//! value (`uhd`, `nofake`).
//!
//! Parsing is pure: no registry lookup happens here.

use crate::error::{SdrError, SdrResult};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::str::FromStr;

/// Ordered key/value arguments for a single board.
///
/// Keys keep the position of their first occurrence; a later duplicate key
/// overwrites the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceArgs {
    pairs: Vec<(String, String)>,
}

impl DeviceArgs {
    /// Create an empty argument set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a full argument string into one `DeviceArgs` per board.
    ///
    /// An empty (or all-whitespace) string yields an empty vector.
    pub fn parse(input: &str) -> SdrResult<Vec<DeviceArgs>> {
        Tokenizer::new(input).run()
    }

    /// Insert or overwrite a value; returns the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.pairs.push((key, value));
                None
            }
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.pairs.iter().position(|(k, _)| k == key)?;
        Some(self.pairs.remove(idx).1)
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `key` is present (with or without a value).
    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Parse the value for `key` as `T`.
    ///
    /// Returns `Ok(None)` when the key is absent and
    /// [`SdrError::ParameterOutOfRange`] when the value does not parse.
    pub fn get_parsed<T>(&self, key: &str) -> SdrResult<Option<T>>
    where
        T: FromStr,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                SdrError::out_of_range(key, raw, std::any::type_name::<T>().to_string())
            }),
        }
    }

    /// Interpret `key` as a flag.
    ///
    /// A bare key counts as `true`; `0`, `false`, `no` and `off` count as
    /// `false`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| {
            !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            )
        })
    }

    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    /// Key/value pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Multi-line listing used by probe output.
    pub fn to_pp_string(&self) -> String {
        if self.pairs.is_empty() {
            return "Empty Device Address".to_string();
        }
        let mut out = String::from("Device Address:\n");
        for (k, v) in &self.pairs {
            out.push_str(&format!("    {}: {}\n", k, v));
        }
        out
    }
}

/// Join boards back into a single argument string.
pub fn format_boards(boards: &[DeviceArgs]) -> String {
    boards
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| matches!(c, ' ' | ',' | '=' | '\'' | '"'))
        && !(value.starts_with('[') && value.ends_with(']') && !value.contains('\''))
}

impl fmt::Display for DeviceArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(k)?;
            if v.is_empty() {
                continue;
            }
            f.write_str("=")?;
            if needs_quoting(v) {
                let escaped = v.replace('\\', "\\\\").replace('\'', "\\'");
                write!(f, "'{}'", escaped)?;
            } else {
                f.write_str(v)?;
            }
        }
        Ok(())
    }
}

impl Serialize for DeviceArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.pairs.len()))?;
        for (k, v) in &self.pairs {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl FromStr for DeviceArgs {
    type Err = SdrError;

    /// Parse a single board. More than one board is rejected.
    fn from_str(s: &str) -> SdrResult<Self> {
        let mut boards = DeviceArgs::parse(s)?;
        match boards.len() {
            0 => Ok(DeviceArgs::new()),
            1 => Ok(boards.remove(0)),
            n => Err(SdrError::MalformedArgument {
                input: s.to_string(),
                position: 0,
                reason: format!("expected a single board, found {}", n),
            }),
        }
    }
}

// =============================================================================
// Tokenizer
// =============================================================================

struct Tokenizer<'a> {
    input: &'a str,
    boards: Vec<DeviceArgs>,
    board: DeviceArgs,
    key: Option<String>,
    buf: String,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            boards: Vec::new(),
            board: DeviceArgs::new(),
            key: None,
            buf: String::new(),
        }
    }

    fn error(&self, position: usize, reason: impl Into<String>) -> SdrError {
        SdrError::MalformedArgument {
            input: self.input.to_string(),
            position,
            reason: reason.into(),
        }
    }

    fn run(mut self) -> SdrResult<Vec<DeviceArgs>> {
        let mut quote: Option<(char, usize)> = None;
        let mut brackets: Vec<usize> = Vec::new();
        let mut chars = self.input.char_indices();

        while let Some((pos, c)) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some((_, escaped)) => self.buf.push(escaped),
                    None => return Err(self.error(pos, "dangling escape character")),
                }
                continue;
            }

            if let Some((q, _)) = quote {
                if c == q {
                    quote = None;
                    if !brackets.is_empty() {
                        self.buf.push(c);
                    }
                } else {
                    self.buf.push(c);
                }
                continue;
            }

            match c {
                '\'' | '"' => {
                    quote = Some((c, pos));
                    if !brackets.is_empty() {
                        self.buf.push(c);
                    }
                }
                '[' => {
                    brackets.push(pos);
                    self.buf.push(c);
                }
                ']' => {
                    if brackets.pop().is_none() {
                        return Err(self.error(pos, "unbalanced ']'"));
                    }
                    self.buf.push(c);
                }
                _ if !brackets.is_empty() => self.buf.push(c),
                '=' if self.key.is_none() => {
                    let key = self.buf.trim().to_string();
                    if key.is_empty() {
                        return Err(self.error(pos, "empty key"));
                    }
                    self.key = Some(key);
                    self.buf.clear();
                }
                ',' => self.finish_pair(),
                c if c.is_whitespace() => {
                    self.finish_pair();
                    self.finish_board();
                }
                _ => self.buf.push(c),
            }
        }

        if let Some((_, pos)) = quote {
            return Err(self.error(pos, "unterminated quote"));
        }
        if let Some(pos) = brackets.first().copied() {
            return Err(self.error(pos, "unbalanced '['"));
        }

        self.finish_pair();
        self.finish_board();
        tracing::trace!(input = self.input, boards = self.boards.len(), "parsed device arguments");
        Ok(self.boards)
    }

    fn finish_pair(&mut self) {
        let value = std::mem::take(&mut self.buf);
        match self.key.take() {
            Some(key) => {
                self.board.insert(key, value);
            }
            None => {
                let key = value.trim();
                if !key.is_empty() {
                    self.board.insert(key.to_string(), "");
                }
            }
        }
    }

    fn finish_board(&mut self) {
        if !self.board.is_empty() {
            self.boards.push(std::mem::take(&mut self.board));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Vec<DeviceArgs> {
        DeviceArgs::parse(s).unwrap()
    }

    #[test]
    fn splits_boards_and_pairs() {
        let boards = parse("uhd,serial=30A1,nchan=2 rtl=0,buffers=32");
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].keys().collect::<Vec<_>>(), ["uhd", "serial", "nchan"]);
        assert_eq!(boards[0].get("uhd"), Some(""));
        assert_eq!(boards[0].get("serial"), Some("30A1"));
        assert_eq!(boards[1].get("rtl"), Some("0"));
        assert_eq!(boards[1].get_parsed::<u32>("buffers").unwrap(), Some(32));
    }

    #[test]
    fn empty_input_has_no_boards() {
        assert!(parse("").is_empty());
        assert!(parse("   ").is_empty());
    }

    #[test]
    fn repeated_spaces_do_not_create_empty_boards() {
        let boards = parse("rtl=0    rtl=1");
        assert_eq!(boards.len(), 2);
    }

    #[test]
    fn quoted_values_keep_spaces_and_commas() {
        let boards = parse("file='/tmp/my capture.cfile',rate=2e6 hackrf=0");
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].get("file"), Some("/tmp/my capture.cfile"));
        assert_eq!(boards[0].get_parsed::<f64>("rate").unwrap(), Some(2e6));

        let boards = parse("label=\"a,b|c d\"");
        assert_eq!(boards[0].get("label"), Some("a,b|c d"));
    }

    #[test]
    fn escapes_protect_separators() {
        let boards = parse(r"file=/tmp/a\ b.cfile,note=x\,y");
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].get("file"), Some("/tmp/a b.cfile"));
        assert_eq!(boards[0].get("note"), Some("x,y"));
    }

    #[test]
    fn brackets_are_kept_verbatim() {
        let boards = parse("uhd,subdev=[A:0 B:0],nchan=2");
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].get("subdev"), Some("[A:0 B:0]"));
        assert_eq!(boards[0].get("nchan"), Some("2"));
    }

    #[test]
    fn last_write_wins_and_keeps_first_position() {
        let boards = parse("rtl=0,gain=10,rtl=3");
        assert_eq!(boards[0].keys().collect::<Vec<_>>(), ["rtl", "gain"]);
        assert_eq!(boards[0].get("rtl"), Some("3"));
    }

    #[test]
    fn value_may_contain_equals() {
        let boards = parse("sensor=a=b");
        assert_eq!(boards[0].get("sensor"), Some("a=b"));
    }

    #[test]
    fn unterminated_quote_is_malformed() {
        let err = DeviceArgs::parse("file='/tmp/x,rate=1").unwrap_err();
        match err {
            SdrError::MalformedArgument { position, .. } => assert_eq!(position, 5),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unbalanced_brackets_are_malformed() {
        assert!(matches!(
            DeviceArgs::parse("uhd,subdev=[A:0"),
            Err(SdrError::MalformedArgument { .. })
        ));
        assert!(matches!(
            DeviceArgs::parse("uhd,subdev=A:0]"),
            Err(SdrError::MalformedArgument { .. })
        ));
    }

    #[test]
    fn dangling_escape_and_empty_key_are_malformed() {
        assert!(DeviceArgs::parse("rtl=0\\").is_err());
        assert!(DeviceArgs::parse("=5").is_err());
    }

    #[test]
    fn display_quotes_values_with_separators() {
        let args = DeviceArgs::new()
            .with("file", "/tmp/my capture.cfile")
            .with("rate", "2e6")
            .with("throttle", "");
        assert_eq!(args.to_string(), "file='/tmp/my capture.cfile',rate=2e6,throttle");
        let again: DeviceArgs = args.to_string().parse().unwrap();
        assert_eq!(again, args);
    }

    #[test]
    fn format_boards_joins_with_spaces() {
        let boards = parse("rtl=0 rtl=1,ppm=3");
        assert_eq!(format_boards(&boards), "rtl=0 rtl=1,ppm=3");
    }

    #[test]
    fn flags_and_typed_accessors() {
        let args: DeviceArgs = "hackrf,bias,amp=0".parse().unwrap();
        assert_eq!(args.get_bool("bias"), Some(true));
        assert_eq!(args.get_bool("amp"), Some(false));
        assert_eq!(args.get_bool("missing"), None);
        assert!(matches!(
            args.get_parsed::<u32>("amp").unwrap(),
            Some(0)
        ));
        assert!(args.get_parsed::<u32>("bias").is_err());
    }

    #[test]
    fn pretty_print_lists_pairs() {
        let args: DeviceArgs = "rtl=0,tuner=e4000".parse().unwrap();
        assert_eq!(args.to_pp_string(), "Device Address:\n    rtl: 0\n    tuner: e4000\n");
        assert_eq!(DeviceArgs::new().to_pp_string(), "Empty Device Address");
    }

    #[test]
    fn single_board_from_str_rejects_multiple() {
        assert!("rtl=0 rtl=1".parse::<DeviceArgs>().is_err());
    }

    #[test]
    fn serializes_as_ordered_map() {
        let args: DeviceArgs = "uhd,nchan=2".parse().unwrap();
        let json = serde_json::to_string(&args).unwrap();
        assert_eq!(json, r#"{"uhd":"","nchan":"2"}"#);
    }
}
