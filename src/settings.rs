use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Environment variable holding the Zyte API key
pub const ZYTE_API_KEY_ENV: &str = "ZYTE_API_KEY";

/// Error type for settings operations
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(String),

    #[error("Python parse error: {0}")]
    PythonParse(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Setting not found: {0}")]
    SettingNotFound(String),

    /// A setting the current configuration cannot run without
    #[error("Missing required setting {0}. Set it in a .env file (ZYTE_API_KEY=...) or in the environment")]
    MissingSetting(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type for settings operations
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Settings format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Scrapy-style `settings.py` holding literal assignments
    Python,
}

impl SettingsFormat {
    /// Detect the format from a file path
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            match ext.as_str() {
                "toml" => Some(Self::Toml),
                "json" => Some(Self::Json),
                "yaml" | "yml" => Some(Self::Yaml),
                "py" => Some(Self::Python),
                _ => None,
            }
        })
    }
}

/// Settings for the crawler: upper-case keys mapped to JSON values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Raw settings as key-value pairs
    #[serde(flatten)]
    pub raw: HashMap<String, Value>,

    /// Path to the settings file, if loaded from a file
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl Settings {
    /// Create a new empty settings object
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = SettingsFormat::from_path(path)
            .ok_or_else(|| SettingsError::UnknownFormat(path.to_string_lossy().to_string()))?;

        let contents = fs::read_to_string(path)?;

        let mut settings = match format {
            SettingsFormat::Toml => Self::from_toml(&contents)?,
            SettingsFormat::Json => Self::from_json(&contents)?,
            SettingsFormat::Yaml => Self::from_yaml(&contents)?,
            SettingsFormat::Python => Self::from_python(&contents)?,
        };

        settings.file_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: HashMap<String, Value> =
            toml::from_str(contents).map_err(|e| SettingsError::TomlParse(e.to_string()))?;
        Ok(Self::from_raw(raw))
    }

    /// Load settings from JSON
    pub fn from_json(contents: &str) -> Result<Self> {
        let raw: HashMap<String, Value> = serde_json::from_str(contents)?;
        Ok(Self::from_raw(raw))
    }

    /// Load settings from YAML
    pub fn from_yaml(_contents: &str) -> Result<Self> {
        #[cfg(feature = "yaml")]
        {
            let raw: HashMap<String, Value> = serde_yaml::from_str(_contents)
                .map_err(|e| SettingsError::YamlParse(e.to_string()))?;
            Ok(Self::from_raw(raw))
        }

        #[cfg(not(feature = "yaml"))]
        {
            Err(SettingsError::YamlParse(
                "YAML support not enabled".to_string(),
            ))
        }
    }

    /// Load settings from a Scrapy `settings.py`.
    ///
    /// Only `NAME = <literal>` assignments are read. Literals may span
    /// several lines (dicts, lists). Docstrings, imports and assignments of
    /// anything that is not a literal are skipped.
    pub fn from_python(contents: &str) -> Result<Self> {
        let mut raw = HashMap::new();

        for (line_no, statement) in python_statements(contents) {
            let Some((name, expr)) = statement.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                continue;
            }
            // `a == b` is a comparison, not an assignment
            if expr.starts_with('=') {
                continue;
            }

            match parse_python_literal(expr) {
                Ok(value) => {
                    raw.insert(name.to_string(), value);
                }
                Err(LiteralError::NotALiteral) => {
                    debug!("Skipping non-literal setting {} (line {})", name, line_no);
                }
                Err(LiteralError::Syntax(message)) => {
                    return Err(SettingsError::PythonParse(format!(
                        "line {}: {}: {}",
                        line_no, name, message
                    )));
                }
            }
        }

        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: HashMap<String, Value>) -> Self {
        Self {
            raw,
            file_path: None,
        }
    }

    /// Get a setting as a specific type
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<T> {
        self.raw
            .get(key)
            .ok_or_else(|| SettingsError::SettingNotFound(key.to_string()))
            .and_then(|value| {
                serde_json::from_value(value.clone()).map_err(|e| SettingsError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })
    }

    /// Get a setting with a default value. A value of the wrong type is
    /// reported and replaced by the default.
    pub fn get_or<T: for<'de> Deserialize<'de>>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Ok(value) => value,
            Err(SettingsError::SettingNotFound(_)) => default,
            Err(e) => {
                warn!("{}; using the default", e);
                default
            }
        }
    }

    /// Set a setting
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.raw.insert(key.to_string(), value);
        Ok(())
    }

    /// Apply a `KEY=VALUE` override as given on the command line. The value
    /// is read as a Python or JSON literal, falling back to a plain string.
    pub fn set_from_str(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| SettingsError::InvalidValue {
                key: assignment.to_string(),
                message: "expected KEY=VALUE".to_string(),
            })?;
        let key = key.trim();
        let value = value.trim();

        let value = parse_python_literal(value)
            .ok()
            .or_else(|| serde_json::from_str(value).ok())
            .unwrap_or_else(|| Value::String(value.to_string()));

        self.raw.insert(key.to_string(), value);
        Ok(())
    }

    /// Check if a setting exists
    pub fn contains(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    /// Remove a setting
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.raw.remove(key)
    }

    /// Get all settings
    pub fn all(&self) -> &HashMap<String, Value> {
        &self.raw
    }

    /// Overlay `other` on these settings, `other` wins on conflicts
    pub fn merge(&mut self, other: &HashMap<String, Value>) {
        for (key, value) in other {
            self.raw.insert(key.clone(), value.clone());
        }
    }

    /// Copy of these settings with `overrides` applied on top
    pub fn with_overrides(&self, overrides: &HashMap<String, Value>) -> Self {
        let mut settings = self.clone();
        settings.merge(overrides);
        settings
    }

    /// Read `ZYTE_API_KEY` from the environment, which may have been
    /// populated from `.env`. Keys already set explicitly are kept.
    pub fn load_env(&mut self) {
        if let Ok(key) = std::env::var(ZYTE_API_KEY_ENV) {
            if !key.trim().is_empty() && !self.has_value(ZYTE_API_KEY_ENV) {
                self.raw.insert(ZYTE_API_KEY_ENV.to_string(), Value::String(key));
            }
        }
    }

    fn has_value(&self, key: &str) -> bool {
        match self.raw.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Keys in alphabetical order
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.raw.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Split a Python file into logical statements with their first line
/// number, joining lines while brackets are open and dropping docstrings
fn python_statements(contents: &str) -> Vec<(usize, String)> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut start = 0;
    let mut docstring: Option<&str> = None;

    for (idx, line) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();

        if let Some(quote) = docstring {
            if trimmed.contains(quote) {
                docstring = None;
            }
            continue;
        }

        if current.is_empty() {
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some(quote) = ["\"\"\"", "'''"]
                .into_iter()
                .find(|quote| trimmed.starts_with(quote))
            {
                if !trimmed[3..].contains(quote) {
                    docstring = Some(quote);
                }
                continue;
            }
            start = line_no;
        } else {
            current.push('\n');
        }

        current.push_str(line);
        if bracket_depth(&current) <= 0 {
            statements.push((start, std::mem::take(&mut current)));
        }
    }

    if !current.trim().is_empty() {
        statements.push((start, current));
    }

    statements
}

/// Open bracket count outside of strings and comments
fn bracket_depth(source: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut in_comment = false;

    for c in source.chars() {
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '#' => in_comment = true,
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth -= 1,
            _ => {}
        }
    }

    depth
}

#[derive(Debug)]
enum LiteralError {
    /// A valid expression that is not a plain literal, e.g. a call
    NotALiteral,
    Syntax(String),
}

/// Parse a Python literal (str, int, float, bool, None, list, tuple, dict)
/// into JSON, ignoring comments
fn parse_python_literal(source: &str) -> std::result::Result<Value, LiteralError> {
    let mut parser = LiteralParser {
        chars: source.chars().collect(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_trivia();
    if parser.pos < parser.chars.len() {
        return Err(LiteralError::NotALiteral);
    }
    Ok(value)
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
}

impl LiteralParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else if c.is_whitespace() || c == '\\' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn value(&mut self) -> std::result::Result<Value, LiteralError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(LiteralError::Syntax("expected a value".to_string())),
            Some('"') | Some('\'') => self.string().map(Value::String),
            Some('[') => self.sequence(']'),
            Some('(') => self.sequence(')'),
            Some('{') => self.dict(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
                    self.pos += 1;
                }
                let word: String = self.chars[start..self.pos].iter().collect();
                match word.as_str() {
                    "True" => Ok(Value::Bool(true)),
                    "False" => Ok(Value::Bool(false)),
                    "None" => Ok(Value::Null),
                    // String prefixes: r"..", u".."
                    "r" | "u" | "R" | "U" if matches!(self.peek(), Some('"') | Some('\'')) => {
                        self.string().map(Value::String)
                    }
                    _ => Err(LiteralError::NotALiteral),
                }
            }
            Some(c) => Err(LiteralError::Syntax(format!("unexpected character {:?}", c))),
        }
    }

    fn string(&mut self) -> std::result::Result<String, LiteralError> {
        let Some(quote) = self.peek() else {
            return Err(LiteralError::Syntax("expected a string".to_string()));
        };
        self.pos += 1;

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(LiteralError::Syntax("unterminated string".to_string()));
            };
            self.pos += 1;
            match c {
                c if c == quote => break,
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(LiteralError::Syntax("unterminated string".to_string()));
                    };
                    self.pos += 1;
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        other => out.push(other),
                    }
                }
                c => out.push(c),
            }
        }

        // Adjacent literals concatenate
        self.skip_trivia();
        if matches!(self.peek(), Some('"') | Some('\'')) {
            out.push_str(&self.string()?);
        }

        Ok(out)
    }

    fn number(&mut self) -> std::result::Result<Value, LiteralError> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(c) if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_')
        ) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        if let Ok(int) = text.parse::<i64>() {
            return Ok(Value::Number(int.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| LiteralError::Syntax(format!("invalid number {:?}", text)))
    }

    fn sequence(&mut self, close: char) -> std::result::Result<Value, LiteralError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_trivia();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(LiteralError::Syntax(format!("expected ',' or {:?}", close))),
            }
        }
    }

    fn dict(&mut self) -> std::result::Result<Value, LiteralError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }

            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return Err(LiteralError::Syntax("unsupported dict key".to_string())),
            };

            self.skip_trivia();
            if self.peek() != Some(':') {
                // A set literal
                return Err(LiteralError::NotALiteral);
            }
            self.pos += 1;

            let value = self.value()?;
            map.insert(key, value);

            self.skip_trivia();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                _ => return Err(LiteralError::Syntax("expected ',' or '}'".to_string())),
            }
        }
    }
}
