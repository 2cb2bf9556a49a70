//! Command specification: accepts either a pre-split argument list or a
//! single string split with POSIX shell-quoting rules.

use crate::error::ProcessError;

/// A command to spawn, as either a pre-split argument vector or a raw string.
///
/// Strings are split using POSIX shell-quoting rules: unquoted
/// whitespace separates arguments, single and double quotes group
/// them, and a backslash escapes the next character.
#[derive(Debug, Clone)]
pub enum Command {
    Words(Vec<String>),
    Line(String),
}

impl From<Vec<String>> for Command {
    fn from(words: Vec<String>) -> Self {
        Self::Words(words)
    }
}

impl From<&[&str]> for Command {
    fn from(words: &[&str]) -> Self {
        Self::Words(words.iter().map(|s| (*s).to_string()).collect())
    }
}

impl From<String> for Command {
    fn from(line: String) -> Self {
        Self::Line(line)
    }
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Self::Line(line.to_string())
    }
}

impl Command {
    /// Resolve into a non-empty argument vector, or fail with `BadParameter`.
    pub fn into_argv(self) -> Result<Vec<String>, ProcessError> {
        let argv = match self {
            Self::Words(words) => words,
            Self::Line(line) => shell_words::split(&line)
                .map_err(|e| ProcessError::bad_parameter(format!("invalid command string: {e}")))?,
        };

        if argv.is_empty() {
            return Err(ProcessError::bad_parameter(
                "command expects a non-empty string or sequence",
            ));
        }

        Ok(argv)
    }
}
