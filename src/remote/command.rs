use std::borrow::Cow;
use std::fmt;

use crate::remote::RemoteError;

/// A program and its arguments, sent to the remote shell as one quoted line
///
/// ssh hands the command line to the login shell, so every argument is quoted here instead of
/// relying on callers to format safe strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        RemoteCommand { program: program.into(), args: Vec::new() }
    }

    /// Build from a configured argv such as `["python3", "upload.py"]`
    pub fn from_argv(argv: &[String]) -> Result<Self, RemoteError> {
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| RemoteError::InvalidArgument(String::new()))?;
        Ok(RemoteCommand { program: program.clone(), args: rest.to_vec() })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// The quoted command line handed to the remote shell
    pub fn to_shell_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|s| quote(s))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_shell_line())
    }
}

/// POSIX single-quote an argument unless it only contains inert characters
pub fn quote(s: &str) -> Cow<'_, str> {
    if s.is_empty() {
        return Cow::Borrowed("''");
    }
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,".contains(c)) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
}

/// Job and scheduler ids end up in file names and command lines, keep them to a safe alphabet
pub fn validate_identifier(id: &str) -> Result<&str, RemoteError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    match valid {
        true => Ok(id),
        false => Err(RemoteError::InvalidArgument(id.to_string())),
    }
}

/// Remote paths may contain spaces (they get quoted) but never control characters or `..`
pub fn validate_path(path: &str) -> Result<&str, RemoteError> {
    let valid = !path.is_empty()
        && !path.chars().any(|c| c.is_control())
        && !path.split('/').any(|part| part == "..")
        && !path.starts_with('-');
    match valid {
        true => Ok(path),
        false => Err(RemoteError::InvalidArgument(path.to_string())),
    }
}
