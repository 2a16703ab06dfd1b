//! Task script resolution from the command line.
//!
//! A task script can be given inline or as a path to a local file. Both
//! sources go through here so every subcommand applies the same rules.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while resolving the task script.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ScriptSourceError {
    /// Raised when both inline and file sources are provided.
    #[error("task script cannot be provided both inline and via file")]
    BothProvided,
    /// Raised when an inline script is empty or only whitespace.
    #[error("task script must not be empty")]
    InlineEmpty,
    /// Raised when a file path is empty or only whitespace.
    #[error("task script file path must not be empty")]
    FilePathEmpty,
    /// Raised when a script file is empty or only whitespace.
    #[error("task script file `{0}` is empty")]
    FileEmpty(String),
    /// Raised when reading the script file fails.
    #[error("failed to read task script file `{path}`: {message}")]
    FileRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Resolves the task script from either an inline value or a file.
///
/// Returns `None` when neither source is given. The returned script keeps its
/// original content, including a leading shebang.
///
/// # Errors
///
/// Returns [`ScriptSourceError`] when both sources are set, a source is blank,
/// or the file cannot be read.
pub fn resolve_script(
    inline: Option<&str>,
    file: Option<&str>,
) -> Result<Option<String>, ScriptSourceError> {
    if inline.is_some() && file.is_some() {
        return Err(ScriptSourceError::BothProvided);
    }

    if let Some(script) = inline {
        if script.trim().is_empty() {
            return Err(ScriptSourceError::InlineEmpty);
        }
        return Ok(Some(script.to_owned()));
    }

    let Some(path) = file else {
        return Ok(None);
    };
    if path.trim().is_empty() {
        return Err(ScriptSourceError::FilePathEmpty);
    }

    let expanded = expand_tilde(path);
    let content = read_to_string_ambient(&expanded).map_err(|message| {
        ScriptSourceError::FileRead {
            path: expanded.clone(),
            message,
        }
    })?;
    if content.trim().is_empty() {
        return Err(ScriptSourceError::FileEmpty(expanded));
    }
    Ok(Some(content))
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);
    let file_name = path_buf
        .file_name()
        .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
    let dir_path = match path_buf.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}
