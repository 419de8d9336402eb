//! Line editor for the prompt
//!
//! Wraps rustyline with history persisted in the home directory.

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const HISTORY_FILE: &str = ".kiln_history";

pub struct Repl {
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, ReadlineError> {
        let mut editor = DefaultEditor::new()?;
        // A missing history file is normal on first start.
        let _ = editor.load_history(&history_file_path());
        Ok(Repl { editor })
    }

    /// Read one line. `None` on end of input or interrupt.
    pub fn read_line(&mut self, prompt: &str) -> Option<String> {
        match self.editor.readline(prompt) {
            Ok(line) => Some(line),
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => None,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read input");
                None
            }
        }
    }

    pub fn add_history(&mut self, line: &str) {
        let _ = self.editor.add_history_entry(line);
    }

    pub fn finalize(&mut self) {
        if let Err(e) = self.editor.save_history(&history_file_path()) {
            tracing::debug!(error = %e, "cannot save history");
        }
    }
}

fn history_file_path() -> PathBuf {
    home_dir()
        .map(|home| home.join(HISTORY_FILE))
        .unwrap_or_else(|| PathBuf::from(HISTORY_FILE))
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        std::env::var_os("HOME").map(PathBuf::from)
    }
    #[cfg(windows)]
    {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}
