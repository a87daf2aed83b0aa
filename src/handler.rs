//! External ingestion handler.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::WatchError;

/// Receives every newly created file.
pub trait IngestHandler {
    /// Hand `path` off for ingestion under `root_token`.
    ///
    /// Must not block on the ingestion itself.
    fn launch(&self, root_token: Option<&str>, path: &Path) -> Result<(), WatchError>;
}

/// Runs `program [args...] <root_token> <path>` for every new file.
///
/// The child is spawned and immediately let go: nothing waits for it and its
/// exit status is never looked at. tokio reaps it in the background. A missing
/// root token is passed as an empty argument so positions stay stable.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>) -> Self {
        CommandHandler {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the root token and path.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl IngestHandler for CommandHandler {
    fn launch(&self, root_token: Option<&str>, path: &Path) -> Result<(), WatchError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(root_token.unwrap_or(""))
            .arg(path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| WatchError::HandlerLaunchFailed {
                program: self.program.clone(),
                source,
            })?;

        tracing::debug!(
            "[handler] spawned {} (pid {:?}) for {}",
            self.program,
            child.id(),
            path.display()
        );
        Ok(())
    }
}

/// Logs new files instead of running anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl IngestHandler for LogHandler {
    fn launch(&self, root_token: Option<&str>, path: &Path) -> Result<(), WatchError> {
        tracing::info!(
            "[handler] would ingest {} (root {})",
            path.display(),
            root_token.unwrap_or("<none>")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for_file(path: &Path) -> String {
        for _ in 0..100 {
            if let Ok(content) = std::fs::read_to_string(path) {
                if !content.is_empty() {
                    return content;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("handler never wrote {}", path.display());
    }

    #[tokio::test]
    async fn test_command_receives_token_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let handler = CommandHandler::new("sh").args([
            "-c".to_string(),
            format!("printf '%s|%s' \"$1\" \"$2\" > '{}'", out.display()),
            "handler".to_string(),
        ]);

        handler
            .launch(Some("catA"), Path::new("/base/catA/file.txt"))
            .unwrap();

        assert_eq!(wait_for_file(&out).await, "catA|/base/catA/file.txt");
    }

    #[tokio::test]
    async fn test_missing_token_is_empty_argument() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let handler = CommandHandler::new("sh").args([
            "-c".to_string(),
            format!("printf '[%s]|%s' \"$1\" \"$2\" > '{}'", out.display()),
            "handler".to_string(),
        ]);

        handler.launch(None, Path::new("/a/b.txt")).unwrap();

        assert_eq!(wait_for_file(&out).await, "[]|/a/b.txt");
    }

    #[tokio::test]
    async fn test_launch_does_not_wait_for_child() {
        let handler = CommandHandler::new("sleep");
        let started = std::time::Instant::now();
        // `sleep <token> <path>` fails eventually, nobody cares
        handler.launch(Some("5"), Path::new("5")).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unknown_program_fails_to_launch() {
        let handler = CommandHandler::new("/nonexistent/ingest-handler");
        let err = handler
            .launch(Some("catA"), Path::new("/base/catA/file.txt"))
            .unwrap_err();
        match err {
            WatchError::HandlerLaunchFailed { program, .. } => {
                assert_eq!(program, "/nonexistent/ingest-handler");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
