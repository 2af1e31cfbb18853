//! Content reconstruction after a failed upload verification.
//!
//! When the stored text does not hash to the digest the sender declared,
//! the session asks a [`ReconstructionOracle`] for a replacement once. The
//! oracle is a capability: anything that maps corrupted text to candidate
//! text can be plugged in. [`CommandOracle`] runs an external program with
//! the text on stdin and takes its stdout as the candidate.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

pub type OracleFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

// ── Format hint ───────────────────────────────────────────────────────────────

/// File type derived from the filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatHint {
    PlainText,
    Markdown,
    Python,
    JavaScript,
    Html,
    Css,
    Json,
    Xml,
    Csv,
    Pdf,
    Docx,
    Unknown,
}

impl FormatHint {
    pub fn from_filename(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("txt") => FormatHint::PlainText,
            Some("md") => FormatHint::Markdown,
            Some("py") => FormatHint::Python,
            Some("js") => FormatHint::JavaScript,
            Some("html") | Some("htm") => FormatHint::Html,
            Some("css") => FormatHint::Css,
            Some("json") => FormatHint::Json,
            Some("xml") => FormatHint::Xml,
            Some("csv") => FormatHint::Csv,
            Some("pdf") => FormatHint::Pdf,
            Some("docx") => FormatHint::Docx,
            _ => FormatHint::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatHint::PlainText => "text",
            FormatHint::Markdown => "markdown",
            FormatHint::Python => "python",
            FormatHint::JavaScript => "javascript",
            FormatHint::Html => "html",
            FormatHint::Css => "css",
            FormatHint::Json => "json",
            FormatHint::Xml => "xml",
            FormatHint::Csv => "csv",
            FormatHint::Pdf => "pdf",
            FormatHint::Docx => "docx",
            FormatHint::Unknown => "unknown",
        }
    }

    /// Formats whose stored bytes are the text itself. PDF and DOCX need
    /// extraction first, which is not done here.
    pub fn is_plain_text(self) -> bool {
        !matches!(self, FormatHint::Pdf | FormatHint::Docx | FormatHint::Unknown)
    }
}

// ── Oracle ────────────────────────────────────────────────────────────────────

pub trait ReconstructionOracle: Send + Sync {
    fn supports(&self, hint: FormatHint) -> bool {
        hint.is_plain_text()
    }

    /// Best-effort replacement for `corrupted`, or `None`.
    fn reconstruct<'a>(&'a self, corrupted: &'a str, hint: FormatHint) -> OracleFuture<'a>;
}

/// Oracle backed by a plain function. The function runs on tokio's blocking
/// pool, so it may block. A call that outlives the policy timeout is
/// abandoned but not interrupted.
pub struct FnOracle<F>(pub F);

impl<F> ReconstructionOracle for FnOracle<F>
where
    F: Fn(&str, FormatHint) -> Option<String> + Clone + Send + Sync + 'static,
{
    fn reconstruct<'a>(&'a self, corrupted: &'a str, hint: FormatHint) -> OracleFuture<'a> {
        let f = self.0.clone();
        let corrupted = corrupted.to_string();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || f(&corrupted, hint)).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    tracing::warn!(error = %e, "reconstruction function failed");
                    None
                }
            }
        })
    }
}

/// Runs `program args...` with the corrupted text on stdin and the format
/// in `VERITY_FORMAT_HINT`. A zero exit with non-empty stdout is a candidate.
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    /// Build from an argv list. `None` if it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl ReconstructionOracle for CommandOracle {
    fn reconstruct<'a>(&'a self, corrupted: &'a str, hint: FormatHint) -> OracleFuture<'a> {
        Box::pin(async move {
            let mut child = match tokio::process::Command::new(&self.program)
                .args(&self.args)
                .env("VERITY_FORMAT_HINT", hint.as_str())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(program = %self.program, error = %e, "failed to spawn reconstruction command");
                    return None;
                }
            };

            let stdin = child.stdin.take();
            let feed = async move {
                if let Some(mut stdin) = stdin {
                    let _ = stdin.write_all(corrupted.as_bytes()).await;
                }
            };
            let (_, output) = tokio::join!(feed, child.wait_with_output());

            let output = match output {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(program = %self.program, error = %e, "reconstruction command failed");
                    return None;
                }
            };
            if !output.status.success() {
                tracing::warn!(
                    program = %self.program,
                    code = output.status.code().unwrap_or(-1),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "reconstruction command exited with failure"
                );
                return None;
            }
            let text = String::from_utf8_lossy(&output.stdout).into_owned();
            (!text.is_empty()).then_some(text)
        })
    }
}

// ── Policy ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryResult {
    Reconstructed(String),
    /// No oracle configured.
    Unavailable,
    Unsupported(FormatHint),
    NoOutput,
    TimedOut,
}

impl RecoveryResult {
    pub fn describe(&self) -> &'static str {
        match self {
            RecoveryResult::Reconstructed(_) => "reconstructed",
            RecoveryResult::Unavailable => "recovery unavailable",
            RecoveryResult::Unsupported(_) => "format unsupported",
            RecoveryResult::NoOutput => "oracle returned nothing",
            RecoveryResult::TimedOut => "oracle timed out",
        }
    }
}

/// One bounded call into the configured oracle.
#[derive(Clone)]
pub struct RecoveryPolicy {
    oracle: Option<Arc<dyn ReconstructionOracle>>,
    timeout: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl RecoveryPolicy {
    pub fn new(oracle: Arc<dyn ReconstructionOracle>, timeout: Duration) -> Self {
        Self {
            oracle: Some(oracle),
            timeout,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            oracle: None,
            timeout: Duration::from_secs(0),
        }
    }

    pub async fn attempt(&self, corrupted: &str, hint: FormatHint) -> RecoveryResult {
        let Some(oracle) = &self.oracle else {
            return RecoveryResult::Unavailable;
        };
        if !oracle.supports(hint) {
            return RecoveryResult::Unsupported(hint);
        }
        match tokio::time::timeout(self.timeout, oracle.reconstruct(corrupted, hint)).await {
            Ok(Some(text)) => RecoveryResult::Reconstructed(text),
            Ok(None) => RecoveryResult::NoOutput,
            Err(_) => RecoveryResult::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_from_extension() {
        assert_eq!(FormatHint::from_filename("notes.TXT"), FormatHint::PlainText);
        assert_eq!(FormatHint::from_filename("app.py"), FormatHint::Python);
        assert_eq!(FormatHint::from_filename("report.pdf"), FormatHint::Pdf);
        assert_eq!(FormatHint::from_filename("archive.tar.gz"), FormatHint::Unknown);
        assert_eq!(FormatHint::from_filename("README"), FormatHint::Unknown);
        assert!(FormatHint::Csv.is_plain_text());
        assert!(!FormatHint::Docx.is_plain_text());
    }

    #[tokio::test]
    async fn unavailable_without_oracle() {
        let policy = RecoveryPolicy::unavailable();
        assert_eq!(policy.attempt("x", FormatHint::PlainText).await, RecoveryResult::Unavailable);
    }

    #[tokio::test]
    async fn unsupported_format_skips_oracle() {
        let oracle = FnOracle(|_: &str, _: FormatHint| -> Option<String> { panic!("must not be called") });
        let policy = RecoveryPolicy::new(Arc::new(oracle), Duration::from_secs(1));
        assert_eq!(
            policy.attempt("x", FormatHint::Pdf).await,
            RecoveryResult::Unsupported(FormatHint::Pdf)
        );
    }

    #[tokio::test]
    async fn function_oracle_results() {
        let fixed = FnOracle(|text: &str, _: FormatHint| Some(text.replace('#', "e")));
        let policy = RecoveryPolicy::new(Arc::new(fixed), Duration::from_secs(1));
        assert_eq!(
            policy.attempt("h#llo", FormatHint::PlainText).await,
            RecoveryResult::Reconstructed("hello".into())
        );

        let empty = FnOracle(|_: &str, _: FormatHint| -> Option<String> { None });
        let policy = RecoveryPolicy::new(Arc::new(empty), Duration::from_secs(1));
        assert_eq!(policy.attempt("x", FormatHint::Markdown).await, RecoveryResult::NoOutput);
    }

    #[tokio::test]
    async fn blocking_function_leaves_runtime_free() {
        let slow = FnOracle(|text: &str, _: FormatHint| {
            std::thread::sleep(Duration::from_millis(300));
            Some(text.to_uppercase())
        });
        let policy = RecoveryPolicy::new(Arc::new(slow), Duration::from_secs(5));
        let attempt = tokio::spawn(async move { policy.attempt("abc", FormatHint::PlainText).await });

        let start = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(start.elapsed() < Duration::from_millis(250), "runtime thread was blocked");

        assert_eq!(attempt.await.unwrap(), RecoveryResult::Reconstructed("ABC".into()));
    }

    #[tokio::test]
    async fn panicking_function_is_no_output() {
        let oracle = FnOracle(|_: &str, _: FormatHint| -> Option<String> { panic!("boom") });
        let policy = RecoveryPolicy::new(Arc::new(oracle), Duration::from_secs(1));
        assert_eq!(policy.attempt("x", FormatHint::PlainText).await, RecoveryResult::NoOutput);
    }

    struct Stalled;

    impl ReconstructionOracle for Stalled {
        fn reconstruct<'a>(&'a self, _: &'a str, _: FormatHint) -> OracleFuture<'a> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn slow_oracle_times_out() {
        let policy = RecoveryPolicy::new(Arc::new(Stalled), Duration::from_millis(20));
        assert_eq!(policy.attempt("x", FormatHint::PlainText).await, RecoveryResult::TimedOut);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_oracle_pipes_text() {
        let argv = vec!["tr".to_string(), "#".to_string(), "e".to_string()];
        let oracle = CommandOracle::from_argv(&argv).unwrap();
        assert_eq!(
            oracle.reconstruct("h#llo", FormatHint::PlainText).await.as_deref(),
            Some("hello")
        );

        let failing = CommandOracle::from_argv(&["false".to_string()]).unwrap();
        assert_eq!(failing.reconstruct("x", FormatHint::PlainText).await, None);
        assert!(CommandOracle::from_argv(&[]).is_none());
    }
}
