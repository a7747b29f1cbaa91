//! Terminal supervisor for `migrate --interactive`
//!
//! Asks before each unit is scheduled and before a passing candidate is kept.
//! Answering `q` cancels the run; end of input counts as `q`.

use async_trait::async_trait;
use parking_lot::Mutex;
use polyport_core::{Supervisor, TranslationUnit, UnitStatus, Verdict};
use polyport_graph::FileId;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

type Input = Arc<Mutex<Box<dyn BufRead + Send>>>;
type Output = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Yes,
    No,
    Quit,
}

fn parse_answer(line: &str) -> Option<Answer> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "y" | "yes" => Some(Answer::Yes),
        "n" | "no" => Some(Answer::No),
        "q" | "quit" => Some(Answer::Quit),
        _ => None,
    }
}

/// Prompts on a terminal (or any reader/writer pair)
pub struct TerminalSupervisor {
    input: Input,
    output: Output,
    cancel: CancellationToken,
    show_candidates: bool,
}

impl std::fmt::Debug for TerminalSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSupervisor")
            .field("show_candidates", &self.show_candidates)
            .finish_non_exhaustive()
    }
}

impl TerminalSupervisor {
    /// Supervisor over arbitrary streams; `cancel` is the run's token
    pub fn new(
        input: Box<dyn BufRead + Send>,
        output: Box<dyn Write + Send>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            output: Arc::new(Mutex::new(output)),
            cancel,
            show_candidates: true,
        }
    }

    /// Reads stdin, prompts on stderr so stdout keeps only the report
    pub fn stdio(cancel: CancellationToken) -> Self {
        Self::new(
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stderr()),
            cancel,
        )
    }

    /// Print candidates before asking to accept them
    #[must_use]
    pub fn with_candidates(mut self, show: bool) -> Self {
        self.show_candidates = show;
        self
    }

    fn say(&self, text: &str) {
        let mut out = self.output.lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            warn!(error = %e, "Cannot write to terminal");
        }
    }

    /// Ask until a valid answer arrives; blocking IO runs off the runtime
    async fn ask(&self, question: String) -> Answer {
        let input = Arc::clone(&self.input);
        let output = Arc::clone(&self.output);
        let asked = tokio::task::spawn_blocking(move || loop {
            {
                let mut out = output.lock();
                if out
                    .write_all(question.as_bytes())
                    .and_then(|()| out.flush())
                    .is_err()
                {
                    return Answer::Quit;
                }
            }
            let mut line = String::new();
            match input.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return Answer::Quit,
                Ok(_) => {}
            }
            if let Some(answer) = parse_answer(&line) {
                return answer;
            }
        })
        .await;
        let answer = asked.unwrap_or_else(|e| {
            warn!(error = %e, "Prompt task failed");
            Answer::Quit
        });
        if answer == Answer::Quit && !self.cancel.is_cancelled() {
            self.say("Stopping after in-flight units finish.\n");
            self.cancel.cancel();
        }
        answer
    }
}

#[async_trait]
impl Supervisor for TerminalSupervisor {
    async fn approve_unit(&self, file: &FileId, dependencies: &[FileId]) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let question = if dependencies.is_empty() {
            format!("Translate {file}? [Y/n/q] ")
        } else {
            let names: Vec<&str> = dependencies.iter().map(FileId::as_str).collect();
            format!("Translate {file} (after {})? [Y/n/q] ", names.join(", "))
        };
        self.ask(question).await == Answer::Yes
    }

    async fn accept_candidate(&self, file: &FileId, candidate: &str, verdict: &Verdict) -> bool {
        if self.show_candidates {
            let mut text = format!("\n--- {file} ({} warnings) ---\n", verdict.warnings().len());
            for (n, line) in candidate.lines().enumerate() {
                text.push_str(&format!("{:>4} | {line}\n", n + 1));
            }
            text.push_str("---\n");
            self.say(&text);
        }
        self.ask(format!("Accept translation of {file}? [Y/n/q] ")).await == Answer::Yes
    }

    fn unit_finished(&self, unit: &TranslationUnit) {
        let mark = match unit.status() {
            UnitStatus::Converged => "ok",
            UnitStatus::Failed => "FAILED",
            _ => "skipped",
        };
        self.say(&format!(
            "[{mark}] {} ({}/{} attempts)\n",
            unit.file(),
            unit.attempt(),
            unit.max_iterations()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn supervisor(script: &str) -> (TerminalSupervisor, Shared, CancellationToken) {
        let out = Shared::default();
        let cancel = CancellationToken::new();
        let sup = TerminalSupervisor::new(
            Box::new(Cursor::new(script.as_bytes().to_vec())),
            Box::new(out.clone()),
            cancel.clone(),
        );
        (sup, out, cancel)
    }

    #[test]
    fn answers() {
        assert_eq!(parse_answer("\n"), Some(Answer::Yes));
        assert_eq!(parse_answer(" No \n"), Some(Answer::No));
        assert_eq!(parse_answer("q"), Some(Answer::Quit));
        assert_eq!(parse_answer("maybe"), None);
    }

    #[tokio::test]
    async fn approves_declines_and_reasks() {
        let (sup, out, cancel) = supervisor("y\nwhat\nn\n");
        let a = FileId::new("a.c");
        assert!(sup.approve_unit(&a, &[]).await);
        assert!(!sup.approve_unit(&a, &[FileId::new("b.h")]).await);
        assert!(!cancel.is_cancelled());

        let text = String::from_utf8(out.0.lock().clone()).unwrap();
        assert!(text.contains("Translate a.c? [Y/n/q]"));
        assert_eq!(text.matches("Translate a.c (after b.h)?").count(), 2);
    }

    #[tokio::test]
    async fn quit_and_eof_cancel_the_run() {
        let (sup, _, cancel) = supervisor("q\n");
        assert!(!sup.approve_unit(&FileId::new("a.c"), &[]).await);
        assert!(cancel.is_cancelled());
        assert!(!sup.approve_unit(&FileId::new("b.c"), &[]).await);

        let (sup, _, cancel) = supervisor("");
        assert!(!sup.accept_candidate(&FileId::new("a.c"), "x = 1", &Verdict::pass()).await);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn shows_candidate_before_accepting() {
        let (sup, out, _) = supervisor("yes\n");
        assert!(sup.accept_candidate(&FileId::new("a.c"), "x = 1\ny = 2", &Verdict::pass()).await);
        let text = String::from_utf8(out.0.lock().clone()).unwrap();
        assert!(text.contains("   2 | y = 2"));
        assert!(text.contains("Accept translation of a.c?"));
    }
}
