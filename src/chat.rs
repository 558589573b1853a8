//! Prompt and interactive chat sessions over a [`Generator`].

use crate::config::GenerationSettings;
use crate::error::{EdgeError, Result};
use crate::inference::{GenerateRequest, Generator};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Words that end an interactive session
const QUIT_WORDS: &[&str] = &["quit", "exit", "q"];

/// Routes Ctrl-C to the generation in flight
#[derive(Debug, Default)]
pub struct Interrupt {
    generating: AtomicBool,
    cancel: AtomicBool,
}

impl Interrupt {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cancel the running generation; returns false when nothing was running
    pub fn trigger(&self) -> bool {
        if self.generating.load(Ordering::SeqCst) {
            self.cancel.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn begin(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        self.generating.store(true, Ordering::SeqCst);
    }

    fn end(&self) -> bool {
        self.generating.store(false, Ordering::SeqCst);
        self.cancel.swap(false, Ordering::SeqCst)
    }
}

/// Generated text of one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub interrupted: bool,
}

pub struct ChatSession<'a> {
    generator: &'a mut dyn Generator,
    settings: GenerationSettings,
    stop: Vec<String>,
    interrupt: Arc<Interrupt>,
    show_spinner: bool,
}

impl<'a> ChatSession<'a> {
    pub fn new(
        generator: &'a mut dyn Generator,
        settings: GenerationSettings,
        stop: Vec<String>,
        interrupt: Arc<Interrupt>,
    ) -> Self {
        Self {
            generator,
            settings,
            stop,
            interrupt,
            show_spinner: true,
        }
    }

    /// Toggle the "Thinking..." spinner
    #[must_use]
    pub fn with_spinner(mut self, show_spinner: bool) -> Self {
        self.show_spinner = show_spinner;
        self
    }

    /// Run one prompt through the generator
    pub fn respond(&mut self, prompt: &str) -> Result<Reply> {
        let spinner = if self.show_spinner {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message("Thinking...");
        spinner.enable_steady_tick(Duration::from_millis(120));

        let request = GenerateRequest::new(prompt, &self.settings, &self.stop);
        self.interrupt.begin();
        let result = self.generator.generate(&request, &self.interrupt.cancel);
        let interrupted = self.interrupt.end();
        spinner.finish_and_clear();

        let text = result?;
        Ok(Reply {
            text: text.trim().to_string(),
            interrupted,
        })
    }

    /// Read prompts from `input` until EOF or a quit word.
    ///
    /// A failed turn is reported and the loop continues.
    pub fn run<R: BufRead, W: Write>(
        &mut self,
        model_name: &str,
        mut input: R,
        mut out: W,
    ) -> Result<()> {
        writeln!(out, "\nChat with {model_name} (type 'quit' to exit)")?;
        writeln!(out, "{}", "=".repeat(50))?;

        let mut line = String::new();
        loop {
            write!(out, "\nYou: ")?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }

            let prompt = line.trim();
            if QUIT_WORDS.contains(&prompt.to_lowercase().as_str()) {
                break;
            }
            if prompt.is_empty() {
                continue;
            }

            writeln!(out, "\nAssistant:")?;
            match self.respond(prompt) {
                Ok(reply) if reply.interrupted => writeln!(out, "{} [interrupted]", reply.text)?,
                Ok(reply) => writeln!(out, "{}", reply.text)?,
                Err(EdgeError::InferenceFailed(e)) => {
                    tracing::warn!("Turn failed: {e}");
                    writeln!(out, "❌ Error: {e}")?;
                }
                Err(e) => return Err(e),
            }
        }

        writeln!(out, "\nGoodbye!")?;
        Ok(())
    }
}
