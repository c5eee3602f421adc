//! Text rewriting of the most recent copy through an external collaborator.

use crate::config::RewriteConfig;
use crate::error::RewriteError;
use crate::item::Representations;
use crate::monitor::ClipboardMonitor;
use crate::store::HistoryStore;
use async_trait::async_trait;
use log::{debug, info};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const REWRITE_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, prompt: &str, text: &str) -> Result<String, RewriteError>;
}

/// Runs a program with the prompt and text on stdin and takes its stdout as
/// the result.
#[derive(Debug, Clone)]
pub struct CommandRewriter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRewriter {
    /// `None` when `argv` is empty.
    pub fn new(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: REWRITE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CommandRewriter {
    async fn run(&self, prompt: &str, text: &str) -> Result<String, RewriteError> {
        let failed = |e: std::io::Error| RewriteError::Collaborator(format!("{}: {}", self.program, e));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(failed)?;

        // fed from its own task so a large input cannot deadlock against
        // unread output
        let input = format!("{}\n\n{}", prompt, text).into_bytes();
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("rewriter closed stdin early: {}", e);
                }
            })
        });

        let output = child.wait_with_output().await.map_err(failed)?;
        if let Some(writer) = writer {
            writer.abort();
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RewriteError::Collaborator(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Rewriter for CommandRewriter {
    /// The whole exchange, writing the input included, is bounded by the
    /// timeout; the child is killed when it runs out.
    async fn rewrite(&self, prompt: &str, text: &str) -> Result<String, RewriteError> {
        tokio::time::timeout(self.timeout, self.run(prompt, text))
            .await
            .map_err(|_| RewriteError::Collaborator(format!("{} timed out", self.program)))?
    }
}

/// The reword and define actions.
pub struct RewriteActions {
    rewriter: Arc<dyn Rewriter>,
    prompts: Vec<String>,
    define_prompt: String,
}

impl RewriteActions {
    pub fn new(rewriter: Arc<dyn Rewriter>, config: &RewriteConfig) -> Self {
        Self {
            rewriter,
            prompts: config.prompts.clone(),
            define_prompt: config.define_prompt.clone(),
        }
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    /// Rewrites the most recent copy with prompt `index` and puts the result
    /// on the clipboard without recording it as a new copy.
    pub async fn reword(&self, monitor: &ClipboardMonitor, index: usize) -> Result<String, RewriteError> {
        let prompt = self
            .prompts
            .get(index)
            .ok_or(RewriteError::UnknownPrompt(index))?;
        let result = self.run(monitor.store(), prompt).await?;

        monitor
            .write(&Representations::text(result.clone()))
            .map_err(|e| RewriteError::Write(e.to_string()))?;
        info!("reworded most recent copy with prompt {}", index);
        Ok(result)
    }

    /// Explains the most recent copy. The result is for display only.
    pub async fn define(&self, store: &HistoryStore) -> Result<String, RewriteError> {
        self.run(store, &self.define_prompt).await
    }

    async fn run(&self, store: &HistoryStore, prompt: &str) -> Result<String, RewriteError> {
        if prompt.trim().is_empty() {
            return Err(RewriteError::EmptyPrompt);
        }
        let item = store.most_recent().ok_or(RewriteError::NoHistory)?;
        let text = item
            .representations
            .as_text()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(RewriteError::EmptyText)?;

        debug!("rewriting item {} ({} chars)", item.id, text.chars().count());
        self.rewriter.rewrite(prompt.trim(), &text).await
    }
}
