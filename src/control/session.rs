//! One control connection
//!
//! Each session keeps a private working copy of the TermSet, taken when the
//! client connects. A line that changes the working copy commits the whole
//! copy as the new TermSet and wakes the downloader. Concurrent sessions
//! therefore follow last-writer-wins: a session never merges commits made by
//! others after it connected.

use super::codec::ControlLineCodec;
use super::command::{parse_line, Command, Token};
use super::disk::{disk_usage, format_space_used};
use crate::acquisition::TermSignal;
use crate::error::{Error, Result};
use crate::reaper::ReaperHandle;
use crate::registry::{format_terms, total_image_bytes, Registry, WorkingTerms};
use crate::settings::{parse_pairs, types, RuntimeVars};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

const PROMPT: &[u8] = b":";

/// Shared handles every session needs
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub vars: Arc<RuntimeVars>,
    pub reaper: ReaperHandle,
    pub signal: TermSignal,
    pub image_root: PathBuf,
    /// Fallback for the banner when `max_file_age` is unset
    pub default_max_age: u64,
    pub max_line_length: usize,
}

enum Flow {
    Continue,
    Exit,
}

/// Drive one connection until `^exit`, disconnect or shutdown
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    ctx: Arc<SessionContext>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(reader, ControlLineCodec::new(ctx.max_line_length));
    let mut session = Session {
        working: WorkingTerms::new(ctx.registry.terms().await),
        ctx,
        writer,
    };

    session.greet().await?;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                session.send_line("Server shutting down.").await?;
                break;
            }
            next = lines.next() => next,
        };

        let line = match next {
            None => {
                tracing::debug!("Client closed the connection");
                break;
            }
            Some(Ok(Ok(line))) => line,
            Some(Ok(Err(e))) => {
                tracing::debug!(error = %e, "Rejected input line");
                session.send_line(&format!("error: {}", e)).await?;
                session.prompt().await?;
                continue;
            }
            Some(Err(e)) => return Err(e.into()),
        };

        if let Flow::Exit = session.handle_line(&line).await? {
            session.send_line("Good bye.").await?;
            break;
        }
        session.prompt().await?;
    }

    session.writer.shutdown().await.ok();
    Ok(())
}

struct Session<W> {
    ctx: Arc<SessionContext>,
    writer: W,
    working: WorkingTerms,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    async fn greet(&mut self) -> Result<()> {
        let max_age = self
            .ctx
            .vars
            .get_u64(types::MAX_FILE_AGE, self.ctx.default_max_age)
            .await;
        self.send_line(
            "Add search terms by entering a term, or a comma separated list, then a new line. \
             Remove a term by prefixing it with \"-\". Send ^exit to exit.",
        )
        .await?;
        self.send_line(&format!(
            "Type ^space for device space, ^term to list search terms, ^clear to erase images \
             older than {} seconds, ^idea for the image directory size, ^download to fetch now, \
             ^vars to list or set variables.",
            max_age
        ))
        .await?;
        let terms = format_terms(self.working.terms());
        self.send_line(&format!("Search terms: {}", terms)).await?;
        self.prompt().await
    }

    async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let mut flow = Flow::Continue;
        for token in parse_line(line) {
            match token {
                Token::Edit(edit) => {
                    self.working.apply(edit);
                }
                Token::InvalidTerm(term) => {
                    self.send_line(&format!("error: invalid search term '{}'", term))
                        .await?;
                }
                Token::Command(Command::Exit) => {
                    flow = Flow::Exit;
                    break;
                }
                Token::Command(command) => self.execute(command).await?,
            }
        }

        if let Some(terms) = self.working.take_commit() {
            let rendered = format_terms(&terms);
            tracing::info!(terms = %rendered, "Committing search terms");
            self.ctx.registry.commit_terms(terms).await;
            self.ctx.signal.signal();
            self.send_line(&format!("Search terms: {}", rendered)).await?;
        }
        Ok(flow)
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        tracing::debug!(command = ?command, "Executing command");
        match command {
            Command::Space => {
                let root = self.ctx.image_root.clone();
                let response = match tokio::task::spawn_blocking(move || disk_usage(&root)).await {
                    Ok(Ok(usage)) => usage.format(),
                    Ok(Err(e)) => format!("error: cannot query disk usage: {}", e),
                    Err(e) => format!("error: disk usage query failed: {}", e),
                };
                self.send_line(&response).await
            }
            Command::Clear => {
                self.send("Wait...").await?;
                let response = match self.ctx.reaper.reap_now().await {
                    Ok(report) => report.format(),
                    Err(e) => format!("error: {}", e),
                };
                self.send_line(&response).await
            }
            Command::Idea => {
                self.send("Calculating... ").await?;
                let root = self.ctx.image_root.clone();
                let response =
                    match tokio::task::spawn_blocking(move || total_image_bytes(&root)).await {
                        Ok(Ok(bytes)) => format_space_used(bytes),
                        Ok(Err(e)) => format!("error: cannot measure image directory: {}", e),
                        Err(e) => format!("error: image directory scan failed: {}", e),
                    };
                self.send_line(&response).await
            }
            Command::Terms => {
                let terms = self.ctx.registry.terms().await;
                self.send_line(&format!("Search terms: {}", format_terms(&terms)))
                    .await
            }
            Command::Download => {
                self.ctx.signal.signal();
                self.send_line("Download requested.").await
            }
            Command::Vars(args) => self.vars(&args).await,
            Command::Unknown(name) => {
                self.send_line(&format!("error: unknown command {}", name))
                    .await
            }
            Command::Exit => Ok(()),
        }
    }

    async fn vars(&mut self, args: &str) -> Result<()> {
        if !args.is_empty() {
            let (pairs, mut errors) = parse_pairs(args);
            let update = self.ctx.vars.merge(pairs).await;
            errors.extend(update.errors);
            if !update.applied.is_empty() {
                tracing::info!(keys = ?update.applied, "Updated runtime variables");
            }
            for error in errors {
                self.send_line(&format!("error: {}", error)).await?;
            }
        }
        let rendered = self.ctx.vars.render().await;
        self.send_line(&rendered).await
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await.map_err(Error::from)
    }

    async fn send_line(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await.map_err(Error::from)
    }

    async fn prompt(&mut self) -> Result<()> {
        self.writer.write_all(PROMPT).await?;
        self.writer.flush().await.map_err(Error::from)
    }
}
