// src/notify/mailer.rs
// Outbound mail transports

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

impl MailMessage {
    /// Headers plus body in the form sendmail expects on stdin.
    pub fn to_rfc822(&self) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=UTF-8\r\n\r\n{}",
            header_value(&self.to.join(", ")),
            header_value(&self.subject),
            self.html_body
        )
    }
}

// Header values must not carry line breaks.
fn header_value(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Writes the mail to the log instead of sending it.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            "[mail] to={} subject=\"{}\" ({} bytes)",
            message.to.join(","),
            message.subject,
            message.html_body.len()
        );
        Ok(())
    }
}

/// Pipes the mail into a local sendmail-compatible binary.
pub struct SendmailTransport {
    path: String,
}

impl SendmailTransport {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    fn name(&self) -> &str {
        "sendmail"
    }

    async fn send(&self, message: &MailMessage) -> Result<()> {
        if message.to.is_empty() {
            return Err(Error::Dispatch("no recipients".into()));
        }

        let mut child = tokio::process::Command::new(&self.path)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Dispatch(format!("failed to start {}: {}", self.path, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.to_rfc822().as_bytes())
                .await
                .map_err(|e| Error::Dispatch(format!("failed to write mail: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Dispatch(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Dispatch(format!(
                "{} exited with {}: {}",
                self.path,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Pick a transport by configured name. Unknown names fall back to logging.
pub fn transport_from_name(name: &str, sendmail_path: &str) -> Arc<dyn MailTransport> {
    match name.trim().to_ascii_lowercase().as_str() {
        "sendmail" => Arc::new(SendmailTransport::new(sendmail_path)),
        "log" => Arc::new(LogTransport),
        other => {
            warn!("Unknown mail transport '{}', using log", other);
            Arc::new(LogTransport)
        }
    }
}
