//! SMTP session state machine

use crate::smtp::body::{BodyCollector, Feed};
use crate::smtp::config::ServerConfig;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::parser::{Command, Verb, parse_command, parse_path};
use crate::smtp::reply::Reply;
use crate::smtp::sink::{Envelope, MessageSink};
use log::{debug, info, warn};
use std::sync::Arc;

/// Where a session is within a mail transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connected, no transaction in progress
    Greeted,
    /// MAIL FROM accepted
    SenderSet,
    /// RCPT TO accepted - ready for DATA or a replacement RCPT
    RecipientSet,
    /// DATA accepted - collecting body lines
    ReceivingData,
    /// QUIT received or the connection dropped
    Closed,
}

/// State for one connection. Every change goes through `handle` or
/// `collect_line`, one line at a time.
pub struct Session {
    config: Arc<ServerConfig>,
    sink: Arc<dyn MessageSink>,
    phase: Phase,
    sender: Option<String>,
    recipient: Option<String>,
    body: BodyCollector,
    client_domain: Option<String>,
}

impl Session {
    pub fn new(config: Arc<ServerConfig>, sink: Arc<dyn MessageSink>) -> Self {
        let body = BodyCollector::new(config.max_message_size);
        Self {
            config,
            sink,
            phase: Phase::Greeted,
            sender: None,
            recipient: None,
            body,
            client_domain: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn client_domain(&self) -> Option<&str> {
        self.client_domain.as_deref()
    }

    /// Bytes of body collected so far in the current transaction
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Reply sent when the connection opens
    pub fn greeting(&self) -> Reply {
        Reply::greeting(&self.config.hostname)
    }

    /// Handle one command line with its line ending removed.
    ///
    /// Blank lines are ignored and produce no reply.
    pub fn handle_line(&mut self, line: &str) -> Option<Reply> {
        // the limit counts the CRLF that was stripped
        if line.len() + 2 > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Some(
                SmtpError::LineTooLong {
                    max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
                }
                .to_reply(),
            );
        }
        if line.trim().is_empty() {
            return None;
        }
        Some(self.handle(&parse_command(line)))
    }

    /// Apply one command to the session and produce its reply
    pub fn handle(&mut self, command: &Command) -> Reply {
        match self.dispatch(command) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("{} rejected: {e}", command.verb);
                e.to_reply()
            }
        }
    }

    fn dispatch(&mut self, command: &Command) -> Result<Reply, SmtpError> {
        match self.phase {
            Phase::ReceivingData => {
                return Err(SmtpError::BadSequence(
                    "message body in progress".to_string(),
                ));
            }
            Phase::Closed => {
                return Err(SmtpError::BadSequence("session is closed".to_string()));
            }
            _ => {}
        }

        match &command.verb {
            Verb::Helo => self.handle_helo(&command.remainder),
            #[cfg(feature = "ehlo")]
            Verb::Ehlo => self.handle_ehlo(&command.remainder),
            Verb::Mail => self.handle_mail(&command.remainder),
            Verb::Rcpt => self.handle_rcpt(&command.remainder),
            Verb::Data => self.handle_data(&command.remainder),
            Verb::Rset => {
                self.reset();
                Ok(Reply::ok())
            }
            Verb::Noop => Ok(Reply::ok()),
            Verb::Quit => {
                self.clear_transaction();
                self.phase = Phase::Closed;
                Ok(Reply::quit(&self.config.hostname))
            }
            Verb::Unknown(word) => Err(SmtpError::UnrecognizedCommand(word.clone())),
        }
    }

    fn take_client_domain(&mut self, remainder: &str) -> Result<String, SmtpError> {
        let domain = remainder.trim();
        if domain.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "domain argument required".to_string(),
            ));
        }
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.reset();
        self.client_domain = Some(domain.to_owned());
        Ok(domain.to_owned())
    }

    fn handle_helo(&mut self, remainder: &str) -> Result<Reply, SmtpError> {
        let domain = self.take_client_domain(remainder)?;
        Ok(Reply::helo(&self.config.hostname, &domain))
    }

    #[cfg(feature = "ehlo")]
    fn handle_ehlo(&mut self, remainder: &str) -> Result<Reply, SmtpError> {
        let domain = self.take_client_domain(remainder)?;
        Ok(Reply::ehlo(
            &self.config.hostname,
            &domain,
            self.config.max_message_size,
        ))
    }

    /// MAIL starts a new transaction from any phase
    fn handle_mail(&mut self, remainder: &str) -> Result<Reply, SmtpError> {
        let sender = parse_path(remainder, "FROM")?;

        self.clear_transaction();
        self.sender = Some(sender);
        self.phase = Phase::SenderSet;
        Ok(Reply::ok())
    }

    /// A second RCPT replaces the first
    fn handle_rcpt(&mut self, remainder: &str) -> Result<Reply, SmtpError> {
        if self.sender.is_none() {
            return Err(SmtpError::BadSequence("need MAIL command first".to_string()));
        }
        let recipient = parse_path(remainder, "TO")?;

        self.recipient = Some(recipient);
        self.phase = Phase::RecipientSet;
        Ok(Reply::ok())
    }

    fn handle_data(&mut self, remainder: &str) -> Result<Reply, SmtpError> {
        if self.phase != Phase::RecipientSet || self.recipient.is_none() {
            return Err(SmtpError::BadSequence("need RCPT command first".to_string()));
        }
        if !remainder.trim().is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            ));
        }

        self.body.clear();
        self.phase = Phase::ReceivingData;
        Ok(Reply::data_start())
    }

    /// Feed one raw body line, line ending included.
    ///
    /// Returns `None` while the body is still being collected. When the
    /// terminator arrives the message is handed to the sink and the session
    /// is ready for a new transaction.
    pub fn collect_line(&mut self, line: &[u8]) -> Option<Reply> {
        if self.phase != Phase::ReceivingData {
            return Some(
                SmtpError::BadSequence("not collecting a message body".to_string()).to_reply(),
            );
        }

        match self.body.feed(line) {
            Feed::More => None,
            Feed::Complete => {
                let reply = match self.deliver() {
                    Ok(()) => Reply::ok(),
                    Err(e) => e.to_reply(),
                };
                self.reset();
                Some(reply)
            }
        }
    }

    /// A line longer than any this server accepts arrived and was dropped
    /// unread. In a body it fails the transaction at the terminator; as a
    /// command it is answered right away.
    pub fn overlong_line(&mut self) -> Option<Reply> {
        if self.phase == Phase::ReceivingData {
            self.body.reject_line();
            None
        } else {
            Some(
                SmtpError::LineTooLong {
                    max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
                }
                .to_reply(),
            )
        }
    }

    fn deliver(&mut self) -> Result<(), SmtpError> {
        let body = self.body.finish()?;
        let (Some(sender), Some(recipient)) = (self.sender.take(), self.recipient.take()) else {
            return Err(SmtpError::BadSequence("incomplete envelope".to_string()));
        };
        let envelope = Envelope { sender, recipient };

        match self.sink.store(&envelope, &body) {
            Ok(()) => {
                info!(
                    "stored {} bytes from <{}> to <{}>",
                    body.len(),
                    envelope.sender,
                    envelope.recipient
                );
                Ok(())
            }
            Err(e) => {
                warn!("failed to store message for <{}>: {e}", envelope.recipient);
                Err(e.into())
            }
        }
    }

    /// The connection went away: drop any partial transaction unsaved
    pub fn disconnect(&mut self) {
        if self.phase == Phase::ReceivingData {
            debug!("discarding {} bytes of unfinished body", self.body.len());
        }
        self.clear_transaction();
        self.phase = Phase::Closed;
    }

    /// Abandon the current transaction, keeping the connection open
    pub fn reset(&mut self) {
        self.clear_transaction();
        self.phase = Phase::Greeted;
    }

    fn clear_transaction(&mut self) {
        self.sender = None;
        self.recipient = None;
        self.body.clear();
    }
}
