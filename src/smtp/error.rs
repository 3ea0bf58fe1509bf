//! Error types for the SMTP server

use crate::smtp::reply::{Reply, ReplyCode};
use crate::smtp::sink::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognized command: {0}")]
    UnrecognizedCommand(String),

    #[error("Bad sequence of commands: {0}")]
    BadSequence(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Message line too long (max {max} characters)")]
    BodyLineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("User name too long (max {max} characters)")]
    UserTooLong { max: usize },

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
}

/// SMTP size limits as defined in RFC 821
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a user name
    pub const USER_MAX_LENGTH: usize = 64;

    /// Maximum length of a domain name
    pub const DOMAIN_MAX_LENGTH: usize = 64;

    /// Maximum length of a path (reverse-path or forward-path)
    pub const PATH_MAX_LENGTH: usize = 256;

    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a text line including CRLF
    pub const TEXT_LINE_MAX_LENGTH: usize = 1000;

    /// Default cap on the size of a message body
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024; // 10MB
}

impl SmtpError {
    /// Reply code the client sees for this error
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            SmtpError::Io(_) => ReplyCode::ServiceUnavailable,
            SmtpError::UnrecognizedCommand(_) => ReplyCode::Unrecognized,
            SmtpError::BadSequence(_) => ReplyCode::BadSequence,
            SmtpError::InvalidSyntax(_) => ReplyCode::SyntaxError,
            SmtpError::LineTooLong { .. } => ReplyCode::CommandSyntaxError,
            SmtpError::BodyLineTooLong { .. } => ReplyCode::StorageExceeded,
            SmtpError::PathTooLong { .. } => ReplyCode::SyntaxError,
            SmtpError::TooMuchData { .. } => ReplyCode::StorageExceeded,
            SmtpError::DomainTooLong { .. } => ReplyCode::SyntaxError,
            SmtpError::UserTooLong { .. } => ReplyCode::SyntaxError,
            SmtpError::Storage(_) => ReplyCode::LocalError,
            SmtpError::ConnectionClosed => ReplyCode::ServiceUnavailable,
        }
    }

    pub fn reply_text(&self) -> String {
        match self {
            SmtpError::Io(_) => "Service not available".to_string(),
            SmtpError::UnrecognizedCommand(_) => "Command unrecognized".to_string(),
            SmtpError::BadSequence(msg) => format!("Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("Syntax error: {msg}"),
            SmtpError::Storage(_) => {
                "Requested action aborted: local error in processing".to_string()
            }
            SmtpError::ConnectionClosed => "Connection closed".to_string(),
            other => other.to_string(),
        }
    }

    /// Convert into the reply sent back to the client
    pub fn to_reply(&self) -> Reply {
        Reply::new(self.reply_code(), &self.reply_text())
    }
}
