//! SMTP reply formatting and emission

use crate::smtp::error::SmtpLimits;
use std::fmt;
use std::io::{self, Write};

/// Outcome class of a reply, given by the first digit of its code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 2xx
    Success,
    /// 3xx
    Intermediate,
    /// 4xx - the client may retry later
    TransientFailure,
    /// 5xx
    PermanentFailure,
}

/// The fixed set of reply codes this server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// 220
    ServiceReady,
    /// 221
    Closing,
    /// 250
    Ok,
    /// 354
    StartInput,
    /// 421
    ServiceUnavailable,
    /// 451
    LocalError,
    /// 500
    CommandSyntaxError,
    /// 501
    SyntaxError,
    /// 503
    BadSequence,
    /// 550
    Unrecognized,
    /// 552
    StorageExceeded,
}

impl ReplyCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ReplyCode::ServiceReady => 220,
            ReplyCode::Closing => 221,
            ReplyCode::Ok => 250,
            ReplyCode::StartInput => 354,
            ReplyCode::ServiceUnavailable => 421,
            ReplyCode::LocalError => 451,
            ReplyCode::CommandSyntaxError => 500,
            ReplyCode::SyntaxError => 501,
            ReplyCode::BadSequence => 503,
            ReplyCode::Unrecognized => 550,
            ReplyCode::StorageExceeded => 552,
        }
    }

    pub fn class(self) -> ReplyClass {
        match self.as_u16() / 100 {
            2 => ReplyClass::Success,
            3 => ReplyClass::Intermediate,
            4 => ReplyClass::TransientFailure,
            _ => ReplyClass::PermanentFailure,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A reply sent to the client in answer to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    /// The human-readable text
    pub text: String,
    /// Extra lines for multiline replies (EHLO)
    pub multiline: Option<Vec<String>>,
}

impl Reply {
    pub fn new(code: ReplyCode, text: &str) -> Self {
        Self {
            code,
            text: text.to_owned(),
            multiline: None,
        }
    }

    pub fn new_multiline(code: ReplyCode, text: &str, lines: Vec<String>) -> Self {
        Self {
            code,
            text: text.to_owned(),
            multiline: Some(lines),
        }
    }

    /// 250 OK
    pub fn ok() -> Self {
        Self::new(ReplyCode::Ok, "OK")
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new(ReplyCode::ServiceReady, &format!("{hostname} Service ready"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new(ReplyCode::Ok, &format!("{hostname} Hello {client_domain}"))
    }

    /// EHLO reply advertising the message size limit
    #[cfg(feature = "ehlo")]
    pub fn ehlo(hostname: &str, client_domain: &str, max_size: Option<usize>) -> Self {
        let mut capabilities = vec!["PIPELINING".to_owned()];
        match max_size {
            Some(max) => capabilities.push(format!("SIZE {max}")),
            None => capabilities.push("SIZE".to_owned()),
        }
        Self::new_multiline(
            ReplyCode::Ok,
            &format!("{hostname} Hello {client_domain}"),
            capabilities,
        )
    }

    pub fn data_start() -> Self {
        Self::new(ReplyCode::StartInput, "End data with <CR><LF>.<CR><LF>")
    }

    pub fn quit(hostname: &str) -> Self {
        Self::new(
            ReplyCode::Closing,
            &format!("{hostname} Service closing transmission channel"),
        )
    }

    /// Format the reply for sending over the wire
    pub fn format(&self) -> String {
        match self.multiline {
            Some(ref lines) if !lines.is_empty() => {
                let mut result = format!("{}-{}\r\n", self.code, self.text);
                for (i, line) in lines.iter().enumerate() {
                    let sep = if i == lines.len() - 1 { ' ' } else { '-' };
                    result.push_str(&format!("{}{}{}\r\n", self.code, sep, line));
                }
                result
            }
            _ => format!("{} {}\r\n", self.code, self.text),
        }
    }

    pub fn class(&self) -> ReplyClass {
        self.code.class()
    }

    pub fn is_success(&self) -> bool {
        self.class() == ReplyClass::Success
    }

    pub fn is_transient_failure(&self) -> bool {
        self.class() == ReplyClass::TransientFailure
    }

    /// Check if this is an error reply (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        matches!(
            self.class(),
            ReplyClass::TransientFailure | ReplyClass::PermanentFailure
        )
    }
}

/// Write one reply and flush it, so the client sees it before the next read.
pub fn send_reply<W: Write>(writer: &mut W, reply: &Reply) -> io::Result<()> {
    let formatted = reply.format();
    if reply.multiline.is_none() && formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH {
        let truncated = Reply::new(reply.code, "Response too long (truncated)");
        writer.write_all(truncated.format().as_bytes())?;
    } else {
        writer.write_all(formatted.as_bytes())?;
    }
    writer.flush()
}
