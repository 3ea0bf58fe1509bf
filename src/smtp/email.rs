//! Email data structures and functionality

use crate::smtp::sink::Envelope;
use std::borrow::Cow;
use std::time::SystemTime;

/// A message accepted by the server, as handed out by `ChannelSink`
#[derive(Debug, Clone)]
pub struct Email {
    /// The sender's email address
    pub from: String,

    /// The recipient's email address
    pub to: String,

    /// The raw message, headers and body, with its original line endings
    pub data: Vec<u8>,

    /// When the email was received by the server
    pub timestamp: SystemTime,
}

impl Email {
    pub fn new(envelope: &Envelope, data: Vec<u8>) -> Self {
        Self {
            from: envelope.sender.clone(),
            to: envelope.recipient.clone(),
            data,
            timestamp: SystemTime::now(),
        }
    }

    /// The message as text, with invalid UTF-8 replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn is_from_sender(&self, sender: &str) -> bool {
        self.from == sender
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Get the subject line from the email headers (if present)
    pub fn get_subject(&self) -> Option<String> {
        for line in self.text().lines() {
            if line.is_empty() {
                // End of headers
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("subject") {
                    return Some(value.trim().to_owned());
                }
            }
        }
        None
    }

    /// Get the message body (content after the first empty line)
    pub fn get_body(&self) -> Option<String> {
        let text = self.text();
        let (_, body) = text
            .split_once("\r\n\r\n")
            .or_else(|| text.split_once("\n\n"))?;
        if body.is_empty() {
            None
        } else {
            Some(body.to_owned())
        }
    }

    /// Check if the email contains a specific text in headers or body
    pub fn contains_text(&self, text: &str) -> bool {
        self.text().contains(text)
    }
}
