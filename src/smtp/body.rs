//! Message body collection after DATA

use crate::smtp::error::{SmtpError, SmtpLimits};

/// What the collector wants after consuming a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Keep sending lines
    More,
    /// The terminator line was seen
    Complete,
}

/// True only for a line consisting of a single dot and its line ending.
pub fn is_terminator(line: &[u8]) -> bool {
    line == b".\r\n" || line == b".\n"
}

/// Accumulates body lines verbatim, line endings included, until the
/// terminator arrives.
///
/// Once a limit is exceeded the collector keeps consuming lines so the client
/// stays in sync, but drops their content and reports the error on `finish`.
#[derive(Debug, Default)]
pub struct BodyCollector {
    data: Vec<u8>,
    max_size: Option<usize>,
    overflow: Option<SmtpError>,
}

impl BodyCollector {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            data: Vec::new(),
            max_size,
            overflow: None,
        }
    }

    /// Consume one raw line, terminator included
    pub fn feed(&mut self, line: &[u8]) -> Feed {
        if is_terminator(line) {
            return Feed::Complete;
        }
        if self.overflow.is_some() {
            return Feed::More;
        }

        if line.len() > SmtpLimits::TEXT_LINE_MAX_LENGTH {
            self.reject_line();
            return Feed::More;
        }
        if let Some(max) = self.max_size {
            if self.data.len() + line.len() > max {
                self.fail(SmtpError::TooMuchData { max });
                return Feed::More;
            }
        }

        self.data.extend_from_slice(line);
        Feed::More
    }

    /// Record a body line that was too long to keep. Collection goes on
    /// until the terminator, which is then answered with 552.
    pub fn reject_line(&mut self) {
        if self.overflow.is_none() {
            self.fail(SmtpError::BodyLineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            });
        }
    }

    fn fail(&mut self, err: SmtpError) {
        self.data = Vec::new();
        self.overflow = Some(err);
    }

    /// Bytes accepted so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop whatever was collected and any recorded overflow
    pub fn clear(&mut self) {
        self.data.clear();
        self.overflow = None;
    }

    /// Freeze the body, leaving the collector empty for the next transaction
    pub fn finish(&mut self) -> Result<Vec<u8>, SmtpError> {
        if let Some(err) = self.overflow.take() {
            self.data.clear();
            return Err(err);
        }
        Ok(std::mem::take(&mut self.data))
    }
}
