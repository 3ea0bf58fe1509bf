//! Command line and path parsing

use crate::smtp::error::{SmtpError, SmtpLimits};
use std::fmt;

/// Command verbs, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Helo,
    #[cfg(feature = "ehlo")]
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Noop,
    Quit,
    /// Anything else, upper-cased
    Unknown(String),
}

impl Verb {
    fn from_word(word: &str) -> Self {
        let upper = word.to_ascii_uppercase();
        match upper.as_str() {
            "HELO" => Verb::Helo,
            #[cfg(feature = "ehlo")]
            "EHLO" => Verb::Ehlo,
            "MAIL" => Verb::Mail,
            "RCPT" => Verb::Rcpt,
            "DATA" => Verb::Data,
            "RSET" => Verb::Rset,
            "NOOP" => Verb::Noop,
            "QUIT" => Verb::Quit,
            _ => Verb::Unknown(upper),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Helo => "HELO",
            #[cfg(feature = "ehlo")]
            Verb::Ehlo => "EHLO",
            Verb::Mail => "MAIL",
            Verb::Rcpt => "RCPT",
            Verb::Data => "DATA",
            Verb::Rset => "RSET",
            Verb::Noop => "NOOP",
            Verb::Quit => "QUIT",
            Verb::Unknown(word) => word,
        };
        f.write_str(name)
    }
}

/// One parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    /// Everything after the first space, untouched. Empty when there is none.
    pub remainder: String,
}

/// Split a command line (terminator already stripped) into verb and remainder.
///
/// Never fails: deciding whether a verb is known or needs an argument is left
/// to the session.
pub fn parse_command(line: &str) -> Command {
    let (word, remainder) = line.split_once(' ').unwrap_or((line, ""));
    Command {
        verb: Verb::from_word(word),
        remainder: remainder.to_owned(),
    }
}

/// Extract the address from a `FROM:<addr>` / `TO:<addr>` argument.
///
/// `keyword` is matched case-insensitively. Surrounding angle brackets are
/// stripped and anything after the closing bracket (ESMTP parameters) is
/// ignored.
pub fn parse_path(remainder: &str, keyword: &str) -> Result<String, SmtpError> {
    let (key, rest) = remainder
        .trim_start()
        .split_once(':')
        .ok_or_else(|| SmtpError::InvalidSyntax(format!("expected {keyword}:<address>")))?;

    if !key.trim_end().eq_ignore_ascii_case(keyword) {
        return Err(SmtpError::InvalidSyntax(format!(
            "expected {keyword}:<address>"
        )));
    }

    let rest = rest.trim();
    let path = match rest.strip_prefix('<') {
        Some(inner) => {
            let end = inner.find('>').ok_or_else(|| {
                SmtpError::InvalidSyntax("unterminated angle bracket".to_string())
            })?;
            &inner[..end]
        }
        None => rest.split_whitespace().next().unwrap_or(""),
    };
    let path = path.trim();

    if path.is_empty() {
        return Err(SmtpError::InvalidSyntax("address cannot be empty".to_string()));
    }
    if path.contains(['<', '>']) {
        return Err(SmtpError::InvalidSyntax("malformed address".to_string()));
    }
    if path.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    validate_address(path)?;
    Ok(path.to_owned())
}

/// Size checks on the local part and domain when the address has both.
fn validate_address(addr: &str) -> Result<(), SmtpError> {
    if let Some((user, domain)) = addr.rsplit_once('@') {
        if user.len() > SmtpLimits::USER_MAX_LENGTH {
            return Err(SmtpError::UserTooLong {
                max: SmtpLimits::USER_MAX_LENGTH,
            });
        }
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }
        if user.is_empty() || domain.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "invalid email address format".to_string(),
            ));
        }
    }
    Ok(())
}
