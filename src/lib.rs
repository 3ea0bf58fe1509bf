//! # Stowmail
//!
//! Stowmail is a small accept-and-store SMTP server.
//!
//! Each connection gets its own thread and its own [`Session`]. A session
//! walks one mail transaction at a time through `MAIL`, `RCPT` and `DATA`,
//! collects the body up to the lone `.` line, and hands the result to a
//! [`MessageSink`].
//!
//! ## Quick Start
//!
//! ```rust
//! use stowmail::{ChannelSink, ServerConfig, SmtpServer};
//! use std::net::TcpListener;
//! use std::sync::{mpsc, Arc};
//! use std::thread;
//! use std::time::Duration;
//!
//! let (tx, rx) = mpsc::channel();
//! let server = SmtpServer::new(ServerConfig::new("test.local"), Arc::new(ChannelSink::new(tx)));
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//!
//! thread::spawn(move || {
//!     server.start_with_listener(listener).unwrap();
//! });
//!
//! // Application sends email to the listener's address
//! // ...
//!
//! if let Ok(email) = rx.recv_timeout(Duration::from_millis(100)) {
//!     println!("Received email from: {}", email.from);
//! }
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` - Identify the client (optional)
//! - `MAIL FROM` - Start a transaction
//! - `RCPT TO` - Set the recipient; a second `RCPT` replaces the first
//! - `DATA` - Send the message, ending with a line holding only `.`
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! Enabling the `ehlo` feature also allows the `EHLO` command.
//!
//! ## Storage
//!
//! [`FileSink`] appends every message to `<dir>/<recipient>.txt`, preceded by
//! `From:` and `To:` lines, and syncs the file before the client is told
//! `250`. [`ChannelSink`] sends an [`Email`] down a channel instead.
//!
//! If the sink fails the client gets `451` and may retry; nothing else
//! about the connection changes.
//!
//! ## Notes
//!
//! - One recipient per message.
//! - Bodies are stored byte for byte. Dot-stuffing is not undone.
//! - No authentication, TLS or relaying.

mod smtp;

pub use smtp::{
    BodyCollector, ChannelSink, Command, Email, Envelope, Feed, FileSink, Line, LineSource,
    MessageSink, Phase, Reply, ReplyClass, ReplyCode, ServerConfig, Session, SmtpError,
    SmtpLimits, SmtpServer, StoreError, Verb, parse_command, parse_path, send_reply,
    serve_connection,
};
