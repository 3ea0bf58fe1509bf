//! SMTP server implementation

pub mod body;
pub mod config;
pub mod email;
pub mod error;
pub mod parser;
pub mod reply;
pub mod server;
pub mod session;
pub mod sink;

pub use body::{BodyCollector, Feed};
pub use config::ServerConfig;
pub use email::Email;
pub use error::{SmtpError, SmtpLimits};
pub use parser::{Command, Verb, parse_command, parse_path};
pub use reply::{Reply, ReplyClass, ReplyCode, send_reply};
pub use server::{Line, LineSource, SmtpServer, serve_connection};
pub use session::{Phase, Session};
pub use sink::{ChannelSink, Envelope, FileSink, MessageSink, StoreError};
