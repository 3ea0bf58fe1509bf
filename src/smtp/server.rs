//! SMTP server implementation

use crate::smtp::config::ServerConfig;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::reply::{Reply, ReplyCode, send_reply};
use crate::smtp::session::{Phase, Session};
use crate::smtp::sink::MessageSink;

use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

/// Accepts connections and runs one session per connection on its own thread
#[derive(Clone)]
pub struct SmtpServer {
    config: Arc<ServerConfig>,
    sink: Arc<dyn MessageSink>,
}

impl SmtpServer {
    pub fn new(config: ServerConfig, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            config: Arc::new(config),
            sink,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the server on the specified address (blocking)
    pub fn start(&self, addr: &str) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener)
    }

    /// Start the server with an existing listener (blocking)
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<(), SmtpError> {
        info!("SMTP server listening on {}", listener.local_addr()?);

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let session = self.new_session();
                    let idle_timeout = self.config.idle_timeout;
                    thread::spawn(move || {
                        let peer = stream
                            .peer_addr()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|_| "unknown".to_string());
                        info!("connection from {peer}");
                        match handle_client(stream, session, idle_timeout) {
                            Ok(()) => info!("connection from {peer} closed"),
                            Err(e) => warn!("connection from {peer} failed: {e}"),
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }

    /// A fresh session bound to this server's configuration and sink
    pub fn new_session(&self) -> Session {
        Session::new(Arc::clone(&self.config), Arc::clone(&self.sink))
    }
}

fn handle_client(
    stream: TcpStream,
    mut session: Session,
    idle_timeout: Option<std::time::Duration>,
) -> Result<(), SmtpError> {
    // the field is public, so zero can still arrive here
    stream.set_read_timeout(idle_timeout.filter(|t| !t.is_zero()))?;
    let reader = BufReader::new(stream.try_clone()?);
    let result = serve_connection(reader, &stream, &mut session);
    let _ = stream.shutdown(Shutdown::Both);
    result
}

/// One read from a `LineSource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A whole line, line ending included
    Complete(Vec<u8>),
    /// A line longer than the limit. Its bytes were discarded.
    Overlong,
}

/// Reads protocol lines off a connection, line endings preserved.
///
/// At most `max_len` bytes of a line are ever buffered.
pub struct LineSource<R> {
    inner: R,
    max_len: usize,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, SmtpLimits::TEXT_LINE_MAX_LENGTH)
    }

    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self { inner, max_len }
    }

    /// Next line, or `None` once the peer has gone away.
    ///
    /// Bytes after the last line ending are dropped; a line is only ever
    /// delivered whole.
    pub fn next_line(&mut self) -> Result<Option<Line>, SmtpError> {
        let mut line = Vec::new();
        let limit = self.max_len as u64 + 1;
        let read = (&mut self.inner).take(limit).read_until(b'\n', &mut line)?;
        let complete = line.last() == Some(&b'\n');

        if read > self.max_len {
            if !complete && !self.skip_line()? {
                return Ok(None);
            }
            return Ok(Some(Line::Overlong));
        }
        if read == 0 || !complete {
            return Ok(None);
        }
        Ok(Some(Line::Complete(line)))
    }

    /// Discard input through the next line ending. False at end of stream.
    fn skip_line(&mut self) -> Result<bool, SmtpError> {
        loop {
            let buf = match self.inner.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if buf.is_empty() {
                return Ok(false);
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.inner.consume(pos + 1);
                    return Ok(true);
                }
                None => {
                    let len = buf.len();
                    self.inner.consume(len);
                }
            }
        }
    }
}

/// Strip a trailing CRLF or bare LF
pub fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Drive `session` over a pair of byte streams until QUIT or disconnection.
///
/// Sends the greeting first. Returns an error only for transport failures;
/// protocol errors are answered and the session continues.
pub fn serve_connection<R: BufRead, W: Write>(
    reader: R,
    mut writer: W,
    session: &mut Session,
) -> Result<(), SmtpError> {
    let mut lines = LineSource::new(reader);

    if let Err(e) = send_reply(&mut writer, &session.greeting()) {
        session.disconnect();
        return Err(e.into());
    }

    while !session.is_closed() {
        let line = match lines.next_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                if session.phase() == Phase::ReceivingData {
                    warn!("client disconnected during message body");
                }
                session.disconnect();
                return Ok(());
            }
            Err(e) => {
                session.disconnect();
                if let SmtpError::Io(ref io) = e {
                    if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                        let timeout = Reply::new(ReplyCode::ServiceUnavailable, "Idle timeout");
                        let _ = send_reply(&mut writer, &timeout);
                    }
                }
                return Err(e);
            }
        };

        let reply = match line {
            Line::Overlong => {
                debug!("<- line over {} bytes dropped", SmtpLimits::TEXT_LINE_MAX_LENGTH);
                session.overlong_line()
            }
            Line::Complete(line) => dispatch_line(session, &line),
        };

        if let Some(reply) = reply {
            debug!("-> {} {}", reply.code, reply.text);
            if let Err(e) = send_reply(&mut writer, &reply) {
                session.disconnect();
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn dispatch_line(session: &mut Session, line: &[u8]) -> Option<Reply> {
    if session.phase() == Phase::ReceivingData {
        session.collect_line(line)
    } else {
        let text = String::from_utf8_lossy(line);
        let command = strip_line_ending(&text);
        debug!("<- {command}");
        session.handle_line(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::sink::{Envelope, StoreError};
    use std::io::{self, Cursor};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        stored: Mutex<Vec<(Envelope, Vec<u8>)>>,
    }

    impl MessageSink for RecordingSink {
        fn store(&self, envelope: &Envelope, body: &[u8]) -> Result<(), StoreError> {
            self.stored
                .lock()
                .unwrap()
                .push((envelope.clone(), body.to_vec()));
            Ok(())
        }
    }

    fn run(input: &[u8]) -> (String, Arc<RecordingSink>, Session) {
        let sink = Arc::new(RecordingSink::default());
        let server = SmtpServer::new(ServerConfig::new("test.local"), sink.clone());
        let mut session = server.new_session();
        let mut output = Vec::new();
        serve_connection(Cursor::new(input.to_vec()), &mut output, &mut session).unwrap();
        (String::from_utf8(output).unwrap(), sink, session)
    }

    fn codes(output: &str) -> Vec<&str> {
        output.lines().map(|l| &l[..3]).collect()
    }

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending("DATA\r\n"), "DATA");
        assert_eq!(strip_line_ending("DATA\n"), "DATA");
        assert_eq!(strip_line_ending("DATA"), "DATA");
        assert_eq!(strip_line_ending("DATA \r\n"), "DATA ");
    }

    #[test]
    fn test_line_source_keeps_terminators() {
        let mut lines = LineSource::new(Cursor::new(b"one\r\ntwo\nthr".to_vec()));
        assert_eq!(
            lines.next_line().unwrap(),
            Some(Line::Complete(b"one\r\n".to_vec()))
        );
        assert_eq!(
            lines.next_line().unwrap(),
            Some(Line::Complete(b"two\n".to_vec()))
        );
        assert_eq!(lines.next_line().unwrap(), None);
    }

    #[test]
    fn test_line_source_bounds_long_lines() {
        let mut input = vec![b'a'; 20 * 1024 * 1024];
        input.extend_from_slice(b"\r\nnext\r\n");
        let mut lines = LineSource::new(Cursor::new(input));

        assert_eq!(lines.next_line().unwrap(), Some(Line::Overlong));
        assert_eq!(
            lines.next_line().unwrap(),
            Some(Line::Complete(b"next\r\n".to_vec()))
        );
        assert_eq!(lines.next_line().unwrap(), None);
    }

    #[test]
    fn test_line_source_limit_edges() {
        let mut lines = LineSource::with_max_len(Cursor::new(b"abc\nabcd\nabcdefgh".to_vec()), 4);
        assert_eq!(
            lines.next_line().unwrap(),
            Some(Line::Complete(b"abc\n".to_vec()))
        );
        assert_eq!(lines.next_line().unwrap(), Some(Line::Overlong));
        // an overlong tail with no line ending is a disconnect
        assert_eq!(lines.next_line().unwrap(), None);
    }

    #[test]
    fn test_overlong_command_is_rejected() {
        let mut input = b"MAIL FROM:<".to_vec();
        input.extend(vec![b'a'; 4096]);
        input.extend_from_slice(b">\r\nNOOP\r\nQUIT\r\n");
        let (output, _, _) = run(&input);
        assert_eq!(codes(&output), vec!["220", "500", "250", "221"]);
    }

    #[test]
    fn test_overlong_body_line_fails_transaction() {
        let mut input = b"MAIL FROM:<a@x.com>\r\nRCPT TO:<b@y.com>\r\nDATA\r\n".to_vec();
        input.extend(vec![b'a'; 5000]);
        input.extend_from_slice(b"\r\nfine\r\n.\r\nQUIT\r\n");
        let (output, sink, _) = run(&input);
        assert_eq!(codes(&output), vec!["220", "250", "250", "354", "552", "221"]);
        assert!(sink.stored.lock().unwrap().is_empty());
    }

    #[test]
    fn test_example_scenario() {
        let (output, sink, session) = run(
            b"MAIL FROM:<a@x.com>\r\nRCPT TO:<b@y.com>\r\nDATA\r\nhello\r\n.\r\nQUIT\r\n",
        );
        assert_eq!(codes(&output), vec!["220", "250", "250", "354", "250", "221"]);
        assert_eq!(session.phase(), Phase::Closed);

        let stored = sink.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, Envelope::new("a@x.com", "b@y.com"));
        assert_eq!(stored[0].1, b"hello\r\n");
    }

    #[test]
    fn test_body_line_that_looks_like_command() {
        let (output, sink, _) = run(
            b"MAIL FROM:<a@x.com>\r\nRCPT TO:<b@y.com>\r\nDATA\r\nQUIT\r\n.x\r\n.\r\nQUIT\r\n",
        );
        assert_eq!(codes(&output), vec!["220", "250", "250", "354", "250", "221"]);
        assert_eq!(sink.stored.lock().unwrap()[0].1, b"QUIT\r\n.x\r\n");
    }

    #[test]
    fn test_disconnect_mid_body_stores_nothing() {
        let (output, sink, session) =
            run(b"MAIL FROM:<a@x.com>\r\nRCPT TO:<b@y.com>\r\nDATA\r\nhalf a message\r\n.");
        assert_eq!(codes(&output), vec!["220", "250", "250", "354"]);
        assert_eq!(session.phase(), Phase::Closed);
        assert!(sink.stored.lock().unwrap().is_empty());
    }

    #[test]
    fn test_data_before_rcpt_does_not_swallow_lines() {
        let (output, sink, _) = run(b"MAIL FROM:<a@x.com>\r\nDATA\r\nhello\r\n.\r\nQUIT\r\n");
        assert_eq!(codes(&output), vec!["220", "250", "503", "550", "550", "221"]);
        assert!(sink.stored.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_utf8_command() {
        let (output, _, _) = run(b"\xff\xfe HELO client.local\r\nQUIT\r\n");
        assert_eq!(codes(&output), vec!["220", "550", "221"]);
    }

    #[test]
    fn test_eof_without_quit() {
        let (output, _, session) = run(b"NOOP\r\n");
        assert_eq!(codes(&output), vec!["220", "250"]);
        assert!(session.is_closed());
    }

    struct TimingOut;

    impl Read for TimingOut {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::WouldBlock, "timed out"))
        }
    }

    #[test]
    fn test_idle_timeout_closes_session() {
        let sink: Arc<dyn MessageSink> = Arc::new(RecordingSink::default());
        let server = SmtpServer::new(ServerConfig::default(), sink);
        let mut session = server.new_session();
        let mut output = Vec::new();

        let result = serve_connection(BufReader::new(TimingOut), &mut output, &mut session);
        assert!(matches!(result, Err(SmtpError::Io(_))));
        assert!(session.is_closed());
        let output = String::from_utf8(output).unwrap();
        assert_eq!(codes(&output), vec!["220", "421"]);
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let sink: Arc<dyn MessageSink> = Arc::new(RecordingSink::default());
        let server = SmtpServer::new(ServerConfig::default(), sink);
        let mut session = server.new_session();

        let result = serve_connection(Cursor::new(b"NOOP\r\n".to_vec()), BrokenWriter, &mut session);
        assert!(matches!(result, Err(SmtpError::Io(_))));
        assert!(session.is_closed());
    }
}
