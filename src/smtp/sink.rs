//! Durable storage of accepted messages

use crate::smtp::email::Email;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Recipient cannot be used as a mailbox name: {0}")]
    InvalidPath(String),

    #[error("Storage backend unavailable")]
    Unavailable,
}

/// Sender and recipient of one completed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipient: String,
}

impl Envelope {
    pub fn new(sender: &str, recipient: &str) -> Self {
        Self {
            sender: sender.to_owned(),
            recipient: recipient.to_owned(),
        }
    }
}

/// Where completed messages go.
///
/// `store` is called at most once per transaction, possibly from several
/// connection threads at once. It must not return `Ok` until the message is
/// durable.
pub trait MessageSink: Send + Sync {
    fn store(&self, envelope: &Envelope, body: &[u8]) -> Result<(), StoreError>;
}

/// Appends messages to one file per recipient, `<dir>/<recipient>.txt`.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileSink {
    /// Use `dir` as the mail directory, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the mailbox file for `recipient`
    pub fn mailbox_path(&self, recipient: &str) -> Result<PathBuf, StoreError> {
        let unsafe_name = recipient.is_empty()
            || recipient.starts_with('.')
            || recipient.contains(['/', '\\', '\0'])
            || recipient.contains("..");
        if unsafe_name {
            return Err(StoreError::InvalidPath(recipient.to_owned()));
        }
        Ok(self.dir.join(format!("{recipient}.txt")))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_owned()).or_default().clone()
    }

    /// Drop our handle and forget the entry once no other writer holds it
    fn release_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }
}

impl MessageSink for FileSink {
    fn store(&self, envelope: &Envelope, body: &[u8]) -> Result<(), StoreError> {
        let path = self.mailbox_path(&envelope.recipient)?;

        let mut message = Vec::with_capacity(body.len() + 64);
        write!(
            message,
            "From: {}\r\nTo: {}\r\n",
            envelope.sender, envelope.recipient
        )?;
        message.extend_from_slice(body);

        let key = envelope.recipient.to_ascii_lowercase();
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| append_message(&mut file, &message))
        };
        self.release_lock(&key, lock);
        result?;

        debug!("appended {} bytes to {}", message.len(), path.display());
        Ok(())
    }
}

/// The file operations an append needs, so partial writes can be undone
trait MailboxFile: Write {
    fn length(&self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl MailboxFile for File {
    fn length(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Append `message` whole or not at all.
///
/// On failure the file is cut back to its previous length.
fn append_message<F: MailboxFile>(file: &mut F, message: &[u8]) -> io::Result<()> {
    let start = file.length()?;
    let written = file.write_all(message).and_then(|()| file.sync());
    if let Err(e) = written {
        if let Err(undo) = file.truncate_to(start).and_then(|()| file.sync()) {
            warn!("could not remove partial message: {undo}");
        }
        return Err(e);
    }
    Ok(())
}

/// Hands each message to an in-process receiver.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::Sender<Email>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<Email>) -> Self {
        Self { sender }
    }
}

impl MessageSink for ChannelSink {
    fn store(&self, envelope: &Envelope, body: &[u8]) -> Result<(), StoreError> {
        self.sender
            .send(Email::new(envelope, body.to_vec()))
            .map_err(|_| StoreError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    /// In-memory mailbox whose writes fail once `budget` bytes are used up
    struct FlakyFile {
        data: Vec<u8>,
        budget: usize,
    }

    impl Write for FlakyFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("disk full"));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl MailboxFile for FlakyFile {
        fn length(&self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn lock_count(sink: &FileSink) -> usize {
        sink.locks.lock().unwrap().len()
    }

    #[test]
    fn test_file_sink_writes_envelope_and_body() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path()).unwrap();
        let envelope = Envelope::new("a@x.com", "b@y.com");

        sink.store(&envelope, b"hello\r\n").unwrap();

        let stored = fs::read(dir.path().join("b@y.com.txt")).unwrap();
        assert_eq!(stored, b"From: a@x.com\r\nTo: b@y.com\r\nhello\r\n");
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path()).unwrap();
        let envelope = Envelope::new("a@x.com", "b@y.com");

        sink.store(&envelope, b"one\r\n").unwrap();
        sink.store(&envelope, b"two\r\n").unwrap();

        let stored = fs::read_to_string(dir.path().join("b@y.com.txt")).unwrap();
        assert_eq!(
            stored,
            "From: a@x.com\r\nTo: b@y.com\r\none\r\nFrom: a@x.com\r\nTo: b@y.com\r\ntwo\r\n"
        );
    }

    #[test]
    fn test_file_sink_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("spool").join("in");
        let sink = FileSink::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(sink.dir(), nested.as_path());
    }

    #[test]
    fn test_file_sink_rejects_escaping_recipients() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path()).unwrap();

        for recipient in ["../etc/passwd", "a/b@x.com", ".hidden", "a\\b", ""] {
            let envelope = Envelope::new("a@x.com", recipient);
            assert!(matches!(
                sink.store(&envelope, b"x\r\n"),
                Err(StoreError::InvalidPath(_))
            ));
        }
    }

    #[test]
    fn test_file_sink_concurrent_writes_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(FileSink::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    let envelope = Envelope::new(&format!("s{i}@x.com"), "shared@y.com");
                    let body = format!("{}\r\n", i.to_string().repeat(4000));
                    sink.store(&envelope, body.as_bytes()).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = fs::read_to_string(dir.path().join("shared@y.com.txt")).unwrap();
        let lines: Vec<&str> = stored.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 8 * 3);
        for message in lines.chunks(3) {
            assert!(message[0].starts_with("From: s"));
            assert_eq!(message[1], "To: shared@y.com");
            let digit = &message[0][7..8];
            assert_eq!(message[2], digit.repeat(4000));
        }
        assert_eq!(lock_count(&sink), 0);
    }

    #[test]
    fn test_failed_append_leaves_no_fragment() {
        let mut file = FlakyFile {
            data: b"From: a@x.com\r\nTo: b@y.com\r\none\r\n".to_vec(),
            budget: 10,
        };
        let before = file.data.clone();

        let err = append_message(&mut file, b"From: c@x.com\r\nTo: b@y.com\r\ntwo\r\n");
        assert!(err.is_err());
        assert_eq!(file.data, before);

        // a retry after the disk recovers starts on a clean boundary
        file.budget = usize::MAX;
        append_message(&mut file, b"From: c@x.com\r\nTo: b@y.com\r\ntwo\r\n").unwrap();
        assert_eq!(
            file.data,
            b"From: a@x.com\r\nTo: b@y.com\r\none\r\nFrom: c@x.com\r\nTo: b@y.com\r\ntwo\r\n"
        );
    }

    #[test]
    fn test_file_sink_forgets_idle_locks() {
        let dir = TempDir::new().unwrap();
        let sink = FileSink::new(dir.path()).unwrap();

        for i in 0..50 {
            let envelope = Envelope::new("a@x.com", &format!("user{i}@y.com"));
            sink.store(&envelope, b"x\r\n").unwrap();
        }
        assert_eq!(lock_count(&sink), 0);

        // failed stores release their lock as well
        fs::create_dir(dir.path().join("dir@y.com.txt")).unwrap();
        let envelope = Envelope::new("a@x.com", "dir@y.com");
        assert!(sink.store(&envelope, b"x\r\n").is_err());
        assert_eq!(lock_count(&sink), 0);
    }

    #[test]
    fn test_channel_sink_delivers_email() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.store(&Envelope::new("a@x.com", "b@y.com"), b"hi\r\n")
            .unwrap();

        let email = rx.recv().unwrap();
        assert_eq!(email.from, "a@x.com");
        assert_eq!(email.to, "b@y.com");
        assert_eq!(email.data, b"hi\r\n");
    }

    #[test]
    fn test_channel_sink_without_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let sink = ChannelSink::new(tx);
        assert!(matches!(
            sink.store(&Envelope::new("a@x.com", "b@y.com"), b"hi\r\n"),
            Err(StoreError::Unavailable)
        ));
    }
}
