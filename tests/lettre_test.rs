#![cfg(feature = "ehlo")]

use lettre::message::{Mailbox, Message};
use lettre::{SmtpTransport, Transport};
use std::error::Error;
use std::net::TcpListener;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use stowmail::{ChannelSink, ServerConfig, SmtpServer};

#[test]
fn basic_lettre_send() -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let (tx, rx) = mpsc::channel();
    let server = SmtpServer::new(
        ServerConfig::new("localhost"),
        Arc::new(ChannelSink::new(tx)),
    );

    thread::spawn(move || {
        server
            .start_with_listener(listener)
            .expect("server start failed")
    });

    let message = Message::builder()
        .from("Hanako <hanako@example.com>".parse::<Mailbox>()?)
        .to("Tarou <tarou@example.com>".parse::<Mailbox>()?)
        .subject("Greetings")
        .body("Hello there".to_owned())?;

    let mailer = SmtpTransport::builder_dangerous("127.0.0.1")
        .port(port)
        .build();

    mailer.send(&message)?;

    let email = rx.recv_timeout(Duration::from_secs(1))?;
    assert_eq!(email.from, "hanako@example.com");
    assert_eq!(email.to, "tarou@example.com");
    assert_eq!(email.get_subject().as_deref(), Some("Greetings"));
    assert!(email.contains_text("Hello there"));

    Ok(())
}
