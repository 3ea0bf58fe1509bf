use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stowmail::{FileSink, ServerConfig, SmtpServer};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "stowmail", about = "Accept mail over SMTP and store it on disk")]
struct Opt {
    /// Address to listen on
    #[structopt(short = "a", long = "address", default_value = "127.0.0.1:2525")]
    address: String,

    /// Hostname announced to clients
    #[structopt(long = "hostname", default_value = "stowmail.local")]
    hostname: String,

    /// Directory that receives one <recipient>.txt file per recipient
    #[structopt(long = "mail-dir", parse(from_os_str), default_value = "mail")]
    mail_dir: PathBuf,

    /// Largest accepted message body in bytes (0 for no limit)
    #[structopt(long = "max-message-size", default_value = "10485760")]
    max_message_size: usize,

    /// Drop connections idle for this many seconds (0 disables)
    #[structopt(long = "idle-timeout")]
    idle_timeout: Option<u64>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::from_args();

    let sink = match FileSink::new(&opt.mail_dir) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Cannot use mail directory {:?}: {e}", opt.mail_dir);
            std::process::exit(1);
        }
    };
    info!("Storing mail in {:?}", sink.dir());

    let max_message_size = Some(opt.max_message_size).filter(|&max| max > 0);
    let config = ServerConfig::new(&opt.hostname)
        .with_max_message_size(max_message_size)
        .with_idle_timeout(
            opt.idle_timeout
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs),
        );

    let server = SmtpServer::new(config, Arc::new(sink));
    if let Err(e) = server.start(&opt.address) {
        error!("Failed to start server: {e}");
        std::process::exit(1);
    }
}
