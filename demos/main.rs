// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1

use anyhow::Context as _;
use clap::Parser as _;
use std::{process, str, time};
use zeroize::Zeroize as _;

fn parse_duration(argument: &str) -> Result<time::Duration, std::num::ParseIntError> {
  Ok(time::Duration::from_secs(argument.parse()?))
}

#[derive(clap::Parser)]
struct Arguments {
  #[arg(long = "address", help = "Server address")]
  address: String,
  #[arg(long = "port", help = "Server port", default_value_t = 993)]
  port: u16,
  #[arg(long = "tls", help = "Use TLS", default_value_t = true)]
  tls: bool,
  #[arg(long = "timeout", help = "Connect/read timeout (in seconds)", value_parser = parse_duration)]
  timeout: Option<time::Duration>,

  #[arg(long = "user", help = "IMAP user")]
  user: String,
  #[arg(last = true, required = true, help = "Command that prints the password on stdout")]
  password_command: Vec<String>,

  #[arg(long = "mailbox", help = "Mailbox to EXAMINE", default_value_t = String::from("INBOX"))]
  mailbox: String,

  #[clap(flatten)]
  verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

fn credentials(user: &str, password_command: &[String]) -> anyhow::Result<(String, String)> {
  let mut program = process::Command::new(&password_command[0]);
  let command = program.args(&password_command[1..]);
  log::info!("getting password from {command:?}");
  let output = command.output()?;
  let mut stdout = output.stdout;
  anyhow::ensure!(
    output.status.success(),
    "couldn't get password: {command:?} failed"
  );
  let password = str::from_utf8(
    stdout
      .split(|byte| *byte == b'\n')
      .next()
      .with_context(|| format!("{command:?} didn't output anything"))?,
  )
  .with_context(|| format!("{command:?} didn't output UTF-8"))?
  .to_string();
  stdout.zeroize();
  Ok((user.to_string(), password))
}

fn init_logging(verbose: &clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>) -> anyhow::Result<()> {
  let encoder = Box::new(log4rs::encode::pattern::PatternEncoder::new(
    "{d(%F %T)} {l} {t} - {m}{n}",
  ));
  log4rs::init_config(
    log4rs::config::Config::builder()
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            log::LevelFilter::Trace,
          )))
          .build(
            "file",
            Box::new(
              log4rs::append::file::FileAppender::builder()
                .encoder(encoder.clone())
                .build("improto-demo.log")?,
            ),
          ),
      )
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            verbose.log_level_filter(),
          )))
          .build(
            "console",
            Box::new(
              log4rs::append::console::ConsoleAppender::builder()
                .encoder(encoder)
                .build(),
            ),
          ),
      )
      .build(
        log4rs::config::Root::builder()
          .appenders(["console", "file"])
          .build(log::LevelFilter::Trace),
      )?,
  )?;
  Ok(())
}

fn main() -> anyhow::Result<()> {
  let arguments = Arguments::parse();
  init_logging(&arguments.verbose)?;

  let (user, password) = credentials(&arguments.user, &arguments.password_command)?;

  let options = improto::ConnectOptions {
    address: arguments.address.clone(),
    port: arguments.port,
    tls: arguments.tls,
    timeout: arguments.timeout,
  };
  let (session, greeting) = improto::Session::connect(&options)?;
  log::info!("greeting: {greeting}");

  let completion = session.auth(&user, &password)?;
  anyhow::ensure!(
    completion.status == improto::Status::Ok,
    "login failed: {completion:?}"
  );

  let capability = session.send_sync("CAPABILITY")?;
  log::info!("capabilities: {:?}", capability.extras);

  let examined = session.examine(&arguments.mailbox)?;
  log::info!(
    "{}: {} messages, {} recent, flags {:?}",
    arguments.mailbox,
    examined.exists.unwrap_or(0),
    examined.recent.unwrap_or(0),
    examined.flags
  );

  Ok(())
}
