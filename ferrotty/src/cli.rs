//! Command-line configuration of a target.
//!
//! [`TargetArgs`] can be used on its own or flattened into a script's own
//! parser with `#[command(flatten)]`, so exploit scripts get the standard
//! switches (`--tty`, `--gdb`, `--timeout`, ...) for free.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionBuilder};
use crate::terminal::{DEFAULT_TERMINAL, spawn_terminal, writeback};
use crate::transport::AnyTransport;

/// Target selection and session options.
#[derive(Parser, Debug, Clone)]
#[command(name = "ferrotty")]
#[command(about = "Drive a program, socket or terminal with binary-safe expect automation")]
#[command(version)]
pub struct TargetArgs {
    /// Allocate a new terminal for another program to attach to, instead of
    /// spawning the target
    #[arg(short, long, conflicts_with = "gdb")]
    pub tty: bool,

    /// Like --tty, and start gdb on the target in a new terminal window
    #[arg(short, long)]
    pub gdb: bool,

    /// Don't announce the allocated terminal's name
    #[arg(short, long)]
    pub quiet: bool,

    /// Seconds to wait for an expected pattern (0 waits forever)
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub timeout: u64,

    /// Keep the target terminal's \n to \r\n output translation
    #[arg(long)]
    pub nlcr: bool,

    /// Seconds to wait before each send
    #[arg(long, value_name = "SECS", value_parser = parse_seconds, default_value = "0")]
    pub delay_before_send: Duration,

    /// Only search the last N received bytes for patterns
    #[arg(long, value_name = "N")]
    pub search_window_size: Option<usize>,

    /// Copy all traffic to this file
    #[arg(short, long, value_name = "FILE")]
    pub logfile: Option<PathBuf>,

    /// Working directory for the target
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Environment for the target; replaces ours when given at all
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Let the target receive SIGHUP when its terminal closes
    #[arg(long)]
    pub keep_sighup: bool,

    /// Terminal emulator for --gdb; `-e` is appended unless it has options
    #[arg(long, env = "TERMINAL", default_value = DEFAULT_TERMINAL)]
    pub terminal: String,

    /// With --tty or --gdb, write the terminal's name and the target's
    /// arguments to this file
    #[arg(long, value_name = "FILE")]
    pub writeback: Option<PathBuf>,

    /// Talk to a network peer instead of spawning the target
    #[arg(long, value_name = "HOST:PORT", value_parser = parse_peer, conflicts_with_all = ["tty", "gdb"])]
    pub connect: Option<(String, u16)>,

    /// Target program, or a whole command line when no arguments follow
    pub command: Option<String>,

    /// Arguments for the target
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn parse_seconds(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty variable name in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_peer(s: &str) -> std::result::Result<(String, u16), String> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got `{s}`"))?;
    let port = port.parse().map_err(|e| format!("bad port `{port}`: {e}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("empty host in `{s}`"));
    }
    Ok((host.to_string(), port))
}

impl TargetArgs {
    /// Fill in what the command line left out of the target. The command
    /// and its arguments are defaulted independently.
    pub fn apply_defaults<I, S>(&mut self, command: &str, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.command.is_none() {
            self.command = Some(command.to_string());
        }
        if self.args.is_empty() {
            self.args = args.into_iter().map(Into::into).collect();
        }
    }

    /// The target's argv: the shell words of `command` followed by `args`.
    pub fn argv(&self) -> Result<Vec<String>> {
        let mut argv = match &self.command {
            Some(command) => shlex::split(command).ok_or_else(|| SessionError::InvalidConfig {
                message: format!("unbalanced quoting in `{command}`"),
            })?,
            None => Vec::new(),
        };
        argv.extend(self.args.iter().cloned());
        Ok(argv)
    }

    /// Expectation timeout, `None` when disabled.
    pub fn expect_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    /// A builder for the selected target with every option applied.
    pub fn builder(&self) -> Result<SessionBuilder> {
        let builder = if self.tty || self.gdb {
            SessionBuilder::tty().verbose(!self.quiet)
        } else if let Some((host, port)) = &self.connect {
            SessionBuilder::tcp(host.clone(), *port)
        } else {
            let argv = self.argv()?;
            let Some((program, args)) = argv.split_first() else {
                return Err(SessionError::InvalidConfig {
                    message: "no target command given".to_string(),
                }
                .into());
            };
            let mut builder = SessionBuilder::process(program)
                .args(args)
                .ignore_sighup(!self.keep_sighup);
            if let Some(cwd) = &self.cwd {
                builder = builder.cwd(cwd);
            }
            if !self.env.is_empty() {
                builder = builder.env(self.env.iter().cloned());
            }
            builder
        };

        let mut builder = builder
            .timeout(self.expect_timeout())
            .search_window(self.search_window_size)
            .nlcr(self.nlcr)
            .delay_before_send(self.delay_before_send);
        if let Some(path) = &self.logfile {
            builder = builder.logfile(path);
        }
        Ok(builder)
    }

    /// Build the session, and with a terminal target run the debugger and
    /// write-back steps.
    pub async fn target(&self) -> Result<Session<AnyTransport>> {
        let session = self.builder()?.build().await?;
        if let Some(ttyname) = session.transport().ttyname() {
            self.attach(ttyname)?;
        }
        Ok(session)
    }

    fn attach(&self, ttyname: &std::path::Path) -> Result<()> {
        let argv = self.argv()?;
        if let Some(path) = &self.writeback {
            let args = argv.get(1..).unwrap_or_default();
            writeback(path, ttyname, args)?;
            info!("wrote {} for the debugger", path.display());
        }
        if self.gdb {
            let binary = argv.first().ok_or_else(|| SessionError::InvalidConfig {
                message: "--gdb needs a target command".to_string(),
            })?;
            let tty = ttyname.to_string_lossy();
            spawn_terminal(
                &self.terminal,
                &["gdb", "-q", binary.as_str(), "--tty", tty.as_ref()],
            )?;
        }
        Ok(())
    }
}
