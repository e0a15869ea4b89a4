//! SSH example: drive a remote shell, then hand it over
//!
//! # Prerequisites
//!
//! - SSH server reachable at the given host
//! - Valid credentials (password or SSH key)
//!
//! # Usage
//!
//! ```bash
//! cargo run --example ssh_shell -- --host localhost --user your_username --password your_password
//! cargo run --example ssh_shell -- --host localhost --user your_username --key ~/.ssh/id_ed25519
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ferrotty::{Expectation, Outcome, Pattern, SessionBuilder};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(short, long, default_value_t = 22)]
    port: u16,

    #[arg(short, long, env = "USER")]
    user: String,

    #[arg(short = 'P', long)]
    password: Option<String>,

    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Seconds to wait for each prompt
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut builder = SessionBuilder::ssh(&args.host, &args.user)
        .port(args.port)
        .timeout(Duration::from_secs(args.timeout))
        .exit_with_program(false);
    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key) = &args.key {
        builder = builder.private_key(key);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }

    println!("Connecting to {}:{}...", args.host, args.port);
    let mut shell = builder.build().await?;

    let prompt = Expectation::new([Pattern::regex(r"[$#] $")?])?;
    shell.try_expect(prompt.clone()).await?;

    shell.send_line(b"uname -a").await?;
    if let Outcome::Matched(found) = shell.try_expect(prompt).await? {
        print!("{}", String::from_utf8_lossy(&found.before));
    }

    shell.prompt(Some("Shell is yours; ^] gives it back.")).await?;
    let status = shell.close().await?;
    println!("remote shell: {:?}", status);
    Ok(())
}
