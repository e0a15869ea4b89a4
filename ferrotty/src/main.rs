//! `ferrotty`: run or attach to a target and hand it to the operator.
//!
//! With no target on the command line a fresh terminal is allocated and its
//! name printed, so another program can be pointed at it (`gdb --tty=...`,
//! `socat`, a second shell) while this one relays its input and output.

use clap::Parser;
use ferrotty::TargetArgs;

#[tokio::main]
async fn main() -> Result<(), ferrotty::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = TargetArgs::parse();
    if args.command.is_none() && args.connect.is_none() {
        args.tty = true;
    }

    let mut session = args.target().await?;
    session.prompt(None).await?;
    session.close().await?;
    Ok(())
}
