//! Binary payload example: push every byte value through a terminal
//!
//! Spawns `od` on a pseudo-terminal and sends it all 256 byte values,
//! control characters included. Without escaping, bytes like `^C`, `^D` or
//! `^U` would be eaten by the line discipline; with it, `od` sees them all.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example binary_payload
//! ```

use std::time::Duration;

use ferrotty::{Outcome, Pattern, SessionBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut target = SessionBuilder::process("od")
        .args(["-A", "d", "-t", "x1", "-v"])
        .timeout(Duration::from_secs(5))
        .exit_with_program(false)
        .build()
        .await?;

    let payload: Vec<u8> = (0..=u8::MAX).collect();
    target.send(&payload).await?;
    // End of file for od: a real ^D, sent unescaped.
    target.send_raw(b"\x04").await?;

    match target.try_expect(Pattern::regex(r"0000256\s")?).await? {
        Outcome::Matched(found) => {
            println!("{}", String::from_utf8_lossy(&found.before));
            println!("od saw all {} bytes", payload.len());
        }
        other => println!("od did not finish: {:?}", other),
    }

    let status = target.close().await?;
    println!("od: {:?}", status);
    Ok(())
}
