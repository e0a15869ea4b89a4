//! Launching terminal emulators and leaving notes for debugger scripts.

use std::ffi::OsStr;
use std::path::Path;

use log::info;
use tokio::process::{Child, Command};

use crate::error::{Result, SessionError, TransportError};

/// Terminal used when `TERMINAL` is not set.
pub const DEFAULT_TERMINAL: &str = "x-terminal-emulator";

/// Build the argv for running `cmdline` inside `terminal`.
///
/// `terminal` is a command line of its own. A bare program name gets `-e`
/// appended; one that already carries options is used as given.
pub fn terminal_command<S: AsRef<OsStr>>(terminal: &str, cmdline: &[S]) -> Result<Command> {
    let words = shlex::split(terminal).ok_or_else(|| SessionError::InvalidConfig {
        message: format!("unbalanced quoting in terminal `{terminal}`"),
    })?;
    let Some((program, options)) = words.split_first() else {
        return Err(SessionError::InvalidConfig {
            message: "terminal command is empty".to_string(),
        }
        .into());
    };

    let mut cmd = Command::new(program);
    if options.is_empty() {
        cmd.arg("-e");
    } else {
        cmd.args(options);
    }
    cmd.args(cmdline);
    Ok(cmd)
}

/// Start `cmdline` in a new terminal window and return without waiting.
pub fn spawn_terminal<S: AsRef<OsStr>>(terminal: &str, cmdline: &[S]) -> Result<Child> {
    let mut cmd = terminal_command(terminal, cmdline)?;
    let child = cmd.spawn().map_err(|source| TransportError::Spawn {
        program: terminal.to_string(),
        source,
    })?;
    info!("started terminal {} (pid {:?})", terminal, child.id());
    Ok(child)
}

/// Write `ttyname\0arg1\0arg2...` to `path` for a debugger script to pick up.
pub fn writeback<S: AsRef<str>>(path: &Path, ttyname: &Path, args: &[S]) -> Result<()> {
    let mut note = ttyname.to_string_lossy().into_owned();
    note.push('\0');
    note.push_str(
        &args
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join("\0"),
    );
    std::fs::write(path, note).map_err(TransportError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(cmd: &Command) -> Vec<String> {
        let std = cmd.as_std();
        std::iter::once(std.get_program())
            .chain(std.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_bare_terminal_gets_dash_e() {
        let cmd = terminal_command("xterm", &["gdb", "-q", "./vuln"]).unwrap();
        assert_eq!(argv(&cmd), ["xterm", "-e", "gdb", "-q", "./vuln"]);
    }

    #[test]
    fn test_terminal_with_options_used_as_given() {
        let cmd = terminal_command("tmux split-window", &["gdb"]).unwrap();
        assert_eq!(argv(&cmd), ["tmux", "split-window", "gdb"]);
    }

    #[test]
    fn test_terminal_options_quoted() {
        let cmd = terminal_command("tmux new-window -n 'gdb pane'", &["gdb"]).unwrap();
        assert_eq!(argv(&cmd), ["tmux", "new-window", "-n", "gdb pane", "gdb"]);
    }

    #[test]
    fn test_empty_terminal_rejected() {
        let err = terminal_command::<&str>("  ", &[]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Session(SessionError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_writeback_format() {
        let path = std::env::temp_dir().join(format!("ferrotty-wb-{}", std::process::id()));
        writeback(&path, Path::new("/dev/pts/9"), &["AAAA", "-v"]).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"/dev/pts/9\0AAAA\0-v");
        std::fs::remove_file(&path).unwrap();
    }
}
