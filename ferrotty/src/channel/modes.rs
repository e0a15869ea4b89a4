//! Save/restore stack of terminal modes on the target's terminal.

use std::os::fd::BorrowedFd;

use log::trace;
use nix::sys::termios::{LocalFlags, OutputFlags, SetArg, Termios, tcgetattr, tcsetattr};

use crate::error::ChannelError;

/// Stack of terminal modes replaced by [`change`](ModeStack::change).
///
/// Every change pushes exactly one entry, so changes and restores pair up
/// even when a change turned out to be a no-op.
#[derive(Debug, Default)]
pub struct ModeStack {
    saved: Vec<Option<Termios>>,
}

fn same_mode(a: &Termios, b: &Termios) -> bool {
    a.input_flags == b.input_flags
        && a.output_flags == b.output_flags
        && a.control_flags == b.control_flags
        && a.local_flags == b.local_flags
        && a.control_chars == b.control_chars
}

impl ModeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change that did not touch any terminal.
    pub(crate) fn push_noop(&mut self) {
        self.saved.push(None);
    }

    /// Drop the most recent entry without applying it.
    pub(crate) fn discard(&mut self) -> Result<(), ChannelError> {
        self.saved.pop().map(|_| ()).ok_or(ChannelError::NoSavedMode)
    }

    /// Apply `edit` to the terminal mode, saving the previous mode.
    pub fn change(
        &mut self,
        fd: BorrowedFd<'_>,
        edit: impl FnOnce(&mut Termios),
    ) -> Result<(), ChannelError> {
        let current = tcgetattr(fd).map_err(ChannelError::Termios)?;
        let mut wanted = current.clone();
        edit(&mut wanted);

        if same_mode(&current, &wanted) {
            trace!("terminal mode unchanged");
            self.saved.push(None);
            return Ok(());
        }

        tcsetattr(fd, SetArg::TCSADRAIN, &wanted).map_err(ChannelError::Termios)?;
        self.saved.push(Some(current));
        Ok(())
    }

    /// Undo the most recent change.
    pub fn restore(&mut self, fd: BorrowedFd<'_>) -> Result<(), ChannelError> {
        match self.saved.pop() {
            None => Err(ChannelError::NoSavedMode),
            Some(None) => Ok(()),
            Some(Some(previous)) => {
                tcsetattr(fd, SetArg::TCSADRAIN, &previous).map_err(ChannelError::Termios)
            }
        }
    }

    /// Have the terminal translate `\n` to `\r\n` on output.
    pub fn set_nlcr(&mut self, fd: BorrowedFd<'_>) -> Result<(), ChannelError> {
        self.change(fd, |mode| mode.output_flags.insert(OutputFlags::ONLCR))
    }

    /// Leave `\n` untranslated on output.
    pub fn set_nonlcr(&mut self, fd: BorrowedFd<'_>) -> Result<(), ChannelError> {
        self.change(fd, |mode| mode.output_flags.remove(OutputFlags::ONLCR))
    }

    pub fn set_echo(&mut self, fd: BorrowedFd<'_>, on: bool) -> Result<(), ChannelError> {
        self.change(fd, |mode| mode.local_flags.set(LocalFlags::ECHO, on))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PtyPair;
    use std::os::fd::AsFd;

    fn onlcr(fd: BorrowedFd<'_>) -> bool {
        tcgetattr(fd).unwrap().output_flags.contains(OutputFlags::ONLCR)
    }

    #[tokio::test]
    async fn test_change_and_restore() {
        let pair = PtyPair::open().unwrap();
        let fd = pair.slave.as_fd();
        let mut modes = ModeStack::new();

        let before = onlcr(fd);
        modes.set_nonlcr(fd).unwrap();
        assert!(!onlcr(fd));
        modes.set_nlcr(fd).unwrap();
        assert!(onlcr(fd));

        modes.restore(fd).unwrap();
        assert!(!onlcr(fd));
        modes.restore(fd).unwrap();
        assert_eq!(onlcr(fd), before);
        assert!(matches!(modes.restore(fd), Err(ChannelError::NoSavedMode)));
    }

    #[tokio::test]
    async fn test_noop_change_still_pairs() {
        let pair = PtyPair::open().unwrap();
        let fd = pair.slave.as_fd();
        let mut modes = ModeStack::new();

        modes.set_echo(fd, false).unwrap();
        modes.set_echo(fd, false).unwrap();

        modes.restore(fd).unwrap();
        assert!(!tcgetattr(fd).unwrap().local_flags.contains(LocalFlags::ECHO));
        modes.restore(fd).unwrap();
        assert!(matches!(modes.restore(fd), Err(ChannelError::NoSavedMode)));
    }

    #[test]
    fn test_restore_without_change() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _enter = rt.enter();
        let pair = PtyPair::open().unwrap();

        let err = ModeStack::new().restore(pair.slave.as_fd()).unwrap_err();
        assert!(matches!(err, ChannelError::NoSavedMode));
    }
}
