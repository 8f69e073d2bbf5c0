//! Keep secrets out of swap.

use std::io;

/// How the attempt to lock process memory ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemlockOutcome {
    /// All current and future pages are locked.
    Locked,
    /// The platform has no `mlockall` (`ENOSYS`).
    Unsupported,
    /// The lock limit is too low to lock everything (`ENOMEM`).
    LimitTooLow,
}

/// Lock all current and future pages of the process into memory.
///
/// Missing support and a low lock limit are reported as outcomes so the
/// caller can carry on; any other failure is an error.
pub fn lock_memory() -> io::Result<MemlockOutcome> {
    // SAFETY: mlockall takes only flags and touches no caller memory.
    let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if rc == 0 {
        return Ok(MemlockOutcome::Locked);
    }
    classify(io::Error::last_os_error())
}

fn classify(err: io::Error) -> io::Result<MemlockOutcome> {
    match err.raw_os_error() {
        Some(libc::ENOSYS) => Ok(MemlockOutcome::Unsupported),
        Some(libc::ENOMEM) => Ok(MemlockOutcome::LimitTooLow),
        _ => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let outcome = |errno| classify(io::Error::from_raw_os_error(errno));
        assert_eq!(outcome(libc::ENOSYS).unwrap(), MemlockOutcome::Unsupported);
        assert_eq!(outcome(libc::ENOMEM).unwrap(), MemlockOutcome::LimitTooLow);
        assert!(outcome(libc::EPERM).is_err());
    }
}
