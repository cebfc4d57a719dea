//! CmdOutput — the captured outcome of one finished pipeline stage.

use serde::{Deserialize, Serialize};

/// Normalized outcome of a finished process stage.
///
/// `code` is 0 on success, the process's own exit code on a recognized
/// non-zero exit, and -1 when the process terminated without a clean exit
/// code (killed by a signal). A non-zero code is data, not a stage error:
/// `wait` still returns `Ok`, and callers check [`CmdOutput::ok`]
/// explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdOutput {
    /// Normalized exit code. 0 means success.
    pub code: i64,
    /// Captured standard output bytes.
    pub stdout: Vec<u8>,
    /// Captured standard error bytes.
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub(crate) fn new(code: i64, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self { code, stdout, stderr }
    }

    /// True if the process exited successfully (code 0).
    pub fn ok(&self) -> bool {
        self.code == 0
    }

    /// Captured stdout, lossily decoded as UTF-8.
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Captured stderr, lossily decoded as UTF-8.
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_code_is_ok() {
        let output = CmdOutput::new(0, b"hello".to_vec(), Vec::new());
        assert!(output.ok());
        assert_eq!(output.stdout_string(), "hello");
    }

    #[test]
    fn non_zero_code_is_not_ok() {
        let output = CmdOutput::new(3, Vec::new(), b"oops".to_vec());
        assert!(!output.ok());
        assert_eq!(output.stderr_string(), "oops");
    }

    #[test]
    fn invalid_utf8_decodes_lossily() {
        let output = CmdOutput::new(0, vec![0xff, b'h', b'i'], Vec::new());
        assert!(output.stdout_string().ends_with("hi"));
    }
}
