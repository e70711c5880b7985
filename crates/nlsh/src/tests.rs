//! Executor tests against a real POSIX shell.

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod shell_tests {
    use std::time::Duration;

    use crate::executor::{ExecutionError, OutputSink, ShellDescriptor, ShellExecutor, SilentSink};

    #[derive(Default)]
    struct Capture {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    }

    impl OutputSink for Capture {
        fn stdout(&mut self, chunk: &[u8]) {
            self.stdout.extend_from_slice(chunk);
        }

        fn stderr(&mut self, chunk: &[u8]) {
            self.stderr.extend_from_slice(chunk);
        }
    }

    fn executor(dir: &std::path::Path) -> ShellExecutor {
        ShellExecutor::new(ShellDescriptor::fallback(), dir)
    }

    #[tokio::test]
    async fn test_buffered_and_streamed_results_match() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let script = "for i in 1 2 3; do echo line $i; done; echo warn >&2; printf tail; exit 4";

        let buffered = exec
            .run_with(script, &mut SilentSink, std::future::pending())
            .await
            .unwrap();
        let mut capture = Capture::default();
        let streamed = exec
            .run_with(script, &mut capture, std::future::pending())
            .await
            .unwrap();

        assert_eq!(buffered.stdout, "line 1\nline 2\nline 3\ntail");
        assert_eq!(buffered.stderr, "warn\n");
        assert_eq!(buffered.exit_code, 4);
        assert_eq!(streamed.stdout, buffered.stdout);
        assert_eq!(streamed.stderr, buffered.stderr);
        assert_eq!(streamed.exit_code, buffered.exit_code);
        assert_eq!(capture.stdout, streamed.stdout.as_bytes());
        assert_eq!(capture.stderr, streamed.stderr.as_bytes());
    }

    #[tokio::test]
    async fn test_echo_success() {
        let dir = tempfile::tempdir().unwrap();
        let result = executor(dir.path()).run("echo test").await.unwrap();
        assert_eq!(result.stdout, "test\n");
        assert!(result.stderr.is_empty());
        assert!(result.success());
        assert!(!result.interrupted);
        assert_eq!(result.command, "echo test");
        assert_eq!(result.working_directory, dir.path());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = executor(dir.path()).run("ls /definitely/not/here").await.unwrap();
        assert_ne!(result.exit_code, 0);
        assert!(!result.stderr.is_empty());
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_signal_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let result = executor(dir.path()).run("kill -TERM $$").await.unwrap();
        assert_eq!(result.exit_code, 128 + 15);
        assert!(!result.interrupted);
    }

    #[tokio::test]
    async fn test_cd_changes_later_commands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let exec = executor(dir.path());

        let cd = exec.run("cd sub").await.unwrap();
        assert_eq!(cd.exit_code, 0);
        assert_eq!(cd.working_directory, dir.path());

        let expected = dir.path().join("sub").canonicalize().unwrap();
        assert_eq!(exec.working_directory(), expected);

        let pwd = exec.run("pwd").await.unwrap();
        assert_eq!(pwd.stdout.trim_end(), expected.to_string_lossy());
        assert_eq!(pwd.working_directory, expected);
    }

    #[tokio::test]
    async fn test_cd_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let mut capture = Capture::default();
        let result = exec
            .run_with("cd missing", &mut capture, std::future::pending())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "cd: no such file or directory: missing\n");
        assert_eq!(capture.stderr, result.stderr.as_bytes());
        assert_eq!(exec.working_directory(), dir.path());
    }

    #[tokio::test]
    async fn test_interrupt_returns_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let interrupt = tokio::time::sleep(Duration::from_millis(300));
        let result = executor(dir.path())
            .run_with("echo begun; sleep 30", &mut SilentSink, interrupt)
            .await
            .unwrap();
        assert!(result.interrupted);
        assert!(!result.success());
        assert_eq!(result.stdout, "begun\n");
        assert!(result.duration_ms < 30_000);
    }

    #[tokio::test]
    async fn test_missing_shell_is_an_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ShellExecutor::new(
            ShellDescriptor::from_path("/nonexistent/bin/nosuchshell"),
            dir.path(),
        );
        let err = exec.run("echo hi").await.unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
    }
}
