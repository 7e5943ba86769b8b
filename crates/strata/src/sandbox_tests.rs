//! Tests for the persistent sandbox against a real interpreter.
//!
//! Each test returns early when `python3` is not on PATH.

#[cfg(test)]
mod tests {
    use std::{
        path::{Path, PathBuf},
        time::Duration,
    };

    use crate::{
        config::SandboxConfig,
        sandbox::{CodeExecutor, PersistentSandbox, SandboxError},
    };

    const RUN: Duration = Duration::from_secs(20);

    fn sandbox() -> Option<PersistentSandbox> {
        if which::which("python3").is_err() {
            eprintln!("python3 not found, skipping sandbox test");
            return None;
        }
        Some(PersistentSandbox::new(SandboxConfig::local("python3")))
    }

    /// Write an executable shell script that runs `body` and then execs python3
    #[cfg(unix)]
    fn interpreter_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("python3-wrapper");
        let script = format!("#!/bin/sh\n{}\nexec python3 \"$@\"\n", body);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn sandbox_with_script(dir: &Path, body: &str) -> Option<PersistentSandbox> {
        if which::which("python3").is_err() || which::which("sh").is_err() {
            eprintln!("python3 or sh not found, skipping sandbox test");
            return None;
        }
        let script = interpreter_script(dir, body);
        Some(PersistentSandbox::new(SandboxConfig::local(
            script.to_string_lossy().into_owned(),
        )))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let Some(sandbox) = sandbox() else { return };
        assert!(sandbox.is_available().await);

        let output = sandbox.execute("print(2 + 2)", RUN).await.unwrap();
        assert_eq!(output.stdout, "4\n");
        assert!(output.is_success());
        assert!(!output.degraded);

        sandbox.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_persists_between_runs() {
        let Some(sandbox) = sandbox() else { return };

        sandbox.execute("counter = 41", RUN).await.unwrap();
        let output = sandbox.execute("counter += 1\nprint(counter)", RUN).await.unwrap();
        assert_eq!(output.stdout.trim(), "42");

        sandbox.shutdown().await;
    }

    #[tokio::test]
    async fn test_exception_is_reported_and_process_survives() {
        let Some(sandbox) = sandbox() else { return };

        sandbox.execute("kept = 'yes'", RUN).await.unwrap();
        let failed = sandbox
            .execute("raise ValueError('bad input')", RUN)
            .await
            .unwrap();
        assert!(failed.error.as_deref().unwrap_or_default().contains("ValueError"));

        let output = sandbox.execute("print(kept)", RUN).await.unwrap();
        assert_eq!(output.stdout.trim(), "yes");

        sandbox.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_kills_and_next_run_starts_fresh() {
        let Some(sandbox) = sandbox() else { return };

        sandbox.execute("lost = 1", RUN).await.unwrap();
        let started = std::time::Instant::now();
        let err = sandbox
            .execute("import time\ntime.sleep(30)", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));

        let output = sandbox
            .execute("print('lost' in globals())", RUN)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "False");

        sandbox.shutdown().await;
    }

    #[tokio::test]
    async fn test_recovers_after_dying_while_idle() {
        let Some(sandbox) = sandbox() else { return };

        sandbox
            .execute(
                "import os, threading\nthreading.Timer(0.2, lambda: os._exit(3)).start()",
                RUN,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        let output = sandbox.execute("print('back')", RUN).await.unwrap();
        assert_eq!(output.stdout.trim(), "back");
        assert!(!output.degraded);

        sandbox.shutdown().await;
    }

    #[tokio::test]
    async fn test_code_that_kills_the_interpreter_fails_cleanly() {
        let Some(sandbox) = sandbox() else { return };

        let err = sandbox
            .execute("import os\nos._exit(1)", RUN)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Crashed(_)));

        let output = sandbox.execute("print('still here')", RUN).await.unwrap();
        assert_eq!(output.stdout.trim(), "still here");

        sandbox.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_startup_counts_against_the_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let Some(sandbox) = sandbox_with_script(temp.path(), "sleep 6") else {
            return;
        };

        let timeout = Duration::from_secs(1);
        let started = std::time::Instant::now();
        let err = sandbox
            .execute("import time\ntime.sleep(30)", timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(t) if t == timeout));
        assert!(started.elapsed() < timeout + Duration::from_secs(1));

        sandbox.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_restart_falls_back_to_one_off_process() {
        let temp = tempfile::tempdir().unwrap();
        let counter = temp.path().join("spawns");
        // The second start exits at once; every other start is a real interpreter
        let body = format!(
            "n=$(( $(cat '{0}' 2>/dev/null || echo 0) + 1 ))\necho \"$n\" > '{0}'\n[ \"$n\" -eq 2 ] && exit 1",
            counter.display()
        );
        let Some(sandbox) = sandbox_with_script(temp.path(), &body) else {
            return;
        };

        sandbox
            .execute(
                "import os, threading\nthreading.Timer(0.2, lambda: os._exit(3)).start()",
                RUN,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        let output = sandbox.execute("print('fallback')", RUN).await.unwrap();
        assert_eq!(output.stdout.trim(), "fallback");
        assert!(output.degraded);
        assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");

        sandbox.shutdown().await;
    }
}
