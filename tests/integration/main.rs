//! Integration tests for runcached

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use runcached::cache::CacheKey;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Isolated cache directory plus a counter file the wrapped commands bump
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn cache_dir(&self) -> PathBuf {
            self.dir.path().join("cache")
        }

        fn counter(&self) -> PathBuf {
            self.dir.path().join("runs")
        }

        fn runs(&self) -> usize {
            fs::read_to_string(self.counter())
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }

        /// `sh -c` script that records each execution before running `body`
        fn counted(&self, body: &str) -> Vec<String> {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo run >> '{}'; {}", self.counter().display(), body),
            ]
        }

        fn runcached(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("runcached");
            cmd.env("RUNCACHED_CACHE_DIR", self.cache_dir())
                .env("RUNCACHED_CONFIG", self.dir.path().join("no-config.toml"));
            cmd
        }

        fn std_command(&self) -> std::process::Command {
            let mut cmd = std::process::Command::new(env!("CARGO_BIN_EXE_runcached"));
            cmd.env("RUNCACHED_CACHE_DIR", self.cache_dir())
                .env("RUNCACHED_CONFIG", self.dir.path().join("no-config.toml"));
            cmd
        }

        fn artifact(&self, command: &[String], ext: &str) -> PathBuf {
            let key = CacheKey::derive(command);
            self.cache_dir().join(format!("{}.{}", key, ext))
        }
    }

    fn wait_for(path: &Path, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if path.exists() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("runcached")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("cache-timeout"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("runcached")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("runcached"));
    }

    #[test]
    fn missing_command_is_usage_error() {
        cargo_bin_cmd!("runcached").assert().failure();
    }

    #[test]
    fn second_call_replays_without_running() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo hello");

        for _ in 0..2 {
            sandbox
                .runcached()
                .args(&command)
                .assert()
                .success()
                .stdout("hello\n");
        }

        assert_eq!(sandbox.runs(), 1);
        assert!(sandbox.artifact(&command, "cmd").exists());
        assert!(!sandbox.artifact(&command, "pid").exists());
    }

    #[test]
    fn expired_record_runs_again() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo hello");

        sandbox
            .runcached()
            .args(["-c", "0.5"])
            .args(&command)
            .assert()
            .success();
        thread::sleep(Duration::from_millis(1200));
        sandbox
            .runcached()
            .args(["-c", "0.5"])
            .args(&command)
            .assert()
            .success()
            .stdout("hello\n");

        assert_eq!(sandbox.runs(), 2);
    }

    #[test]
    fn different_arguments_are_cached_separately() {
        let sandbox = Sandbox::new();

        sandbox
            .runcached()
            .args(sandbox.counted("echo one"))
            .assert()
            .stdout("one\n");
        sandbox
            .runcached()
            .args(sandbox.counted("echo two"))
            .assert()
            .stdout("two\n");

        assert_eq!(sandbox.runs(), 2);
    }

    #[test]
    fn failed_run_not_cached_by_default() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo oops; exit 3");

        for _ in 0..2 {
            sandbox
                .runcached()
                .args(&command)
                .assert()
                .code(3)
                .stdout("oops\n");
        }

        assert_eq!(sandbox.runs(), 2);
        assert!(!sandbox.artifact(&command, "data").exists());
    }

    #[test]
    fn failed_run_cached_with_flag() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo oops; exit 3");

        for _ in 0..2 {
            sandbox
                .runcached()
                .arg("-e")
                .args(&command)
                .assert()
                .code(3)
                .stdout("oops\n");
        }

        assert_eq!(sandbox.runs(), 1);
        assert_eq!(
            fs::read_to_string(sandbox.artifact(&command, "exit")).unwrap(),
            "3"
        );
    }

    #[test]
    fn stderr_combined_into_payload() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo out; echo err >&2");

        for _ in 0..2 {
            sandbox
                .runcached()
                .args(&command)
                .assert()
                .success()
                .stdout("out\nerr\n");
        }
    }

    #[test]
    fn stderr_inherit_not_cached() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo out; echo err >&2");

        sandbox
            .runcached()
            .args(["--stderr", "inherit"])
            .args(&command)
            .assert()
            .success()
            .stdout("out\n")
            .stderr(predicate::str::contains("err"));
    }

    #[test]
    fn binary_output_byte_identical() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted(r"printf '\377\376\012\200text\015\012'");
        let expected: &[u8] = b"\xff\xfe\n\x80text\r\n";

        for _ in 0..2 {
            let output = sandbox.runcached().args(&command).output().unwrap();
            assert!(output.status.success());
            assert_eq!(output.stdout, expected);
        }
        assert_eq!(sandbox.runs(), 1);
    }

    #[test]
    fn missing_program_exits_127() {
        let sandbox = Sandbox::new();
        sandbox
            .runcached()
            .arg("definitely-not-a-real-program-xyz")
            .assert()
            .code(127)
            .stderr(predicate::str::contains("Command not found"));
    }

    #[test]
    fn live_lock_holder_times_out() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo hello");
        fs::create_dir_all(sandbox.cache_dir()).unwrap();
        let pid_file = sandbox.artifact(&command, "pid");
        fs::write(&pid_file, std::process::id().to_string()).unwrap();

        sandbox
            .runcached()
            .args(["-w", "1"])
            .args(&command)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("timeout"));

        assert_eq!(sandbox.runs(), 0);
        assert!(pid_file.exists());
    }

    #[test]
    fn stale_lock_reclaimed_quickly() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo hello");
        fs::create_dir_all(sandbox.cache_dir()).unwrap();
        let pid_file = sandbox.artifact(&command, "pid");
        fs::write(&pid_file, dead_pid().to_string()).unwrap();

        let start = Instant::now();
        sandbox
            .runcached()
            .args(["-w", "30"])
            .args(&command)
            .assert()
            .success()
            .stdout("hello\n");

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!pid_file.exists());
    }

    #[test]
    fn corrupt_lock_removed_and_reported() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo hello");
        fs::create_dir_all(sandbox.cache_dir()).unwrap();
        let pid_file = sandbox.artifact(&command, "pid");
        fs::write(&pid_file, "garbage").unwrap();

        sandbox.runcached().args(&command).assert().code(2);

        assert!(!pid_file.exists());
        assert_eq!(sandbox.runs(), 0);
    }

    #[test]
    fn concurrent_invocations_run_once() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("sleep 1; echo done");

        let (first, second) = thread::scope(|s| {
            let a = s.spawn(|| sandbox.std_command().args(&command).output().unwrap());
            let b = s.spawn(|| sandbox.std_command().args(&command).output().unwrap());
            (a.join().unwrap(), b.join().unwrap())
        });

        assert!(first.status.success());
        assert!(second.status.success());
        assert_eq!(first.stdout, b"done\n");
        assert_eq!(second.stdout, b"done\n");
        assert_eq!(sandbox.runs(), 1);
    }

    #[test]
    fn broken_consumer_exits_1() {
        use std::io::Read;
        use std::process::Stdio;

        let sandbox = Sandbox::new();
        let command = sandbox.counted("head -c 8000000 /dev/zero");

        let mut child = sandbox
            .std_command()
            .args(&command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let mut stdout = child.stdout.take().unwrap();
        let mut first = [0u8; 16];
        stdout.read_exact(&mut first).unwrap();
        drop(stdout);

        let output = child.wait_with_output().unwrap();
        assert_eq!(output.status.code(), Some(1));
        assert!(output.stderr.is_empty());
        assert!(!sandbox.artifact(&command, "pid").exists());
    }

    #[test]
    fn interrupt_releases_lock_and_discards() {
        use std::os::unix::process::ExitStatusExt;

        let sandbox = Sandbox::new();
        let command = sandbox.counted("sleep 30");
        let mut child = sandbox.std_command().args(&command).spawn().unwrap();

        assert!(wait_for(
            &sandbox.artifact(&command, "data.partial"),
            Duration::from_secs(5)
        ));
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGINT);
        }
        let status = child.wait().unwrap();

        assert_eq!(status.signal(), Some(libc::SIGINT));
        assert!(!sandbox.artifact(&command, "pid").exists());
        assert!(!sandbox.artifact(&command, "data").exists());
        assert!(!sandbox.artifact(&command, "data.partial").exists());
    }

    #[test]
    fn interrupt_with_cache_on_abort_keeps_output() {
        use std::os::unix::process::ExitStatusExt;

        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo before-abort; sleep 30");
        let mut child = sandbox
            .std_command()
            .arg("-a")
            .args(&command)
            .spawn()
            .unwrap();

        assert!(wait_for(&sandbox.counter(), Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(300));
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGINT);
        }
        let status = child.wait().unwrap();

        assert_eq!(status.signal(), Some(libc::SIGINT));
        assert!(!sandbox.artifact(&command, "pid").exists());
        assert!(!sandbox.artifact(&command, "data.partial").exists());
        assert_eq!(
            fs::read_to_string(sandbox.artifact(&command, "exit")).unwrap(),
            format!("-{}", libc::SIGINT)
        );

        sandbox
            .runcached()
            .arg("-a")
            .args(&command)
            .assert()
            .code(128 + libc::SIGINT)
            .stdout("before-abort\n");
        assert_eq!(sandbox.runs(), 1);
    }

    #[test]
    fn debug_waits_for_lock_before_reporting() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo hello");
        fs::create_dir_all(sandbox.cache_dir()).unwrap();
        fs::write(
            sandbox.artifact(&command, "pid"),
            std::process::id().to_string(),
        )
        .unwrap();

        sandbox
            .runcached()
            .args(["-d", "-w", "0"])
            .args(&command)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("valid:").not());
    }

    #[test]
    fn debug_prints_record_info() {
        let sandbox = Sandbox::new();
        let command = sandbox.counted("echo hello");

        sandbox.runcached().args(&command).assert().success();
        sandbox
            .runcached()
            .arg("-d")
            .args(&command)
            .assert()
            .success()
            .stdout("hello\n")
            .stderr(predicate::str::contains("valid:    true"));
    }
}
