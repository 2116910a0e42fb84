use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Nothing listens on port 1, so every request fails fast with connection refused.
const UNREACHABLE: &str = "http://127.0.0.1:1";

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write_config(&self, contents: &str) -> PathBuf {
        let dir = self.xdg_config.join("deploywatch");
        fs::create_dir_all(&dir).expect("failed to create config dir");
        let path = dir.join("config.toml");
        fs::write(&path, contents).expect("failed to write config");
        path
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(assert_cmd::cargo::cargo_bin!("deploywatch"))
            .args(args)
            .env("HOME", &self.home)
            .env("XDG_CONFIG_HOME", &self.xdg_config)
            .env("XDG_STATE_HOME", &self.xdg_state)
            .env_remove("RUST_LOG")
            .output()
            .unwrap_or_else(|e| panic!("failed to execute deploywatch: {e}"))
    }
}

fn render(output: &Output) -> String {
    format!(
        "status: {}\nstdout:\n{}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn config_prints_defaults_and_paths() {
    let env = CliTestEnv::new();

    let output = env.run(&["config"]);
    assert!(output.status.success(), "{}", render(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("base_url             = http://localhost:8000"));
    assert!(stdout.contains("poll_interval_ms     = 1000"));
    assert!(stdout.contains("time_zone            = UTC"));
    assert!(stdout.contains("api_token            = (none)"));
    assert!(stdout.contains(
        &env.xdg_config
            .join("deploywatch/config.toml")
            .display()
            .to_string()
    ));
}

#[test]
fn config_reports_existing_log_file() {
    let env = CliTestEnv::new();

    let output = env.run(&["config"]);
    assert!(output.status.success(), "{}", render(&output));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let log_file = stdout
        .lines()
        .find_map(|line| line.strip_prefix("Log file:"))
        .map(|path| PathBuf::from(path.trim()))
        .expect("config output should name the log file");
    assert!(log_file.starts_with(env.xdg_state.join("deploywatch")));
    assert!(
        log_file.exists(),
        "log file {} should exist without -v",
        log_file.display()
    );
}

#[test]
fn config_file_and_server_flag_are_applied() {
    let env = CliTestEnv::new();
    env.write_config(
        r#"
[server]
base_url = "http://deploy.example:9000"
api_token = "secret"

[display]
time_zone = "+09:00"
"#,
    );

    let output = env.run(&["config"]);
    assert!(output.status.success(), "{}", render(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("base_url             = http://deploy.example:9000"));
    assert!(stdout.contains("api_token            = (set)"));
    assert!(!stdout.contains("secret"));
    assert!(stdout.contains("time_zone            = +09:00"));

    let output = env.run(&["--server", "https://other.example", "config"]);
    assert!(output.status.success(), "{}", render(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("base_url             = https://other.example"));
}

#[test]
fn invalid_server_flag_is_rejected() {
    let env = CliTestEnv::new();

    let output = env.run(&["--server", "deploy.example", "config"]);
    assert!(!output.status.success(), "{}", render(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid --server value"), "{}", render(&output));
}

#[test]
fn invalid_config_file_is_reported() {
    let env = CliTestEnv::new();
    env.write_config("[observer]\npoll_interval_ms = 0\n");

    let output = env.run(&["config"]);
    assert!(!output.status.success(), "{}", render(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load configuration"));
}

#[test]
fn history_failure_shows_banner_and_exits_cleanly() {
    let env = CliTestEnv::new();

    let output = env.run(&["--server", UNREACHABLE, "history"]);
    assert!(output.status.success(), "{}", render(&output));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Could not load job history"),
        "expected banner, got:\n{}",
        render(&output)
    );
    assert!(String::from_utf8_lossy(&output.stdout).trim().is_empty());
}

#[test]
fn watch_unreachable_server_fails_job() {
    let env = CliTestEnv::new();
    env.write_config(
        r#"
[observer]
poll_interval_ms = 20
"#,
    );

    let output = env.run(&["--server", UNREACHABLE, "watch", "j1"]);
    assert_eq!(output.status.code(), Some(1), "{}", render(&output));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Watching job j1"));
    assert!(stderr.contains("Job j1 finished: failed"), "{}", render(&output));
}

#[test]
fn watch_writes_log_file() {
    let env = CliTestEnv::new();
    env.write_config(
        r#"
[observer]
use_stream = false
poll_interval_ms = 20
"#,
    );

    let output = env.run(&["-v", "--server", UNREACHABLE, "watch", "j1", "--poll-only"]);
    assert_eq!(output.status.code(), Some(1), "{}", render(&output));

    let log_dir = env.xdg_state.join("deploywatch");
    let logs: Vec<_> = fs::read_dir(&log_dir)
        .expect("log directory should exist")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("deploywatch"))
        .collect();
    assert!(!logs.is_empty(), "expected a log file in {}", log_dir.display());
}
