use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn taskpilot(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskpilot"));
    cmd.env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("TASKPILOT_CHECKPOINTS__DIRECTORY", home.join("checkpoints"))
        .env_remove("RUST_LOG")
        .env_remove("TASKPILOT_LOG_LEVEL")
        .stdin(Stdio::null());
    cmd
}

fn run_taskpilot(args: &[&str]) -> Output {
    let home = TempDir::new().unwrap();
    run_in(home.path(), args, &[])
}

fn run_in(home: &Path, args: &[&str], env_vars: &[(&str, &str)]) -> Output {
    let mut cmd = taskpilot(home);
    cmd.args(args);
    for (key, value) in env_vars {
        cmd.env(key, value);
    }
    cmd.output().expect("Failed to execute taskpilot")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn json_of(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout_of(output)))
}

mod help_command_tests {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let output = run_taskpilot(&["--help"]);
        let stdout = stdout_of(&output);

        assert!(output.status.success());
        for command in ["run", "pipeline", "exec", "tools", "config", "checkpoints"] {
            assert!(stdout.contains(command), "help should mention '{}'", command);
        }
    }

    #[test]
    fn test_version() {
        let output = run_taskpilot(&["--version"]);
        assert!(output.status.success());
        assert!(stdout_of(&output).contains("taskpilot 0.1.0"));
    }

    #[test]
    fn test_invalid_command() {
        let output = run_taskpilot(&["frobnicate"]);
        assert!(!output.status.success());
    }

    #[test]
    fn test_verbose_flag_accepted() {
        let output = run_taskpilot(&["--verbose", "tools"]);
        assert!(output.status.success());
    }
}

mod tools_command_tests {
    use super::*;

    #[test]
    fn test_tools_json() {
        let output = run_taskpilot(&["tools", "--format", "json"]);
        assert!(output.status.success(), "{}", stderr_of(&output));

        let tools = json_of(&output);
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["delete_file", "list_files", "read_file", "write_file"]);
    }

    #[test]
    fn test_tools_table() {
        let output = run_taskpilot(&["tools"]);
        let stdout = stdout_of(&output);

        assert!(output.status.success());
        assert!(stdout.contains("write_file"));
        assert!(stdout.contains("Total:"));
    }
}

mod config_command_tests {
    use super::*;

    #[test]
    fn test_config_defaults_as_json() {
        let output = run_taskpilot(&["config", "--format", "json"]);
        assert!(output.status.success(), "{}", stderr_of(&output));

        let config = json_of(&output);
        assert_eq!(config["agent"]["max_iterations"], 50);
        assert_eq!(config["pipeline"]["max_parallel_agents"], 2);
        assert_eq!(config["checkpoints"]["enabled"], true);
    }

    #[test]
    fn test_config_toml() {
        let output = run_taskpilot(&["config"]);
        let stdout = stdout_of(&output);

        assert!(output.status.success(), "{}", stderr_of(&output));
        assert!(stdout.contains("[agent]"));
        assert!(stdout.contains("max_iterations = 50"));
    }

    #[test]
    fn test_env_override() {
        let home = TempDir::new().unwrap();
        let output = run_in(
            home.path(),
            &["config", "--format", "json"],
            &[("TASKPILOT_AGENT__MAX_ITERATIONS", "7")],
        );

        assert!(output.status.success(), "{}", stderr_of(&output));
        assert_eq!(json_of(&output)["agent"]["max_iterations"], 7);
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let home = TempDir::new().unwrap();
        let output = run_in(
            home.path(),
            &["config"],
            &[("TASKPILOT_AGENT__MAX_ITERATIONS", "0")],
        );

        assert!(!output.status.success());
        let stderr = stderr_of(&output);
        assert!(stderr.contains("E2002"), "{}", stderr);
        assert!(stderr.contains("agent.max_iterations"), "{}", stderr);
    }
}

mod exec_command_tests {
    use super::*;

    #[test]
    fn test_exec_inline_code() {
        let output = run_taskpilot(&["exec", "-e", "print(\"hello\"); 40 + 2"]);
        let stdout = stdout_of(&output);

        assert!(output.status.success(), "{}", stderr_of(&output));
        assert!(stdout.contains("hello"));
        assert!(stdout.contains("=> 42"));
    }

    #[test]
    fn test_exec_script_file_with_tools() {
        let home = TempDir::new().unwrap();
        let script = home.path().join("site.rhai");
        std::fs::write(
            &script,
            "write_file(#{ path: \"index.html\", content: \"<h1>hi</h1>\" });\nlet files = list_files();\nprint(files);\n",
        )
        .unwrap();

        let output = run_in(
            home.path(),
            &["exec", script.to_str().unwrap(), "--format", "json"],
            &[],
        );
        assert!(output.status.success(), "{}", stderr_of(&output));

        let result = json_of(&output);
        assert_eq!(result["artifacts"], serde_json::json!(["index.html"]));
        assert_eq!(
            result["tools_invoked"],
            serde_json::json!(["write_file", "list_files"])
        );
    }

    #[test]
    fn test_exec_failure_exits_nonzero() {
        let output = run_taskpilot(&["exec", "-e", "print(\"before\"); throw \"broken\";"]);

        assert!(!output.status.success());
        assert!(stdout_of(&output).contains("before"));
        assert!(stderr_of(&output).contains("broken"));
    }

    #[test]
    fn test_exec_requires_source() {
        let output = run_taskpilot(&["exec"]);
        assert!(!output.status.success());
    }
}

mod run_command_tests {
    use super::*;

    #[test]
    fn test_run_json() {
        let output = run_taskpilot(&[
            "run",
            "Create index.html. Then list the files",
            "--format",
            "json",
        ]);
        assert!(output.status.success(), "{}", stderr_of(&output));

        let result = json_of(&output);
        assert_eq!(result["success"], true);
        assert_eq!(result["stop_reason"], "completed");
        assert_eq!(result["artifacts"], serde_json::json!(["index.html"]));
        assert_eq!(result["plan"]["steps"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_run_text_prints_plan() {
        let output = run_taskpilot(&["run", "Create index.html"]);
        let stdout = stdout_of(&output);

        assert!(output.status.success(), "{}", stderr_of(&output));
        assert!(stdout.contains("step-1"));
        assert!(stdout.contains("Completed"));
    }

    #[test]
    fn test_approval_with_closed_input_aborts() {
        let output = run_taskpilot(&[
            "run",
            "Create index.html",
            "--require-approval",
            "--format",
            "json",
        ]);

        assert!(!output.status.success());
        let result = json_of(&output);
        assert_eq!(result["stop_reason"], "aborted");
        assert_eq!(result["success"], false);
    }

    #[test]
    fn test_approval_from_stdin() {
        let home = TempDir::new().unwrap();
        let mut child = taskpilot(home.path())
            .args([
                "run",
                "Create index.html",
                "--require-approval",
                "--format",
                "json",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        child.stdin.take().unwrap().write_all(b"y\n").unwrap();
        let output = child.wait_with_output().unwrap();

        assert!(output.status.success(), "{}", stderr_of(&output));
        assert_eq!(json_of(&output)["stop_reason"], "completed");
    }
}

mod checkpoints_command_tests {
    use super::*;

    #[test]
    fn test_run_leaves_a_checkpoint() {
        let home = TempDir::new().unwrap();
        let run = run_in(home.path(), &["run", "Create index.html", "--format", "json"], &[]);
        assert!(run.status.success(), "{}", stderr_of(&run));

        let list = run_in(home.path(), &["checkpoints", "list", "--format", "json"], &[]);
        assert!(list.status.success(), "{}", stderr_of(&list));
        let checkpoints = json_of(&list);
        let checkpoints = checkpoints.as_array().unwrap();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0]["goal"], "Create index.html");

        let id = checkpoints[0]["id"].as_str().unwrap();
        let show = run_in(home.path(), &["checkpoints", "show", id, "--format", "json"], &[]);
        assert!(show.status.success(), "{}", stderr_of(&show));
        assert_eq!(json_of(&show)["goal"], "Create index.html");
    }

    #[test]
    fn test_unknown_checkpoint() {
        let output = run_taskpilot(&["checkpoints", "show", "missing"]);
        assert!(!output.status.success());
    }

    #[test]
    fn test_disabled_checkpoints() {
        let home = TempDir::new().unwrap();
        let output = run_in(
            home.path(),
            &["checkpoints"],
            &[("TASKPILOT_CHECKPOINTS__ENABLED", "false")],
        );

        assert!(!output.status.success());
        assert!(stderr_of(&output).contains("disabled"));
    }
}
