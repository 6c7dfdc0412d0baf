//! Mock agent CLI for integration testing.
//!
//! Speaks the stream-JSON wire protocol on stdin/stdout, simulating the real
//! CLI closely enough to exercise the transport end to end:
//!
//! - emits a `system` init record at startup
//! - echoes every user message as an `assistant` record
//! - answers every incoming `control_request` with a success response
//! - reports every `control_response` it receives as a `result` record, so
//!   tests can observe what the host actually sent
//! - optionally originates `hook_callback` / `can_use_tool` requests
//! - exits 0 on stdin EOF
//!
//! # Special flags
//!
//! - `--version` / `--help` - print and exit
//! - `--exercise-hooks` - after `initialize`, invoke the first advertised
//!   hook callback with a PreToolUse/Bash input
//! - `--ask-permission=<TOOL>` - before answering the first user message,
//!   ask `can_use_tool` for `<TOOL>`
//! - `--emit-garbage` - print one non-JSON line after startup
//! - `--exit-after-init=<CODE>` - exit with `<CODE>` right after the init
//!   record
//!
//! All real-CLI flags (`--input-format`, `--output-format`,
//! `--permission-prompt-tool`, `--verbose`, `--model`, `--permission-mode`)
//! are accepted and ignored.

use serde_json::{Value, json};
use std::env;
use std::io::{self, BufRead, Write};
use std::process;

const VERSION: &str = "2.0.0 (Mock Agent CLI)";
const HELP_TEXT: &str = r#"mock_cli - mock agent CLI for integration testing

USAGE:
    mock_cli [OPTIONS]

OPTIONS:
    --exercise-hooks         Invoke the first advertised hook after initialize
    --ask-permission=<TOOL>  Ask can_use_tool for <TOOL> on the first user message
    --emit-garbage           Print one non-JSON line after startup
    --exit-after-init=<N>    Exit with code <N> after the init record
    --version                Print version and exit
    --help                   Print this help text and exit
"#;

/// Flags that take a separate value argument and are ignored
const VALUE_FLAGS: &[&str] = &[
    "--input-format",
    "--output-format",
    "--permission-prompt-tool",
    "--model",
    "--permission-mode",
];

struct CliArgs {
    exercise_hooks: bool,
    ask_permission: Option<String>,
    emit_garbage: bool,
    exit_after_init: Option<i32>,
}

impl CliArgs {
    fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();

        let mut exercise_hooks = false;
        let mut ask_permission = None;
        let mut emit_garbage = false;
        let mut exit_after_init = None;

        let mut i = 1;
        while i < args.len() {
            let arg = &args[i];
            if arg == "--version" {
                println!("{VERSION}");
                process::exit(0);
            } else if arg == "--help" {
                println!("{HELP_TEXT}");
                process::exit(0);
            } else if arg == "--exercise-hooks" {
                exercise_hooks = true;
            } else if let Some(tool) = arg.strip_prefix("--ask-permission=") {
                ask_permission = Some(tool.to_string());
            } else if arg == "--emit-garbage" {
                emit_garbage = true;
            } else if let Some(code) = arg.strip_prefix("--exit-after-init=") {
                exit_after_init =
                    Some(code.parse().map_err(|_| format!("bad exit code: {code}"))?);
            } else if VALUE_FLAGS.contains(&arg.as_str()) {
                i += 1; // skip the value
            } else if arg == "--verbose" || arg.starts_with("--") {
                // tolerated, ignored
            } else {
                return Err(format!("unexpected argument: {arg}"));
            }
            i += 1;
        }

        Ok(Self {
            exercise_hooks,
            ask_permission,
            emit_garbage,
            exit_after_init,
        })
    }
}

fn emit(record: &Value) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{record}");
    let _ = stdout.flush();
}

fn emit_raw(line: &str) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}

fn control_response(request_id: &str, body: Value) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": body,
        },
    })
}

/// First callback id advertised in an initialize `hooks` map.
fn first_callback_id(hooks: &Value) -> Option<String> {
    let events = hooks.as_object()?;
    for matchers in events.values() {
        if let Some(id) = matchers
            .as_array()
            .and_then(|m| m.first())
            .and_then(|m| m["hookCallbackIds"].as_array())
            .and_then(|ids| ids.first())
            .and_then(Value::as_str)
        {
            return Some(id.to_string());
        }
    }
    None
}

fn main() {
    let mut args = match CliArgs::parse() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("mock_cli: {msg}");
            process::exit(2);
        }
    };

    emit(&json!({
        "type": "system",
        "subtype": "init",
        "session_id": "mock-session",
        "cwd": env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
    }));

    if let Some(code) = args.exit_after_init {
        process::exit(code);
    }

    if args.emit_garbage {
        emit_raw("this is not json at all");
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&line) else {
            continue;
        };

        match value["type"].as_str() {
            Some("control_request") => {
                let request_id = value["request_id"].as_str().unwrap_or("");
                let subtype = value["request"]["subtype"].as_str().unwrap_or("");

                if subtype == "initialize" {
                    emit(&control_response(request_id, json!({"commands": []})));
                    if args.exercise_hooks {
                        if let Some(callback_id) = first_callback_id(&value["request"]["hooks"]) {
                            emit(&json!({
                                "type": "control_request",
                                "request_id": "srv_req_hook",
                                "request": {
                                    "subtype": "hook_callback",
                                    "callback_id": callback_id,
                                    "input": {
                                        "hook_event_name": "PreToolUse",
                                        "tool_name": "Bash",
                                        "tool_input": {"command": "ls"},
                                        "session_id": "mock-session",
                                        "transcript_path": "/tmp/mock-transcript",
                                        "cwd": "/tmp",
                                    },
                                },
                            }));
                        }
                    }
                } else {
                    emit(&control_response(request_id, json!({})));
                }
            }

            Some("control_response") => {
                // Surface what the host answered so tests can assert on it
                emit(&json!({
                    "type": "result",
                    "subtype": "control_ack",
                    "received": value["response"],
                }));
            }

            Some("user") => {
                if let Some(tool) = args.ask_permission.take() {
                    emit(&json!({
                        "type": "control_request",
                        "request_id": "srv_req_perm",
                        "request": {
                            "subtype": "can_use_tool",
                            "tool_name": tool,
                            "input": {"path": "/tmp/x"},
                        },
                    }));
                }
                let text = value["message"]["content"].as_str().unwrap_or("").to_string();
                emit(&json!({
                    "type": "assistant",
                    "session_id": value["session_id"].clone(),
                    "message": {
                        "role": "assistant",
                        "content": [{"type": "text", "text": text}],
                    },
                }));
            }

            _ => {}
        }
    }

    process::exit(0);
}
