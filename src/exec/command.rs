// src/exec/command.rs

//! Turning command-template strings into something we can spawn.

/// A program plus its argument vector, ready for `Command::new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Wrap a shell command string in the platform shell.
///
/// - Unix: `sh -c <cmd>`
/// - Windows: `cmd /C <cmd>`
pub fn shell_wrap(cmd: &str) -> ShellCommand {
    if cfg!(windows) {
        ShellCommand {
            program: "cmd".to_string(),
            args: vec!["/C".to_string(), cmd.to_string()],
        }
    } else {
        ShellCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), cmd.to_string()],
        }
    }
}

/// Like [`shell_wrap`], but appends `extra` as positional arguments of the
/// command without splicing them into the shell text.
///
/// On Unix this uses `sh -c '<cmd> "$@"' sh <extra...>`, so credentials
/// containing shell metacharacters reach the program verbatim.
pub fn shell_wrap_with_args(cmd: &str, extra: &[&str]) -> ShellCommand {
    if cfg!(windows) {
        let mut line = cmd.to_string();
        for arg in extra {
            line.push(' ');
            line.push_str(arg);
        }
        return shell_wrap(&line);
    }

    let mut args = vec![
        "-c".to_string(),
        format!("{cmd} \"$@\""),
        "sh".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    ShellCommand {
        program: "sh".to_string(),
        args,
    }
}
