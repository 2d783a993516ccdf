use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

/// Clipboard helpers tried in order until one accepts the text.
fn candidates() -> &'static [(&'static str, &'static [&'static str])] {
    if cfg!(target_os = "macos") {
        &[("pbcopy", &[])]
    } else if cfg!(target_os = "windows") {
        &[("cmd", &["/C", "clip"])]
    } else {
        &[
            ("wl-copy", &[]),
            ("xclip", &["-selection", "clipboard"]),
            ("xsel", &["--clipboard", "--input"]),
        ]
    }
}

/// Copies `text` to the system clipboard by piping it into the platform's
/// clipboard command.
pub fn copy_to_clipboard(text: &str) -> Result<(), String> {
    let mut last_error = None;
    for (program, args) in candidates() {
        match pipe_into(program, args, text) {
            Ok(()) => return Ok(()),
            Err(err) => {
                debug!(program, error = %err, "Clipboard helper failed");
                last_error = Some(err);
            }
        }
    }
    Err(last_error
        .map(|err| format!("No usable clipboard command ({err})"))
        .unwrap_or_else(|| "No clipboard command configured".to_string()))
}

fn pipe_into(program: &str, args: &[&str], input: &str) -> Result<(), String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|_| format!("`{program}` not available"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .map_err(|err| format!("`{program}` rejected input: {err}"))?;
    }
    match child.wait() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!("`{program}` exited with {status}")),
        Err(err) => Err(format!("`{program}` failed: {err}")),
    }
}
