use std::io::Write;
use std::process::{Command, Output, Stdio};

use anyhow::Context;

/// Runs `program` with `input` on stdin and collects its output.
pub(super) fn run_piped(program: &str, args: &[&str], input: &[u8]) -> anyhow::Result<Output> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("couldn't start `{program}`, is it installed?"))?;

    let mut stdin = child.stdin.take().context("stdin not captured")?;

    // Feed stdin from a separate thread, the child may fill its stdout pipe
    // before consuming all of its input.
    let output = std::thread::scope(|s| {
        let writer = s.spawn(move || stdin.write_all(input));
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")))
            .or_else(|e| match e.kind() {
                // the child stopped reading, its exit status tells the rest
                std::io::ErrorKind::BrokenPipe => Ok(()),
                _ => Err(e),
            });
        output.and_then(|output| written.map(|()| output))
    })?;

    Ok(output)
}

/// Like [`run_piped`], but a non-zero exit status is an error.
pub(super) fn run_filter(program: &str, args: &[&str], input: &[u8]) -> anyhow::Result<Vec<u8>> {
    let output = run_piped(program, args, input)?;

    if !output.status.success() {
        anyhow::bail!(
            "`{program}` exited with {}:\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    Ok(output.stdout)
}
