//! Helpers for protocol-level integration tests: spawn the built binary,
//! feed it a request over stdin and hand back the decoded response.

use std::{
    error::Error,
    io::Write,
    process::{Command, Stdio},
};

use serde_json::Value;

/// Run `<binary> single` with `request` on stdin and decode the response.
pub fn run_single(binary: &str, request: &Value) -> Result<Value, Box<dyn Error>> {
    let mut child = Command::new(binary)
        .arg("single")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    child
        .stdin
        .take()
        .ok_or("child has no stdin")?
        .write_all(request.to_string().as_bytes())?;

    let output = child.wait_with_output()?;
    assert!(
        output.status.success(),
        "binary exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Assert the response class and return its value.
pub fn expect_class(response: Value, class: &str) -> Value {
    assert_eq!(
        response["class"], class,
        "unexpected response: {response}"
    );
    response["value"].clone()
}
