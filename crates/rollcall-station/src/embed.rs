//! Embedding via an external program.
//!
//! The program reads one binary PPM frame on stdin and writes a JSON array
//! of signature components to stdout, or `null` when it finds no face.

use rollcall_core::{CaptureAdapter, CaptureError, Frame, Signature};
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

pub struct CommandAdapter {
    program: String,
    args: Vec<String>,
}

impl CommandAdapter {
    pub fn new(argv: &[String]) -> Result<Self, CaptureError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| CaptureError::Unavailable("empty embedding command".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl CaptureAdapter for CommandAdapter {
    fn capture_signature(&mut self, frame: &Frame) -> Result<Option<Signature>, CaptureError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::Unavailable(format!("{}: {e}", self.program)))?;

        let ppm = frame.to_ppm();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::Backend("stdin not captured".into()))?;

        // Stdin is fed from a helper thread while stdout is drained here.
        let writer = std::thread::spawn(move || match stdin.write_all(&ppm) {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            other => other,
        });

        let output = child
            .wait_with_output()
            .map_err(|e| CaptureError::Backend(format!("waiting for {}: {e}", self.program)))?;
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CaptureError::Backend(format!("writing frame: {e}"))),
            Err(_) => return Err(CaptureError::Backend("frame writer panicked".into())),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Backend(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let values: Option<Vec<f32>> = serde_json::from_slice(&output.stdout)
            .map_err(|e| CaptureError::Backend(format!("unparseable output: {e}")))?;
        tracing::debug!(
            program = %self.program,
            face = values.is_some(),
            "embedding command finished"
        );
        values.map(Signature::new).transpose().map_err(Into::into)
    }
}
