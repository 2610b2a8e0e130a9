//! CLI renderer for run events.
//!
//! The renderer is responsible for all output formatting. It consumes
//! `RunEvent`s and writes them to stdout/stderr following the contract:
//! - Token payloads (or JSON frames with `--json`) → stdout only
//! - Status, diagnostics, errors → stderr only

use std::io::{Stderr, Stdout, Write, stderr, stdout};

use runflow_core::core::sink::RunSubscription;
use runflow_types::event::RunEvent;

/// Renderer that writes run events to stdout/stderr.
///
/// # Output contract
/// - `Token` payloads → stdout (as raw text, or one JSON frame per line)
/// - `Error` → stderr (in JSON mode the error frame goes to stdout too,
///   so a consumer of the frame stream sees the terminal frame)
pub struct RunRenderer {
    stdout: Stdout,
    stderr: Stderr,
    json: bool,
    /// Whether the final newline has been printed after token output.
    needs_final_newline: bool,
}

impl RunRenderer {
    /// Creates a renderer; `json` switches to frame-per-line output.
    pub fn new(json: bool) -> Self {
        Self {
            stdout: stdout(),
            stderr: stderr(),
            json,
            needs_final_newline: false,
        }
    }

    /// Handles a single run event by writing to the appropriate stream.
    pub fn handle_event(&mut self, event: &RunEvent) {
        if self.json {
            let _ = writeln!(self.stdout, "{}", event.frame().to_json_string());
            let _ = self.stdout.flush();
            return;
        }

        match event {
            RunEvent::Token(token) => {
                if !token.data.is_empty() {
                    let _ = write!(self.stdout, "{}", token.data);
                    let _ = self.stdout.flush();
                    self.needs_final_newline = true;
                }
            }
            RunEvent::Error { message, .. } => {
                let _ = writeln!(self.stderr, "Error: {message}");
            }
        }
    }

    /// Prints a final newline to stdout if needed (after token output completes).
    pub fn finish(&mut self) {
        if self.needs_final_newline {
            let _ = writeln!(self.stdout);
            self.needs_final_newline = false;
        }
    }
}

/// Drains a subscription into a renderer until the run's stream closes.
///
/// Returns the renderer so the caller can `finish()` after the run settles.
pub async fn render_events(mut subscription: RunSubscription, json: bool) -> RunRenderer {
    let mut renderer = RunRenderer::new(json);
    while let Some(event) = subscription.recv().await {
        renderer.handle_event(event.as_ref());
    }
    if subscription.is_degraded() {
        let _ = writeln!(
            stderr(),
            "Warning: event stream fell behind; output may be incomplete."
        );
    }
    renderer
}
