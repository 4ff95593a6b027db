use std::io::BufRead;
use std::thread;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::ControlEvent;

/// Bench stand-in for the physical buttons: lines on stdin. `b` toggles
/// the session like the front button, `q` requests shutdown. Hardware
/// GPIO feeds the same channel from its own task.
pub fn spawn_stdin_buttons(tx: mpsc::Sender<ControlEvent>) {
    let _ = thread::Builder::new()
        .name("stdin-buttons".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                let event = match line.trim() {
                    "b" | "button" => ControlEvent::ButtonPressed,
                    "q" | "quit" => ControlEvent::ShutdownRequested,
                    "" => continue,
                    other => {
                        info!(input = other, "unrecognized input, use 'b' or 'q'");
                        continue;
                    }
                };
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
        });
}

/// Ctrl-C maps to the same shutdown path as the hardware button.
pub fn spawn_ctrl_c(tx: mpsc::Sender<ControlEvent>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(ControlEvent::ShutdownRequested).await;
            }
            Err(e) => warn!("ctrl-c handler failed: {e}"),
        }
    });
}
