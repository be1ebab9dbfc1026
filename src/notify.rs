use log::debug;
use std::process::{Command, ExitStatus, Stdio};

/// Receives build outcome notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Pops up a desktop notification. Failures are logged and otherwise ignored.
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        let (program, args) = notification_command(title, message);
        match run_quietly(program, &args) {
            Ok(status) if status.success() => debug!("Sent notification via {program}"),
            Ok(status) => debug!("{program} exited with {status}"),
            Err(e) => debug!("Could not send notification via {program}: {e}"),
        }
    }
}

/// Runs `program` to completion with its output discarded.
fn run_quietly(program: &str, args: &[String]) -> std::io::Result<ExitStatus> {
    Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
}

pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _title: &str, _message: &str) {}
}

fn notification_command(title: &str, message: &str) -> (&'static str, Vec<String>) {
    if cfg!(target_os = "macos") {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(message),
            escape_applescript(title)
        );
        ("osascript", vec!["-e".to_string(), script])
    } else {
        ("notify-send", vec![title.to_string(), message.to_string()])
    }
}

fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
