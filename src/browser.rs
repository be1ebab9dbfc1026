use log::debug;
use std::process::Command;

use crate::config::Organization;
use crate::error::{BuildkiteError, Result};

/// Open `url`, honouring the organization's browser settings on macOS.
pub fn open_url(org: Option<&Organization>, url: &str) -> Result<()> {
    let (program, args) = if cfg!(target_os = "macos") {
        ("open", macos_open_args(org, url))
    } else {
        ("xdg-open", vec![url.to_string()])
    };

    debug!("$ {program} {}", args.join(" "));
    let status = Command::new(program).args(&args).status()?;
    if !status.success() {
        return Err(BuildkiteError::Io(std::io::Error::other(format!(
            "{program} exited with {status}"
        ))));
    }
    Ok(())
}

/// Arguments for macOS `open`.
///
/// Firefox takes a named profile with `-P`, Chromium-based browsers take
/// a profile directory.
fn macos_open_args(org: Option<&Organization>, url: &str) -> Vec<String> {
    let application = org.and_then(|o| o.browser_application.as_deref()).filter(|a| !a.is_empty());
    let profile = org.and_then(|o| o.browser_profile.as_deref()).filter(|p| !p.is_empty());

    let mut args: Vec<String> = match (application, profile) {
        (Some(app), Some(profile)) if app.to_lowercase().contains("firefox") => vec![
            "-n".into(),
            "-a".into(),
            app.into(),
            "--args".into(),
            "-no-remote".into(),
            "-P".into(),
            profile.into(),
            "-new-tab".into(),
        ],
        (Some(app), Some(profile)) => vec![
            "-na".into(),
            app.into(),
            "--args".into(),
            format!("--profile-directory={profile}"),
            "--new-tab".into(),
        ],
        (Some(app), None) => vec!["-a".into(), app.into()],
        (None, _) => Vec::new(),
    };
    args.push(url.to_string());
    args
}
