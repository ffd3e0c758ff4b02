//! Report mail dispatch through the local sendmail.

use crate::utils::{RbtError, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// A `text/html` message ready to be handed to `sendmail -t`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

impl Message {
    /// Headers and body in RFC 5322 form.
    pub fn to_rfc5322(&self) -> String {
        let mut message = String::new();
        message.push_str(&format!("From: {}\n", self.from));
        message.push_str(&format!("To: {}\n", self.to.join(", ")));
        message.push_str(&format!("Subject: {}\n", self.subject));
        message.push_str("MIME-Version: 1.0\n");
        message.push_str("Content-Type: text/html; charset=utf-8\n");
        message.push_str("Content-Transfer-Encoding: 8bit\n");
        message.push('\n');
        message.push_str(&self.html);
        message
    }
}

/// Pipe `message` to `sendmail -t`.
pub fn send(sendmail: &Path, message: &Message) -> Result<()> {
    if message.to.is_empty() {
        return Err(RbtError::Mail("no recipients".to_string()));
    }

    debug!("Sending report via {}", sendmail.display());
    let mut child = Command::new(sendmail)
        .arg("-t")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| {
            RbtError::Mail(format!("failed to start {}: {}", sendmail.display(), e))
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(message.to_rfc5322().as_bytes())?;
    }

    let status = child.wait()?;
    if !status.success() {
        return Err(RbtError::Mail(format!(
            "{} exited with {}",
            sendmail.display(),
            status
        )));
    }

    info!("Report mailed to {}", message.to.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn message(to: &[&str]) -> Message {
        Message {
            from: "rbt@backup01".to_string(),
            to: to.iter().map(|s| s.to_string()).collect(),
            subject: "Backup status: ERR, OK".to_string(),
            html: "<html></html>\n".to_string(),
        }
    }

    fn fake_sendmail(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("sendmail");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_headers() {
        let text = message(&["ops@example.com", "oncall@example.com"]).to_rfc5322();
        assert!(text.starts_with("From: rbt@backup01\n"));
        assert!(text.contains("To: ops@example.com, oncall@example.com\n"));
        assert!(text.contains("Subject: Backup status: ERR, OK\n"));
        assert!(text.contains("Content-Type: text/html"));
        assert!(text.ends_with("\n\n<html></html>\n"));
    }

    #[test]
    fn test_send_pipes_message() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out");
        let sendmail = fake_sendmail(
            dir.path(),
            &format!("echo \"$1\" > {0}\ncat >> {0}", out.display()),
        );

        send(&sendmail, &message(&["ops@example.com"])).unwrap();

        let captured = fs::read_to_string(&out).unwrap();
        assert!(captured.starts_with("-t\nFrom: rbt@backup01\n"));
        assert!(captured.contains("<html></html>"));
    }

    #[test]
    fn test_send_failure() {
        let dir = TempDir::new().unwrap();
        let sendmail = fake_sendmail(dir.path(), "cat > /dev/null\nexit 75");

        let err = send(&sendmail, &message(&["ops@example.com"])).unwrap_err();
        assert!(matches!(err, RbtError::Mail(_)));
    }

    #[test]
    fn test_missing_sendmail() {
        let err = send(Path::new("/nonexistent/sendmail"), &message(&["a@b"])).unwrap_err();
        assert!(matches!(err, RbtError::Mail(_)));
    }

    #[test]
    fn test_no_recipients() {
        let dir = TempDir::new().unwrap();
        let sendmail = fake_sendmail(dir.path(), "exit 0");
        assert!(send(&sendmail, &message(&[])).is_err());
    }
}
