use std::env;
use std::path::Path;
use std::process::Command;

// Stamps the binary with the string `--version` reports. The git
// revision comes from GITHUB_SHA on CI builds and from the local
// checkout otherwise; SOURCE_DATE_EPOCH pins the timestamp for
// reproducible builds.
fn main() {
    let pkg = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let stamp = build_timestamp();
    let version = match git_revision() {
        Some(rev) => format!("{pkg} (git {rev}, built {stamp})"),
        None => format!("{pkg} (built {stamp})"),
    };

    println!("cargo:rustc-env=STORCTL_BUILD_VERSION={version}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}

fn git_revision() -> Option<String> {
    if let Ok(sha) = env::var("GITHUB_SHA") {
        let sha = sha.trim();
        if !sha.is_empty() {
            return Some(sha.chars().take(7).collect());
        }
    }
    if !Path::new(".git").exists() {
        return None;
    }

    let short = git(&["rev-parse", "--short", "HEAD"])?;
    match git(&["status", "--porcelain"]) {
        Some(_) => Some(format!("{short}-dirty")),
        None => Some(short),
    }
}

fn build_timestamp() -> String {
    let moment = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|epoch| time::OffsetDateTime::from_unix_timestamp(epoch).ok())
        .unwrap_or_else(time::OffsetDateTime::now_utc);

    moment
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Runs git and returns trimmed stdout, or `None` when the command
/// fails or prints nothing.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
