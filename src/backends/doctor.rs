//! Doctor - Environment checking

use anyhow::Result;
use std::path::Path;
use std::process::Command;

use crate::cli::Settings;
use crate::core::model::{ItemError, Kind, ResultItem, ResultSet};
use crate::core::render::{RenderConfig, Renderer};
use crate::core::util::{command_exists, truncate_string};

const MAX_DETAIL_BYTES: usize = 160;

/// Outcome of one environment check
#[derive(Debug, Clone)]
pub struct CheckStatus {
    pub name: String,
    pub ok: bool,
    pub detail: String,
    pub required: bool,
    pub notes: Option<String>,
}

impl CheckStatus {
    pub fn to_result_item(&self) -> ResultItem {
        let status = if self.ok { "✓" } else { "✗" };
        let required = if self.required {
            "required"
        } else {
            "optional"
        };
        let (detail, truncated) = truncate_string(&self.detail, MAX_DETAIL_BYTES);
        let ellipsis = if truncated { "..." } else { "" };

        let mut excerpt = format!("{} {} ({}) - {}{}", status, self.name, required, detail, ellipsis);
        if let Some(notes) = &self.notes {
            excerpt = format!("{}\n  Note: {}", excerpt, notes);
        }

        let mut item = ResultItem::check(excerpt);
        if !self.ok {
            item.kind = Kind::Error;
            if self.required {
                item = item.with_error(ItemError::new(
                    "MISSING_DEPENDENCY",
                    format!("{} check failed", self.name),
                ));
            }
        }
        item
    }
}

fn check_go(go: &str) -> CheckStatus {
    let notes = Some("Install Go from https://go.dev/dl or pass --go /path/to/go".to_string());
    if !command_exists(go) {
        return CheckStatus {
            name: "go".to_string(),
            ok: false,
            detail: format!("{} not found", go),
            required: true,
            notes,
        };
    }

    match Command::new(go).arg("version").output() {
        Ok(output) if output.status.success() => CheckStatus {
            name: "go".to_string(),
            ok: true,
            detail: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            required: true,
            notes: None,
        },
        Ok(output) => CheckStatus {
            name: "go".to_string(),
            ok: false,
            detail: format!(
                "{} version failed: {}",
                go,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            required: true,
            notes,
        },
        Err(e) => CheckStatus {
            name: "go".to_string(),
            ok: false,
            detail: format!("{}: {}", go, e),
            required: true,
            notes,
        },
    }
}

/// The proxy and the go tool both write here.
fn check_writable_dir(name: &str, dir: &Path) -> CheckStatus {
    let result = std::fs::create_dir_all(dir).and_then(|_| tempfile::NamedTempFile::new_in(dir));
    CheckStatus {
        name: name.to_string(),
        ok: result.is_ok(),
        detail: match result {
            Ok(_) => format!("writable: {}", dir.display()),
            Err(e) => format!("{}: {}", dir.display(), e),
        },
        required: true,
        notes: None,
    }
}

fn check_workdir(settings: &Settings) -> CheckStatus {
    let result = settings.origin().prepare_workdir();
    CheckStatus {
        name: "workdir".to_string(),
        ok: result.is_ok(),
        detail: match result {
            Ok(()) => format!("go.mod ready in {}", settings.workdir.display()),
            Err(e) => format!("{}: {}", settings.workdir.display(), e),
        },
        required: true,
        notes: None,
    }
}

fn check_gopath(settings: &Settings) -> CheckStatus {
    match &settings.gopath {
        Some(gopath) => CheckStatus {
            name: "GOPATH".to_string(),
            ok: true,
            detail: gopath.display().to_string(),
            required: false,
            notes: None,
        },
        None => CheckStatus {
            name: "GOPATH".to_string(),
            ok: false,
            detail: "not set".to_string(),
            required: false,
            notes: Some(
                "The go tool falls back to its own default; make sure it matches --cache-dir"
                    .to_string(),
            ),
        },
    }
}

/// Check everything the proxy needs at runtime
pub fn check_environment(settings: &Settings) -> Vec<CheckStatus> {
    vec![
        check_go(&settings.go),
        check_gopath(settings),
        check_writable_dir("cache", &settings.cache_root),
        check_workdir(settings),
    ]
}

/// Run the doctor command
pub fn run_doctor(settings: &Settings, render_config: RenderConfig) -> Result<()> {
    let checks = check_environment(settings);

    let mut result_set = ResultSet::new();
    for check in &checks {
        result_set.push(check.to_result_item());
    }

    let renderer = Renderer::with_config(render_config);
    println!("{}", renderer.render(&result_set));

    if checks.iter().any(|c| c.required && !c.ok) {
        eprintln!("\n⚠️  Some required checks failed!");
    }

    Ok(())
}
