//! Read generated fixtures back and check them against what the builders produce.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::fixtures::{FixtureFormat, Signature};
use crate::pickle;

#[derive(Debug, Clone)]
pub struct FixtureCheck {
    pub format: FixtureFormat,
    pub path: PathBuf,
    pub problems: Vec<String>,
}

impl FixtureCheck {
    pub fn passed(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Check a single fixture in `dir`.
///
/// A missing or malformed fixture is reported in [`FixtureCheck::problems`];
/// only unexpected I/O failures are returned as errors.
pub fn verify_fixture(dir: &Path, format: FixtureFormat) -> Result<FixtureCheck> {
    let path = dir.join(format.file_name());
    let mut check = FixtureCheck {
        format,
        path: path.clone(),
        problems: Vec::new(),
    };

    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            check.problems.push("file not found".to_string());
            return Ok(check);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    debug!(%format, path = %path.display(), bytes = data.len(), "read fixture");

    let expected_sig = format.signature();
    match Signature::sniff(&data) {
        Some(sig) if sig == expected_sig => {}
        Some(sig) => check
            .problems
            .push(format!("expected {expected_sig}, found {sig}")),
        None => check
            .problems
            .push(format!("expected {expected_sig}, found unrecognized header")),
    }

    match format.pickle_value() {
        // Any conforming pickler may have written these, so compare values, not bytes.
        Some(expected) => match pickle::from_slice(&data) {
            Ok(value) if value == expected => {}
            Ok(_) => check
                .problems
                .push("decoded value differs from generated fixture".to_string()),
            Err(e) => check.problems.push(format!("cannot decode pickle: {e}")),
        },
        None => {
            let expected = format
                .build()
                .with_context(|| format!("failed to build {format} fixture"))?;
            if data.len() != expected.len() {
                check.problems.push(format!(
                    "expected {} bytes, found {}",
                    expected.len(),
                    data.len()
                ));
            } else if data != expected {
                check
                    .problems
                    .push("content differs from generated fixture".to_string());
            }
        }
    }

    if !check.passed() {
        warn!(%format, path = %path.display(), problems = ?check.problems, "fixture check failed");
    }
    Ok(check)
}

/// Check all four fixtures in `dir`, in generation order.
pub fn verify_dir(dir: &Path) -> Result<Vec<FixtureCheck>> {
    let checks = FixtureFormat::ALL
        .into_iter()
        .map(|format| verify_fixture(dir, format))
        .collect::<Result<Vec<_>>>()?;
    let failed = checks.iter().filter(|c| !c.passed()).count();
    info!(dir = %dir.display(), checked = checks.len(), failed, "verification finished");
    Ok(checks)
}
