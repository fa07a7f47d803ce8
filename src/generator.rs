//! Driver: builds every fixture in order and writes it into the output directory.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::fixtures::FixtureFormat;
use crate::report;
use crate::utils::{WrittenFixture, ensure_dir, write_atomic};

/// Build one fixture and write it to `dir/<file name>`, replacing any existing file.
pub fn write_fixture(dir: &Path, format: FixtureFormat) -> Result<WrittenFixture> {
    let contents = format
        .build()
        .with_context(|| format!("failed to encode {format} fixture"))?;
    debug!(%format, bytes = contents.len(), "fixture built");

    let path = dir.join(format.file_name());
    write_atomic(&path, &contents)?;
    info!(%format, path = %path.display(), bytes = contents.len(), "fixture written");

    Ok(WrittenFixture {
        format,
        path,
        bytes: contents.len(),
    })
}

/// Generate all four fixtures in `dir`, reporting progress to `out`.
///
/// Stops at the first failure; fixtures written before it stay on disk.
pub fn generate(dir: &Path, out: &mut impl Write) -> Result<Vec<WrittenFixture>> {
    ensure_dir(dir)?;
    report::print_banner(out).context("failed to write report")?;

    let mut written = Vec::with_capacity(FixtureFormat::ALL.len());
    for format in FixtureFormat::ALL {
        let fixture = write_fixture(dir, format)?;
        report::print_created(out, &fixture).context("failed to write report")?;
        written.push(fixture);
    }

    report::print_summary(out).context("failed to write report")?;
    info!(dir = %dir.display(), count = written.len(), "all fixtures generated");
    Ok(written)
}
