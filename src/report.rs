use std::io::{self, Write};

use crate::fixtures::FixtureFormat;
use crate::utils::WrittenFixture;
use crate::verify::FixtureCheck;

pub fn print_banner(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Generating sample model files for Lucefact testing...")?;
    writeln!(out)
}

pub fn print_created(out: &mut impl Write, fixture: &WrittenFixture) -> io::Result<()> {
    writeln!(out, "✓ Created {}", fixture.format.file_name())
}

/// Closing block listing every fixture alongside the framework it imitates.
pub fn print_summary(out: &mut impl Write) -> io::Result<()> {
    let width = FixtureFormat::ALL
        .iter()
        .map(|f| f.file_name().len())
        .max()
        .unwrap_or(0);

    writeln!(out)?;
    writeln!(out, "✨ All sample model files created successfully!")?;
    writeln!(out)?;
    writeln!(out, "You can now upload these files to Lucefact:")?;
    for format in FixtureFormat::ALL {
        writeln!(
            out,
            "  • {:<width$} ({})",
            format.file_name(),
            format.framework(),
            width = width
        )?;
    }
    Ok(())
}

pub fn print_check(out: &mut impl Write, check: &FixtureCheck) -> io::Result<()> {
    if check.passed() {
        writeln!(
            out,
            "✓ {} ({})",
            check.format.file_name(),
            check.format.framework()
        )
    } else {
        writeln!(
            out,
            "✗ {}: {}",
            check.format.file_name(),
            check.problems.join("; ")
        )
    }
}
