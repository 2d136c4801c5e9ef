use std::io::Write;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;

use crate::Cli;

pub(crate) fn write_completions<W: Write>(shell: Shell, writer: &mut W) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(shell, &mut command, "upkeep", &mut generated);

    writer
        .write_all(&generated)
        .context("failed writing generated completion script")?;
    writer
        .flush()
        .context("failed flushing generated completion script")
}
