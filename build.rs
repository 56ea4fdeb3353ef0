//! Build script for generating the `vmdrive` man page.
//!
//! The packaging pipeline expects the man page to be available from the
//! build output directory, so we generate it using clap-mangen here.

use std::env;
use std::io::Write;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var("OUT_DIR")
        .map(Utf8PathBuf::from)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::NotFound, err))?;

    let mut buffer = Vec::new();
    Man::new(Cli::command()).render(&mut buffer)?;

    let dir = Dir::open_ambient_dir(&out_dir, ambient_authority())?;
    dir.write("vmdrive.1", &buffer)?;

    Ok(())
}
