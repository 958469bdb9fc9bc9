use std::{io, io::Read, path::PathBuf};

use argp::FromArgs;
use odi::{DiscImage, EntryData, ErrorContext};

use crate::util::display;

#[derive(FromArgs, Debug)]
/// Prints a CUE sheet for an audio-bearing disc image.
#[argp(subcommand, name = "cue")]
pub struct Args {
    #[argp(positional)]
    /// Path to disc image
    file: PathBuf,
}

pub fn run(args: Args) -> odi::Result<()> {
    log::info!("Loading {}", display(&args.file));
    let disc = DiscImage::new(&args.file)?;
    let archive = disc.open_archive()?;

    let entry = archive
        .entries()
        .iter()
        .find(|e| matches!(e.data, EntryData::CueSheet(_)))
        .ok_or_else(|| odi::Error::DiscFormat("Disc image has no audio tracks".to_string()))?;
    let mut reader = archive.open(entry)?;
    let mut sheet = String::new();
    reader
        .read_to_string(&mut sheet)
        .map_err(|e| e.context("Reading CUE sheet"))?;
    io::Write::write_all(&mut io::stdout(), sheet.as_bytes())
        .map_err(|e| e.context("Writing CUE sheet"))?;
    Ok(())
}
