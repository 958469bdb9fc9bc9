use std::path::{Path, PathBuf};

use argp::FromArgs;
use odi::{DiscImage, EntryData, Msf};
use size::Size;

use crate::util::display;

#[derive(FromArgs, Debug)]
/// Displays information about disc images.
#[argp(subcommand, name = "info")]
pub struct Args {
    #[argp(positional)]
    /// Path to disc image(s)
    file: Vec<PathBuf>,
}

pub fn run(args: Args) -> odi::Result<()> {
    for file in &args.file {
        info_file(file)?;
    }
    Ok(())
}

fn info_file(path: &Path) -> odi::Result<()> {
    log::info!("Loading {}", display(path));
    let disc = DiscImage::new(path)?;
    let info = disc.info();

    println!("Format: {}", disc.format());
    println!("Medium: {}", info.medium);
    if info.total_size > 0 {
        println!("Image size: {}", Size::from_bytes(info.total_size));
    }
    if let Some(volume_id) = &info.volume_id {
        println!("Volume ID: {}", volume_id);
    }
    if let Some(title) = &info.title {
        println!("Title: {}", title);
    }

    for session in &info.sessions {
        println!();
        println!("Session {} ({})", session.number, session.session_type);
        if let Some(mcn) = &session.mcn {
            println!("\tCatalog: {}", mcn);
        }
        for track in &session.tracks {
            let sub = if track.subchannel_size > 0 {
                format!(" +{} sub", track.subchannel_size)
            } else {
                String::new()
            };
            println!(
                "\tTrack {:02}: {:<11} {} + {} sectors, {} bytes/sector{}",
                track.number,
                track.mode.to_string(),
                Msf::from_lba(track.start_sector),
                track.length,
                track.main_data_size,
                sub
            );
            if let Some(isrc) = &track.isrc {
                println!("\t\tISRC: {}", isrc);
            }
            if let Some(title) = &track.title {
                println!("\t\tTitle: {}", title);
            }
        }
    }

    let archive = disc.open_archive()?;
    let file_count =
        archive.entries().iter().filter(|e| matches!(e.data, EntryData::FsFile(_))).count();
    println!();
    if file_count > 0 {
        println!("Filesystem: {} file(s)", file_count);
    } else {
        println!("Filesystem: none ({} raw entries)", archive.entries().len());
    }
    println!();
    Ok(())
}
