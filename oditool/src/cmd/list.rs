use std::path::PathBuf;

use argp::FromArgs;
use odi::DiscImage;
use size::{Base, Size};

use crate::util::display;

#[derive(FromArgs, Debug)]
/// Lists the contents of a disc image.
#[argp(subcommand, name = "list")]
pub struct Args {
    #[argp(positional)]
    /// Path to disc image
    file: PathBuf,
}

pub fn run(args: Args) -> odi::Result<()> {
    log::info!("Loading {}", display(&args.file));
    let disc = DiscImage::new(&args.file)?;
    let archive = disc.open_archive()?;

    let mut total = 0;
    for entry in archive.entries() {
        println!(
            "{:>12}  {}",
            Size::from_bytes(entry.size).format().with_base(Base::Base10).to_string(),
            entry.name
        );
        total += entry.size;
    }
    println!();
    println!(
        "{} entries, {} total",
        archive.entries().len(),
        Size::from_bytes(total).format().with_base(Base::Base10)
    );
    Ok(())
}
