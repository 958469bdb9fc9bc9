use std::{
    fs,
    fs::File,
    io,
    path::{Component, Path, PathBuf},
};

use argp::FromArgs;
use odi::{ArchiveEntry, DiscArchive, DiscImage, ResultContext};
use size::{Base, Size};

use crate::util::display;

#[derive(FromArgs, Debug)]
/// Extracts the contents of a disc image.
#[argp(subcommand, name = "extract")]
pub struct Args {
    #[argp(positional)]
    /// Path to disc image
    file: PathBuf,
    #[argp(positional)]
    /// Output directory (optional)
    out: Option<PathBuf>,
    #[argp(switch, short = 'q')]
    /// Quiet output
    quiet: bool,
}

pub fn run(args: Args) -> odi::Result<()> {
    let output_dir = match args.out {
        Some(dir) => dir,
        None => args.file.with_extension(""),
    };
    log::info!("Loading {}", display(&args.file));
    let disc = DiscImage::new(&args.file)?;
    let archive = disc.open_archive()?;

    for entry in archive.entries() {
        extract_entry(&archive, entry, &output_dir, args.quiet)?;
    }
    Ok(())
}

fn extract_entry(
    archive: &DiscArchive,
    entry: &ArchiveEntry,
    output_dir: &Path,
    quiet: bool,
) -> odi::Result<()> {
    let out_path = output_dir.join(sanitize_name(&entry.name)?);
    if !quiet {
        println!(
            "Extracting {} (size: {})",
            display(&out_path),
            Size::from_bytes(entry.size).format().with_base(Base::Base10)
        );
    }
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating directory {}", display(parent)))?;
    }
    let mut reader = archive.open(entry)?;
    let mut file = File::create(&out_path)
        .with_context(|| format!("Creating file {}", display(&out_path)))?;
    io::copy(&mut reader, &mut file)
        .with_context(|| format!("Writing file {}", display(&out_path)))?;
    Ok(())
}

/// Turns a `/`-separated entry name into a relative path, rejecting
/// traversal components.
fn sanitize_name(name: &str) -> odi::Result<PathBuf> {
    let mut path = PathBuf::new();
    for segment in name.split('/') {
        if segment.is_empty() {
            continue;
        }
        let component = Path::new(segment).components().next();
        if segment == ".." || !matches!(component, Some(Component::Normal(_))) {
            return Err(odi::Error::DiscFormat(format!("Unsafe entry name '{}'", name)));
        }
        path.push(segment);
    }
    if path.as_os_str().is_empty() {
        return Err(odi::Error::DiscFormat(format!("Empty entry name '{}'", name)));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("DATA/FILE.BIN").unwrap(), PathBuf::from("DATA/FILE.BIN"));
        assert_eq!(sanitize_name("file.iso").unwrap(), PathBuf::from("file.iso"));
        assert!(sanitize_name("../evil").is_err());
        assert!(sanitize_name("a/../b").is_err());
        assert!(sanitize_name("").is_err());
    }
}
