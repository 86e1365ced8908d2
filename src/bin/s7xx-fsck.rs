use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Check and repair an S-7XX disk image in place.
#[derive(Parser)]
#[command(name = "s7xx-fsck")]
struct Args {
    /// Path to the backing image file.
    image: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match s7xx_fs::fsck::check(&args.image) {
        Ok(report) if report.is_clean() => {
            println!("{}: clean", args.image.display());
            ExitCode::SUCCESS
        }
        Ok(report) => {
            println!("{}: repaired findings {:?}", args.image.display(), report.findings);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("s7xx-fsck: {}", e);
            ExitCode::FAILURE
        }
    }
}
