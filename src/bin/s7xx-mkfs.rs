use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Format an existing S-7XX disk image in place.
#[derive(Parser)]
#[command(name = "s7xx-mkfs")]
struct Args {
    /// Path to the backing image file (must already exist).
    image: PathBuf,

    /// Volume label, up to 16 bytes; longer labels are truncated.
    #[arg(short, long, default_value = "")]
    label: String,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match s7xx_fs::mkfs::format(&args.image, &args.label) {
        Ok(()) => {
            println!("formatted {}", args.image.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("s7xx-mkfs: {}", e);
            ExitCode::FAILURE
        }
    }
}
