//! `ocigen check-options` — Classify a mount option list.

use clap::Args;
use ocigen_core::mount::options::{overlay_upper_and_work_dir, parse_options};
use ocigen_core::mount::MountOption;

/// Arguments for the `check-options` command.
#[derive(Args, Debug)]
pub struct CheckOptionsArgs {
    /// Option tokens, separately or comma-separated.
    #[arg(required = true, value_delimiter = ',')]
    pub options: Vec<String>,
}

/// Describes what the generator does with an option.
#[must_use]
pub const fn describe(option: &MountOption) -> &'static str {
    match option {
        MountOption::Overlay => "mount source as overlay",
        MountOption::Chown => "chown source to exec user",
        MountOption::Relabel { shared: true } => "relabel source, shared",
        MountOption::Relabel { shared: false } => "relabel source, private",
        MountOption::UpperDir(_) => "overlay upper directory",
        MountOption::WorkDir(_) => "overlay work directory",
        MountOption::Propagation(_) => "propagation flag",
        MountOption::PassThrough(_) => "passed to the runtime",
    }
}

/// Executes the `check-options` command.
///
/// # Errors
///
/// Returns an error if the overlay directory options are inconsistent.
pub fn execute(args: &CheckOptionsArgs) -> anyhow::Result<()> {
    for option in parse_options(&args.options) {
        println!("{:<32} {}", option.to_string(), describe(&option));
    }
    match overlay_upper_and_work_dir(&args.options)? {
        Some(dirs) => println!("overlay: upperdir={} workdir={}", dirs.upper, dirs.work),
        None => println!("overlay: scratch directories"),
    }
    Ok(())
}
