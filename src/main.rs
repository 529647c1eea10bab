use anyhow::Result;
use clap::Parser;
use pdf_zipper::{cli, error::ConvertError};
use tracing::error;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    if let Err(err) = cli::dispatch(args) {
        error!("{:#}", err);
        let cancelled = err
            .downcast_ref::<ConvertError>()
            .is_some_and(ConvertError::is_cancelled);
        std::process::exit(if cancelled { 130 } else { 1 });
    }
    Ok(())
}
