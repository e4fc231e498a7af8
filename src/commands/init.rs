// ABOUTME: Init command: writes a template deployment configuration.
// ABOUTME: Refuses to overwrite an existing file unless forced.

use conveyor::config::{self, CONFIG_FILENAME};
use conveyor::error::Result;
use conveyor::model::ApplicationKind;
use conveyor::output::Output;
use std::path::Path;

use crate::cli::AppKind;

pub fn init(dir: &Path, kind: AppKind, force: bool, output: &Output) -> Result<()> {
    let kind = match kind {
        AppKind::Kubernetes => ApplicationKind::Kubernetes,
        AppKind::Lambda => ApplicationKind::Lambda,
    };
    config::init_config(dir, kind, force)?;
    output.success(&format!(
        "Wrote {} for a {kind} application",
        dir.join(CONFIG_FILENAME).display()
    ));
    Ok(())
}
