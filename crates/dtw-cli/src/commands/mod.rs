pub mod check;
pub mod run;

use std::path::Path;

use miette::{IntoDiagnostic, WrapErr};

use dtw_model::{Scenario, ScenarioConfig};

/// Read, parse and build a scenario file.
fn load_scenario(path: &Path) -> miette::Result<Scenario> {
    let config = ScenarioConfig::load(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read scenario {}", path.display()))?;
    Scenario::build(&config)
        .into_diagnostic()
        .wrap_err_with(|| format!("invalid scenario {}", path.display()))
}

/// Display name for a scenario file: its stem, or the whole path.
fn scenario_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
