use std::path::Path;

pub fn run(path: &Path) -> miette::Result<()> {
    let scenario = super::load_scenario(path)?;

    println!("  All checks passed for '{}'.", super::scenario_name(path));
    println!(
        "  {} sites, {} vessels, {} activities",
        scenario.sites().len(),
        scenario.vessels().len(),
        scenario.activities().len()
    );

    Ok(())
}
