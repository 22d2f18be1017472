#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use olist_sim::campaign::{CampaignConfig, run_campaign};

fn main() -> Result<()> {
    let json = std::env::args().skip(1).any(|arg| arg == "--json");
    let report = run_campaign(&CampaignConfig::default())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} interesting={}",
            report.seeds_run, report.seeds_passed, report.interesting_states_reached
        );
        for failure in &report.failures {
            println!("seed {} failed:", failure.seed);
            for violation in &failure.violations {
                println!("  {violation}");
            }
        }
    }

    if let Some(seed) = report.first_failure {
        bail!("convergence violated; replay seed {seed}");
    }
    Ok(())
}
