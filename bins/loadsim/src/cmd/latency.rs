use loadsim_collector::LatencySet;
use loadsim_collector::latency::{compare, render_table, write_statistics};

use crate::config::LatencyArgs;
use crate::error::CliError;

pub fn run(args: LatencyArgs) -> Result<(), CliError> {
    let first = LatencySet::load(&args.dir)?;
    let second = args.dir2.as_deref().map(LatencySet::load).transpose()?;

    let mut runs = vec![(args.name1.as_str(), &first)];
    if let Some(second) = &second {
        runs.push((args.name2.as_str(), second));
    }
    let rows = compare(&runs);

    print!("{}", render_table(&rows));
    let path = write_statistics(&rows, &args.output)?;
    println!();
    println!("Statistics written to {}", path.display());
    Ok(())
}
