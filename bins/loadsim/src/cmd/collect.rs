use crate::config::CollectArgs;
use crate::error::CliError;

pub fn run(args: CollectArgs) -> Result<(), CliError> {
    let publog = args.publog.unwrap_or_else(|| args.logdir.join("publisher.log"));
    let collection = loadsim_collector::collect(&args.logdir, &publog)?;
    print!("{}", collection.render());
    Ok(())
}
