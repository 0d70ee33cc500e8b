#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Engine(#[from] loadsim_engine::EngineError),

    #[error("{0}")]
    Collector(#[from] loadsim_collector::CollectorError),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("{0} unit(s) failed")]
    UnitsFailed(usize),
}
