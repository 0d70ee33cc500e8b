pub mod collect;
pub mod latency;
pub mod run;
