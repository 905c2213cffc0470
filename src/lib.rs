pub mod adapters {
    pub mod input;
    pub mod output;
    pub mod platform;
    pub mod policy;
    pub mod remote;
    pub mod scoring_policy;
    pub mod solvers;
}

pub mod cli {
    pub mod interface;
}

pub mod core {
    pub mod baseline;
    pub mod compare;
    pub mod config;
    pub mod error;
    pub mod history;
    pub mod instance;
    pub mod job;
    pub mod monitor;
    pub mod pipeline;
    pub mod result;
    pub mod train;
}

pub mod utils {
    pub mod lib;
}
