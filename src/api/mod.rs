//! Embedding API: load a project, bind inputs and run one of its graphs.

mod runner;

pub use runner::{
    load_project_from_file, load_project_from_str, GraphRunner, GraphRunnerBuilder, PreparedRun,
};
