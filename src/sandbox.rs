mod docker;
mod runner;
mod runtime;
mod sweep;

pub use docker::DockerRuntime;
pub use runner::SandboxRunner;
pub use runtime::{ContainerLogs, ContainerRuntime, ContainerState, RuntimeResult};
pub use sweep::{run_sweeper, sweep_stale_containers};

/// Home directory of the evaluation user inside the container
pub const HOME_PATH: &str = "/home/coursemology";

/// Where the package is extracted inside the container
pub const PACKAGE_PATH: &str = "/home/coursemology/package";

/// Where the workload writes its test report
pub const REPORT_PATH: &str = "/home/coursemology/package/report.xml";

/// Label attached to every container the evaluator creates
pub const EVALUATOR_LABEL: &str = "coursemology.evaluator";
