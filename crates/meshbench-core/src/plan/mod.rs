pub mod io;
pub mod model;
pub mod templates;
pub mod validation;

pub use io::{read_config, write_config};
pub use model::{
    BenchConfig, HttpMethod, InclusionPolicy, LoadSpec, ParamValue, PayloadParam, RequestStep,
    RunnerSettings, VariantConfig,
};
pub use validation::{validate_config, validate_spec};
