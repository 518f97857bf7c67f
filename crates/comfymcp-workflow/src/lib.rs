//! comfymcp workflow - PARAM_ placeholder engine and defaults resolution

pub mod defaults;
pub mod error;
pub mod manager;
pub mod template;

pub use defaults::{DefaultSource, DefaultsManager};
pub use error::{WorkflowError, WorkflowResult};
pub use manager::{random_seed, RequirementsReport, WorkflowDefinition, WorkflowManager, WorkflowMetadata};
pub use template::{Binding, ParamType, ParameterSpec};
