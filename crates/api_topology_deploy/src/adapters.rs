pub mod artifact_store;
pub mod command;
pub mod notifier;
pub mod parameter_store;
pub mod provisioner;
