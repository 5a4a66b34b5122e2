//! Prints the `PlatformEngine` CustomResourceDefinition as YAML.

use kube::CustomResourceExt;
use platform_engine_controller::crd::PlatformEngine;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&PlatformEngine::crd())?);
    Ok(())
}
