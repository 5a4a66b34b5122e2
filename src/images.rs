//! # Image Resolution
//!
//! Operand image references come from the operator's environment
//! (`OPERAND_IMAGE_*`, falling back to `RELATED_IMAGE_*`), optionally overlaid
//! by a ConfigMap named in an annotation on the managing resource.

use crate::client::{ClientError, ClusterClient, ObjectKey};
use crate::constants::IMAGE_OVERRIDES_ANNOTATION;
use crate::crd::PlatformEngine;
use kube::ResourceExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Image key (lowercase) to full image reference
pub type ImageMap = BTreeMap<String, String>;

const OPERAND_PREFIX: &str = "OPERAND_IMAGE_";
const RELATED_PREFIX: &str = "RELATED_IMAGE_";
const OVERRIDES_KEY: &str = "overrides.json";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("no image references configured")]
    NoImages,

    #[error("image overrides configmap {name} could not be read: {source}")]
    OverridesUnavailable {
        name: String,
        #[source]
        source: ClientError,
    },

    #[error("image overrides in configmap {name} are malformed: {source}")]
    MalformedOverrides {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One entry of the overrides document
#[derive(Debug, Deserialize)]
struct ImageOverride {
    #[serde(rename = "image-key")]
    key: String,
    #[serde(rename = "image-remote")]
    remote: String,
    #[serde(rename = "image-name")]
    name: String,
    #[serde(rename = "image-digest", default)]
    digest: Option<String>,
    #[serde(rename = "image-tag", default)]
    tag: Option<String>,
}

impl ImageOverride {
    fn reference(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => format!("{}/{}@{}", self.remote, self.name, digest),
            (None, Some(tag)) => format!("{}/{}:{}", self.remote, self.name, tag),
            (None, None) => format!("{}/{}", self.remote, self.name),
        }
    }
}

/// Build the image map from environment-style pairs
pub fn images_from_vars<I>(vars: I) -> ImageMap
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: Vec<(String, String)> = vars.into_iter().collect();
    let collect = |prefix: &str| -> ImageMap {
        vars.iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .map(|key| (key.to_lowercase(), v.clone()))
            })
            .collect()
    };
    let operand = collect(OPERAND_PREFIX);
    if operand.is_empty() {
        collect(RELATED_PREFIX)
    } else {
        operand
    }
}

/// Image map from the process environment
pub fn images_from_env() -> ImageMap {
    images_from_vars(std::env::vars())
}

/// Resolve images for `engine`, applying any annotated overrides
pub async fn resolve_images(
    client: &dyn ClusterClient,
    engine: &PlatformEngine,
    base: &ImageMap,
    operator_namespace: &str,
) -> Result<ImageMap, ImageError> {
    let mut images = base.clone();

    if let Some(name) = engine.annotations().get(IMAGE_OVERRIDES_ANNOTATION) {
        let key = ObjectKey::new("v1", "ConfigMap", Some(operator_namespace), name);
        let cm = client
            .get(&key)
            .await
            .map_err(|source| ImageError::OverridesUnavailable {
                name: name.clone(),
                source,
            })?;
        if let Some(raw) = cm.data.pointer(&format!("/data/{OVERRIDES_KEY}")).and_then(|v| v.as_str()) {
            let overrides: Vec<ImageOverride> =
                serde_json::from_str(raw).map_err(|source| ImageError::MalformedOverrides {
                    name: name.clone(),
                    source,
                })?;
            info!(configmap = %name, count = overrides.len(), "Applying image overrides");
            for o in overrides {
                images.insert(o.key.to_lowercase(), o.reference());
            }
        } else {
            debug!(configmap = %name, "Image overrides configmap has no {} key", OVERRIDES_KEY);
        }
    }

    if images.is_empty() {
        return Err(ImageError::NoImages);
    }
    Ok(images)
}
