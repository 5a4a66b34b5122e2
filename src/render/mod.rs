//! # Manifest Rendering
//!
//! Turns a component's packaged manifests into an ordered list of desired
//! objects. Rendering collects errors per document instead of stopping, so a
//! single bad document does not hide the rest of the set.
//!
//! - [`ManifestDirRenderer`] reads YAML from a templates directory
//! - [`StaticRenderer`] serves pre-built objects, used by tests

use crate::crd::{AvailabilityType, PlatformEngine};
use crate::images::ImageMap;
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{path} references image {key} which is not configured")]
    MissingImage { path: String, key: String },

    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

/// Rendered objects plus every error met along the way
pub type Rendered = (Vec<DynamicObject>, Vec<RenderError>);

/// Source of desired objects for a component
pub trait Renderer: Send + Sync + Debug {
    /// Render the CRDs shipped under `path`
    fn render_crds(&self, path: &str) -> Rendered;

    /// Render the chart under `path` for `engine` with resolved images
    fn render_chart(&self, path: &str, engine: &PlatformEngine, images: &ImageMap) -> Rendered;
}

/// Values substituted into templates
#[derive(Debug, Clone)]
struct Values<'a> {
    target_namespace: &'a str,
    image_pull_policy: &'a str,
    images: &'a ImageMap,
}

/// Renders multi-document YAML files found under a templates root
#[derive(Debug, Clone)]
pub struct ManifestDirRenderer {
    root: PathBuf,
    default_namespace: String,
}

impl ManifestDirRenderer {
    pub fn new(root: impl Into<PathBuf>, default_namespace: &str) -> Self {
        Self {
            root: root.into(),
            default_namespace: default_namespace.to_string(),
        }
    }

    fn files(&self, path: &str) -> Result<Vec<PathBuf>, RenderError> {
        let dir = self.root.join(path);
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| RenderError::Io {
                path: dir.display().to_string(),
                source: e.into(),
            })?;
            let is_yaml = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if entry.file_type().is_file() && is_yaml {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn render_dir(&self, path: &str, values: Option<&Values<'_>>) -> Rendered {
        let mut objects = Vec::new();
        let mut errors = Vec::new();

        let files = match self.files(path) {
            Ok(files) => files,
            Err(e) => return (objects, vec![e]),
        };

        for file in files {
            let display = file.display().to_string();
            let raw = match std::fs::read_to_string(&file) {
                Ok(raw) => raw,
                Err(source) => {
                    errors.push(RenderError::Io {
                        path: display,
                        source,
                    });
                    continue;
                }
            };
            let content = match values {
                Some(values) => match substitute(&raw, values, &display) {
                    Ok(content) => content,
                    Err(e) => {
                        errors.push(e);
                        continue;
                    }
                },
                None => raw,
            };
            let (mut parsed, mut failed) = parse_documents(&content, &file);
            objects.append(&mut parsed);
            errors.append(&mut failed);
        }

        debug!(path, objects = objects.len(), errors = errors.len(), "Rendered manifests");
        (objects, errors)
    }
}

impl Renderer for ManifestDirRenderer {
    fn render_crds(&self, path: &str) -> Rendered {
        self.render_dir(path, None)
    }

    fn render_chart(&self, path: &str, engine: &PlatformEngine, images: &ImageMap) -> Rendered {
        let values = Values {
            target_namespace: engine.target_namespace(&self.default_namespace),
            image_pull_policy: engine
                .spec
                .overrides
                .as_ref()
                .and_then(|o| o.image_pull_policy.as_deref())
                .unwrap_or("IfNotPresent"),
            images,
        };
        let (mut objects, errors) = self.render_dir(path, Some(&values));
        for obj in &mut objects {
            customize_workload(obj, engine);
        }
        (objects, errors)
    }
}

/// Replace `${TARGET_NAMESPACE}`, `${IMAGE_PULL_POLICY}` and `${IMAGE:<key>}`
fn substitute(raw: &str, values: &Values<'_>, path: &str) -> Result<String, RenderError> {
    let mut out = raw
        .replace("${TARGET_NAMESPACE}", values.target_namespace)
        .replace("${IMAGE_PULL_POLICY}", values.image_pull_policy);

    // Scanning resumes after each inserted image so its text is never re-expanded
    let mut cursor = 0;
    while let Some(found) = out[cursor..].find("${IMAGE:") {
        let start = cursor + found;
        let rest = &out[start + "${IMAGE:".len()..];
        let Some(end) = rest.find('}') else {
            return Err(RenderError::Invalid {
                path: path.to_string(),
                message: "unterminated image placeholder".to_string(),
            });
        };
        let key = rest[..end].trim().to_lowercase();
        let image = values
            .images
            .get(&key)
            .ok_or_else(|| RenderError::MissingImage {
                path: path.to_string(),
                key: key.clone(),
            })?;
        let placeholder_len = "${IMAGE:".len() + end + 1;
        out.replace_range(start..start + placeholder_len, image);
        cursor = start + image.len();
    }
    Ok(out)
}

fn parse_documents(content: &str, file: &Path) -> Rendered {
    let mut objects = Vec::new();
    let mut errors = Vec::new();
    let display = file.display().to_string();

    for document in serde_yaml::Deserializer::from_str(content) {
        let value = match serde_yaml::Value::deserialize(document) {
            Ok(value) => value,
            Err(source) => {
                errors.push(RenderError::Parse {
                    path: display.clone(),
                    source,
                });
                continue;
            }
        };
        if value.is_null() {
            continue;
        }
        match serde_yaml::from_value::<DynamicObject>(value) {
            Ok(obj) if obj.types.is_some() && obj.metadata.name.is_some() => objects.push(obj),
            Ok(_) => errors.push(RenderError::Invalid {
                path: display.clone(),
                message: "document is missing apiVersion, kind or metadata.name".to_string(),
            }),
            Err(source) => errors.push(RenderError::Parse {
                path: display.clone(),
                source,
            }),
        }
    }
    (objects, errors)
}

/// Apply scheduling and availability settings to Deployments
fn customize_workload(obj: &mut DynamicObject, engine: &PlatformEngine) {
    let is_deployment = obj.types.as_ref().is_some_and(|t| t.kind == "Deployment");
    if !is_deployment {
        return;
    }

    let replicas = match engine.spec.availability_config {
        Some(AvailabilityType::Basic) => 1,
        _ => 2,
    };
    let Some(spec) = obj.data.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    spec.insert("replicas".to_string(), json!(replicas));

    let Some(pod) = spec
        .get_mut("template")
        .and_then(|t| t.get_mut("spec"))
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    if let Some(selector) = &engine.spec.node_selector {
        pod.insert("nodeSelector".to_string(), json!(selector));
    }
    if let Some(tolerations) = &engine.spec.tolerations {
        pod.insert("tolerations".to_string(), json!(tolerations));
    }
    if let Some(secret) = &engine.spec.image_pull_secret {
        pod.insert("imagePullSecrets".to_string(), json!([{ "name": secret }]));
    }
}

/// Serves fixed objects per path
#[derive(Debug, Default)]
pub struct StaticRenderer {
    charts: HashMap<String, Vec<DynamicObject>>,
    crds: HashMap<String, Vec<DynamicObject>>,
    failures: HashMap<String, String>,
}

impl StaticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chart(mut self, path: &str, objects: Vec<DynamicObject>) -> Self {
        self.charts.insert(path.to_string(), objects);
        self
    }

    #[must_use]
    pub fn with_crds(mut self, path: &str, objects: Vec<DynamicObject>) -> Self {
        self.crds.insert(path.to_string(), objects);
        self
    }

    /// Every render of `path` reports this error alongside its objects
    #[must_use]
    pub fn with_failure(mut self, path: &str, message: &str) -> Self {
        self.failures.insert(path.to_string(), message.to_string());
        self
    }

    fn errors(&self, path: &str) -> Vec<RenderError> {
        self.failures
            .get(path)
            .map(|message| {
                vec![RenderError::Invalid {
                    path: path.to_string(),
                    message: message.clone(),
                }]
            })
            .unwrap_or_default()
    }
}

impl Renderer for StaticRenderer {
    fn render_crds(&self, path: &str) -> Rendered {
        (
            self.crds.get(path).cloned().unwrap_or_default(),
            self.errors(path),
        )
    }

    fn render_chart(&self, path: &str, _engine: &PlatformEngine, _images: &ImageMap) -> Rendered {
        (
            self.charts.get(path).cloned().unwrap_or_default(),
            self.errors(path),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::PlatformEngineSpec;

    fn images() -> ImageMap {
        ImageMap::from([("console".to_string(), "quay.io/a/console:1".to_string())])
    }

    fn values<'a>(images: &'a ImageMap) -> Values<'a> {
        Values {
            target_namespace: "target",
            image_pull_policy: "Always",
            images,
        }
    }

    #[test]
    fn test_substitute_placeholders() {
        let images = images();
        let out = substitute(
            "ns: ${TARGET_NAMESPACE}\nimage: ${IMAGE:console}\npolicy: ${IMAGE_PULL_POLICY}",
            &values(&images),
            "f.yaml",
        )
        .unwrap();
        assert_eq!(out, "ns: target\nimage: quay.io/a/console:1\npolicy: Always");
    }

    #[test]
    fn test_substitute_does_not_expand_inserted_image_text() {
        let images = ImageMap::from([
            ("console".to_string(), "${IMAGE:console}".to_string()),
            ("other".to_string(), "quay.io/a/other:2".to_string()),
        ]);
        let out = substitute(
            "a: ${IMAGE:console}\nb: ${IMAGE:other}",
            &values(&images),
            "f.yaml",
        )
        .unwrap();
        assert_eq!(out, "a: ${IMAGE:console}\nb: quay.io/a/other:2");
    }

    #[test]
    fn test_substitute_missing_image() {
        let images = images();
        let err = substitute("image: ${IMAGE:hive}", &values(&images), "f.yaml").unwrap_err();
        assert!(matches!(err, RenderError::MissingImage { key, .. } if key == "hive"));
    }

    #[test]
    fn test_parse_collects_errors_per_document() {
        let content = "apiVersion: v1\nkind: Service\nmetadata:\n  name: a\n---\nkind: Service\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let (objects, errors) = parse_documents(content, Path::new("f.yaml"));
        assert_eq!(objects.len(), 2);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_render_chart_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("charts/console");
        std::fs::create_dir_all(&chart).unwrap();
        std::fs::write(
            chart.join("01-deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: console\n  namespace: ${TARGET_NAMESPACE}\nspec:\n  template:\n    spec:\n      containers:\n        - name: c\n          image: ${IMAGE:console}\n",
        )
        .unwrap();
        std::fs::write(
            chart.join("02-service.yaml"),
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: console\n  namespace: ${TARGET_NAMESPACE}\n",
        )
        .unwrap();
        std::fs::write(chart.join("README.md"), "not a manifest").unwrap();

        let mut engine = PlatformEngine::new("engine", PlatformEngineSpec::default());
        engine.spec.availability_config = Some(AvailabilityType::Basic);
        engine.spec.image_pull_secret = Some("pull".to_string());

        let renderer = ManifestDirRenderer::new(dir.path(), "fallback");
        let (objects, errors) = renderer.render_chart("charts/console", &engine, &images());
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].metadata.namespace.as_deref(), Some("fallback"));
        assert_eq!(objects[0].data["spec"]["replicas"], 1);
        assert_eq!(
            objects[0].data["spec"]["template"]["spec"]["imagePullSecrets"][0]["name"],
            "pull"
        );
        assert_eq!(
            objects[0].data["spec"]["template"]["spec"]["containers"][0]["image"],
            "quay.io/a/console:1"
        );
    }

    #[test]
    fn test_missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = ManifestDirRenderer::new(dir.path(), "ns");
        let (objects, errors) = renderer.render_crds("crds/absent");
        assert!(objects.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
