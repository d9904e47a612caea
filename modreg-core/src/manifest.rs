use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::error::EngineError;

pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

const SUPPORTED_SCHEMA_VERSION: u8 = 2;

// field order (schema_version, config, layers) is the canonical on-wire encoding; serde
// preserves struct declaration order, so don't reorder these fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u8,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Manifest { schema_version: SUPPORTED_SCHEMA_VERSION, config, layers }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self).map_err(|e| EngineError::InvalidManifest(e.to_string()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| EngineError::InvalidManifest(e.to_string()))?;
        if manifest.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(EngineError::InvalidManifest(format!(
                "unsupported schema_version {}",
                manifest.schema_version
            )));
        }
        Ok(manifest)
    }

    // config blob must be empty and carry the engine-configured module-config media type
    pub fn validate_is_bicep_module(&self, module_config_media_type: &str) -> Result<(), EngineError> {
        let media_type_matches = self.config.media_type.eq_ignore_ascii_case(module_config_media_type);
        if !media_type_matches || self.config.size != 0 {
            return Err(EngineError::NotABicepModule(format!(
                "config media_type={} size={}",
                self.config.media_type, self.config.size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Annotations;

    fn sample() -> Manifest {
        let config = Descriptor::for_bytes("application/vnd.bicep.module.config.v1+json", b"", Annotations::new());
        let mut annotations = Annotations::new();
        annotations.insert("org.opencontainers.image.title".into(), "main.json".into());
        let layer = Descriptor::for_bytes("application/vnd.bicep.module.layer.v1+json", b"{}", annotations);
        Manifest::new(config, vec![layer])
    }

    #[test]
    fn round_trip() {
        let m = sample();
        let bytes = m.to_json_bytes().unwrap();
        let back = Manifest::from_json_bytes(&bytes).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn canonical_field_order() {
        let m = sample();
        let json = String::from_utf8(m.to_json_bytes().unwrap()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        let keys: Vec<_> = v.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["schema_version", "config", "layers"]);
    }

    #[test]
    fn empty_annotations_are_omitted() {
        let m = sample();
        let json = String::from_utf8(m.to_json_bytes().unwrap()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(v["config"].as_object().unwrap().get("annotations").is_none());
        assert!(v["layers"][0].as_object().unwrap().get("annotations").is_some());
    }

    #[test]
    fn rejects_bad_schema_version() {
        let mut m = sample();
        m.schema_version = 1;
        let bytes = m.to_json_bytes().unwrap();
        assert!(matches!(Manifest::from_json_bytes(&bytes), Err(EngineError::InvalidManifest(_))));
    }

    #[test]
    fn rejects_missing_required_field() {
        let bytes = br#"{"schema_version":2,"config":{"media_type":"x","digest":"sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa","size":0}}"#;
        assert!(matches!(Manifest::from_json_bytes(bytes), Err(EngineError::InvalidManifest(_))));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let m = sample();
        let mut v: serde_json::Value = serde_json::from_slice(&m.to_json_bytes().unwrap()).unwrap();
        v.as_object_mut().unwrap().insert("mediaType".into(), serde_json::json!(crate::manifest::OCI_IMAGE_MANIFEST_MEDIA_TYPE));
        let bytes = serde_json::to_vec(&v).unwrap();
        let back = Manifest::from_json_bytes(&bytes).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn validate_is_bicep_module_accepts_matching_config() {
        let m = sample();
        m.validate_is_bicep_module("application/vnd.bicep.module.config.v1+json").unwrap();
    }

    #[test]
    fn validate_is_bicep_module_rejects_nonempty_config() {
        let config = Descriptor::for_bytes(
            "application/vnd.bicep.module.config.v1+json",
            b"{}",
            Annotations::new(),
        );
        let m = Manifest::new(config, vec![]);
        assert!(matches!(
            m.validate_is_bicep_module("application/vnd.bicep.module.config.v1+json"),
            Err(EngineError::NotABicepModule(_))
        ));
    }

    #[test]
    fn validate_is_bicep_module_rejects_wrong_media_type() {
        let config = Descriptor::for_bytes("application/other", b"", Annotations::new());
        let m = Manifest::new(config, vec![]);
        assert!(matches!(
            m.validate_is_bicep_module("application/vnd.bicep.module.config.v1+json"),
            Err(EngineError::NotABicepModule(_))
        ));
    }
}
